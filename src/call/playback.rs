//! Gapless scheduling of agent speech on the playback clock.

use crate::audio::{FloatBuffer, PlaybackOutput, SourceId};

/// Queues decoded agent audio back to back on a [`PlaybackOutput`].
///
/// Each chunk starts at `max(next_start_time, output clock)` so chunks that
/// arrive early line up without gaps and chunks that arrive late start
/// immediately. An interruption stops everything and rewinds the cursor.
pub struct PlaybackScheduler {
    output: Option<Box<dyn PlaybackOutput>>,
    next_start_time: f64,
    /// Scheduled or playing sources with their end times.
    sources: Vec<(SourceId, f64)>,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn PlaybackOutput>) -> Self {
        Self {
            output: Some(output),
            next_start_time: 0.0,
            sources: Vec::new(),
        }
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Sources that have not finished or been stopped.
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Schedule `buffer` and return its start time on the output clock.
    pub fn schedule(&mut self, buffer: FloatBuffer) -> anyhow::Result<f64> {
        let Some(output) = self.output.as_mut() else {
            anyhow::bail!("playback output is closed");
        };

        let now = output.current_time();
        self.sources.retain(|(_, end)| *end > now);

        let start_at = self.next_start_time.max(now);
        let duration = buffer.duration_secs();
        let id = output.start(buffer, start_at)?;
        self.next_start_time = start_at + duration;
        self.sources.push((id, self.next_start_time));
        Ok(start_at)
    }

    /// Stop every scheduled source and reset the cursor to zero.
    pub fn interrupt(&mut self) {
        if let Some(output) = self.output.as_mut() {
            for (id, _) in self.sources.drain(..) {
                output.stop(id);
            }
        }
        self.sources.clear();
        self.next_start_time = 0.0;
    }

    /// Stop playback and close the output. Safe to call more than once.
    pub fn close(&mut self) {
        self.interrupt();
        if let Some(mut output) = self.output.take() {
            if let Err(e) = output.close() {
                tracing::warn!(error = %e, "Failed to close playback output");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.output.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        now: f64,
        started: Vec<(SourceId, f64)>,
        stopped: Vec<SourceId>,
        closes: usize,
    }

    struct ManualOutput(Arc<Mutex<Log>>);

    impl PlaybackOutput for ManualOutput {
        fn current_time(&self) -> f64 {
            self.0.lock().unwrap().now
        }
        fn start(&mut self, _buffer: FloatBuffer, at: f64) -> anyhow::Result<SourceId> {
            let mut log = self.0.lock().unwrap();
            let id = log.started.len() as SourceId + 1;
            log.started.push((id, at));
            Ok(id)
        }
        fn stop(&mut self, source: SourceId) {
            self.0.lock().unwrap().stopped.push(source);
        }
        fn close(&mut self) -> anyhow::Result<()> {
            self.0.lock().unwrap().closes += 1;
            Ok(())
        }
    }

    fn half_second() -> FloatBuffer {
        FloatBuffer {
            sample_rate: 24_000,
            channels: vec![vec![0.0; 12_000]],
        }
    }

    fn scheduler() -> (PlaybackScheduler, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        (PlaybackScheduler::new(Box::new(ManualOutput(Arc::clone(&log)))), log)
    }

    #[test]
    fn chunks_play_back_to_back() {
        let (mut s, log) = scheduler();
        assert_eq!(s.schedule(half_second()).unwrap(), 0.0);
        assert_eq!(s.schedule(half_second()).unwrap(), 0.5);
        assert!((s.next_start_time() - 1.0).abs() < 1e-9);
        assert_eq!(log.lock().unwrap().started.len(), 2);
    }

    #[test]
    fn late_chunk_starts_at_current_time() {
        let (mut s, log) = scheduler();
        s.schedule(half_second()).unwrap();
        log.lock().unwrap().now = 2.0;
        assert_eq!(s.schedule(half_second()).unwrap(), 2.0);
        // The first source finished and is no longer tracked.
        assert_eq!(s.active_sources(), 1);
    }

    #[test]
    fn interrupt_stops_all_and_rewinds() {
        let (mut s, log) = scheduler();
        s.schedule(half_second()).unwrap();
        s.schedule(half_second()).unwrap();
        s.interrupt();

        assert_eq!(log.lock().unwrap().stopped, vec![1, 2]);
        assert_eq!(s.next_start_time(), 0.0);
        assert_eq!(s.active_sources(), 0);

        log.lock().unwrap().now = 0.25;
        assert_eq!(s.schedule(half_second()).unwrap(), 0.25);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut s, log) = scheduler();
        s.schedule(half_second()).unwrap();
        s.close();
        s.close();
        assert!(s.is_closed());
        assert_eq!(log.lock().unwrap().closes, 1);
        assert_eq!(log.lock().unwrap().stopped, vec![1]);
        assert!(s.schedule(half_second()).is_err());
    }
}
