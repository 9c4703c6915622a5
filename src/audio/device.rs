//! Microphone and speaker seams for a call.
//!
//! The controller only talks to these traits. The CLI plugs in
//! [`WavDevices`], which replays a WAV file as the caller's microphone and
//! renders the agent's scheduled speech into a WAV file on close.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::codec::FloatBuffer;

/// Handle of one scheduled buffer on a [`PlaybackOutput`].
pub type SourceId = u64;

/// Opens the two audio sides of a call.
#[async_trait]
pub trait AudioDevices: Send + Sync {
    /// Open the speaker side at the given rate.
    fn open_playback(&self, sample_rate: u32) -> anyhow::Result<Box<dyn PlaybackOutput>>;

    /// Open the microphone, delivering mono frames of `frame_samples`.
    ///
    /// May wait on a permission prompt or device start-up.
    async fn open_capture(&self, sample_rate: u32, frame_samples: usize) -> anyhow::Result<Capture>;
}

/// A running microphone: its frame stream plus the stream controls.
pub struct Capture {
    pub frames: mpsc::Receiver<Vec<f32>>,
    pub stream: Box<dyn CaptureStream>,
}

/// Controls for an open microphone.
///
/// Teardown order is `disconnect` → `stop` → `close`.
pub trait CaptureStream: Send + Sync {
    /// Stop handing frames to the session.
    fn disconnect(&mut self);
    /// Release the microphone itself.
    fn stop(&mut self);
    /// Tear down the capture context.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// Speaker side with its own clock, like a browser `AudioContext`.
pub trait PlaybackOutput: Send + Sync {
    /// Output clock in seconds since the output was opened.
    fn current_time(&self) -> f64;
    /// Schedule `buffer` to begin at `at` seconds on the output clock.
    fn start(&mut self, buffer: FloatBuffer, at: f64) -> anyhow::Result<SourceId>;
    /// Silence a scheduled or playing source from now on.
    fn stop(&mut self, source: SourceId);
    fn close(&mut self) -> anyhow::Result<()>;
}

// ── WAV file devices ─────────────────────────────────────────────

/// File-backed devices for running a call without sound hardware.
#[derive(Debug, Clone)]
pub struct WavDevices {
    input: PathBuf,
    output: PathBuf,
}

impl WavDevices {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

#[async_trait]
impl AudioDevices for WavDevices {
    fn open_playback(&self, sample_rate: u32) -> anyhow::Result<Box<dyn PlaybackOutput>> {
        Ok(Box::new(WavPlayback::new(self.output.clone(), sample_rate)))
    }

    async fn open_capture(&self, sample_rate: u32, frame_samples: usize) -> anyhow::Result<Capture> {
        if frame_samples == 0 {
            anyhow::bail!("capture frame size must be positive");
        }
        let path = self.input.clone();
        let samples = tokio::task::spawn_blocking(move || load_mono_wav(&path, sample_rate))
            .await
            .map_err(|e| anyhow::anyhow!("WAV loader task failed: {e}"))??;

        tracing::info!(
            input = %self.input.display(),
            samples = samples.len(),
            seconds = samples.len() as f64 / f64::from(sample_rate),
            "Replaying WAV file as microphone"
        );

        let (tx, frames) = mpsc::channel::<Vec<f32>>(64);
        let connected = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(replay_frames(
            samples,
            sample_rate,
            frame_samples,
            tx,
            Arc::clone(&connected),
        ));

        Ok(Capture {
            frames,
            stream: Box::new(WavCaptureStream {
                task: Some(task),
                connected,
            }),
        })
    }
}

/// Emit `samples` in real time, then keep the line open with silence.
async fn replay_frames(
    samples: Vec<f32>,
    sample_rate: u32,
    frame_samples: usize,
    tx: mpsc::Sender<Vec<f32>>,
    connected: Arc<AtomicBool>,
) {
    let period = std::time::Duration::from_secs_f64(frame_samples as f64 / f64::from(sample_rate));
    let mut interval = tokio::time::interval(period);
    let mut chunks = samples.chunks(frame_samples);

    loop {
        interval.tick().await;
        let frame = match chunks.next() {
            Some(chunk) => {
                let mut frame = chunk.to_vec();
                frame.resize(frame_samples, 0.0);
                frame
            }
            None => vec![0.0; frame_samples],
        };
        if !connected.load(Ordering::Acquire) {
            continue;
        }
        if tx.send(frame).await.is_err() {
            break;
        }
    }
    tracing::debug!("WAV microphone replay stopped");
}

struct WavCaptureStream {
    task: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
}

impl CaptureStream for WavCaptureStream {
    fn disconnect(&mut self) {
        self.connected.store(false, Ordering::Release);
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Drop for WavCaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read a WAV file as mono floats at `target_rate`.
pub fn load_mono_wav(path: &Path, target_rate: u32) -> anyhow::Result<Vec<f32>> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<_, _>>()?
        }
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
    };

    let channels = usize::from(spec.channels.max(1));
    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(resample_linear(&mono, spec.sample_rate, target_rate))
}

/// Linear-interpolation resampler; good enough for replaying test calls.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = (samples.len() as f64 / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

struct ScheduledSource {
    id: SourceId,
    start: usize,
    samples: Vec<f32>,
    /// Output sample index where the source was stopped.
    cut_at: Option<usize>,
}

/// Playback output that mixes scheduled buffers into a WAV file on close.
pub struct WavPlayback {
    path: PathBuf,
    sample_rate: u32,
    opened: tokio::time::Instant,
    sources: Vec<ScheduledSource>,
    next_id: SourceId,
    closed: bool,
}

impl WavPlayback {
    pub fn new(path: PathBuf, sample_rate: u32) -> Self {
        Self {
            path,
            sample_rate,
            opened: tokio::time::Instant::now(),
            sources: Vec::new(),
            next_id: 1,
            closed: false,
        }
    }

    fn index_of(&self, secs: f64) -> usize {
        (secs.max(0.0) * f64::from(self.sample_rate)).round() as usize
    }

    fn render(&self) -> Vec<f32> {
        let len = self
            .sources
            .iter()
            .map(|s| s.start + s.cut_at.map_or(s.samples.len(), |c| c.saturating_sub(s.start).min(s.samples.len())))
            .max()
            .unwrap_or(0);
        let mut mix = vec![0.0f32; len];
        for source in &self.sources {
            let audible = source
                .cut_at
                .map_or(source.samples.len(), |c| c.saturating_sub(source.start).min(source.samples.len()));
            for (offset, sample) in source.samples[..audible].iter().enumerate() {
                mix[source.start + offset] += sample;
            }
        }
        mix
    }
}

impl PlaybackOutput for WavPlayback {
    fn current_time(&self) -> f64 {
        self.opened.elapsed().as_secs_f64()
    }

    fn start(&mut self, buffer: FloatBuffer, at: f64) -> anyhow::Result<SourceId> {
        if self.closed {
            anyhow::bail!("playback output already closed");
        }
        let channels = buffer.channel_count().max(1) as f32;
        let samples: Vec<f32> = (0..buffer.frame_count())
            .map(|i| buffer.channels.iter().map(|ch| ch[i]).sum::<f32>() / channels)
            .collect();
        let id = self.next_id;
        self.next_id += 1;
        let start = self.index_of(at);
        self.sources.push(ScheduledSource {
            id,
            start,
            samples,
            cut_at: None,
        });
        Ok(id)
    }

    fn stop(&mut self, source: SourceId) {
        let now = self.index_of(self.current_time());
        if let Some(s) = self.sources.iter_mut().find(|s| s.id == source) {
            s.cut_at.get_or_insert(now);
        }
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mix = self.render();
        let mut writer = hound::WavWriter::create(&self.path, spec)
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {e}", self.path.display()))?;
        for sample in super::codec::pcm_from_float(&mix) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;

        tracing::info!(
            output = %self.path.display(),
            sources = self.sources.len(),
            seconds = mix.len() as f64 / f64::from(self.sample_rate),
            "Agent audio written"
        );
        Ok(())
    }
}
