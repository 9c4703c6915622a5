//! Running transcript of one call.
//!
//! The Live API streams transcription in small fragments for both the
//! caller and the agent, interleaved with each other. Fragments from the
//! same speaker coalesce into one entry until the server marks the turn
//! complete; a new speaker (or a closed turn) starts a new entry.

use serde::{Deserialize, Serialize};

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Agent,
    System,
}

impl Speaker {
    fn slot(self) -> Option<usize> {
        match self {
            Self::Caller => Some(0),
            Self::Agent => Some(1),
            Self::System => None,
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Caller => "caller",
            Self::Agent => "agent",
            Self::System => "system",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Ordered, append-mostly transcript with per-speaker open turns.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    entries: Vec<TranscriptEntry>,
    /// Open-turn flags for caller and agent.
    open: [bool; 2],
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transcription fragment and return the index of the entry it
    /// landed in, or `None` when the fragment was empty.
    pub fn append_fragment(&mut self, speaker: Speaker, text: &str) -> Option<usize> {
        if text.is_empty() {
            return None;
        }
        let Some(slot) = speaker.slot() else {
            return Some(self.append_system(text));
        };

        if self.open[slot] {
            if let Some(last) = self.entries.last_mut() {
                if last.speaker == speaker {
                    last.text.push_str(text);
                    return Some(self.entries.len() - 1);
                }
            }
        }

        self.entries.push(TranscriptEntry {
            speaker,
            text: text.to_string(),
        });
        self.open[slot] = true;
        Some(self.entries.len() - 1)
    }

    /// Push a standalone system line. System entries are never extended.
    pub fn append_system(&mut self, text: &str) -> usize {
        self.entries.push(TranscriptEntry {
            speaker: Speaker::System,
            text: text.to_string(),
        });
        self.entries.len() - 1
    }

    /// Close every open turn.
    pub fn close_turn(&mut self) {
        self.open = [false; 2];
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.clone()
    }

    pub fn entry(&self, index: usize) -> Option<&TranscriptEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.open = [false; 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(t: &TranscriptAssembler) -> Vec<(Speaker, String)> {
        t.snapshot().into_iter().map(|e| (e.speaker, e.text)).collect()
    }

    #[test]
    fn same_speaker_fragments_coalesce() {
        let mut t = TranscriptAssembler::new();
        assert_eq!(t.append_fragment(Speaker::Caller, "Hel"), Some(0));
        assert_eq!(t.append_fragment(Speaker::Caller, "lo"), Some(0));
        assert_eq!(texts(&t), vec![(Speaker::Caller, "Hello".to_string())]);
    }

    #[test]
    fn turn_complete_splits_entries() {
        let mut t = TranscriptAssembler::new();
        t.append_fragment(Speaker::Caller, "Hello");
        t.close_turn();
        assert_eq!(t.append_fragment(Speaker::Caller, "Again"), Some(1));
        assert_eq!(
            texts(&t),
            vec![
                (Speaker::Caller, "Hello".to_string()),
                (Speaker::Caller, "Again".to_string()),
            ]
        );
    }

    #[test]
    fn interleaved_speakers_start_new_entries() {
        let mut t = TranscriptAssembler::new();
        t.append_fragment(Speaker::Caller, "My internet");
        t.append_fragment(Speaker::Agent, "Namaskaram");
        t.append_fragment(Speaker::Caller, " is down");
        assert_eq!(t.len(), 3);
        assert_eq!(t.entry(2).unwrap().text, " is down");
    }

    #[test]
    fn system_entries_are_never_extended() {
        let mut t = TranscriptAssembler::new();
        t.append_system("Call connected. Waiting for agent...");
        t.append_system("Call is being transferred to a human manager...");
        t.append_fragment(Speaker::System, "x");
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn system_entry_breaks_coalescing() {
        let mut t = TranscriptAssembler::new();
        t.append_fragment(Speaker::Agent, "One moment");
        t.append_system("note");
        assert_eq!(t.append_fragment(Speaker::Agent, " please"), Some(2));
    }

    #[test]
    fn empty_fragments_are_ignored() {
        let mut t = TranscriptAssembler::new();
        assert_eq!(t.append_fragment(Speaker::Agent, ""), None);
        assert!(t.is_empty());
    }

    #[test]
    fn snapshot_is_detached_and_reset_clears() {
        let mut t = TranscriptAssembler::new();
        t.append_fragment(Speaker::Caller, "Hi");
        let snap = t.snapshot();
        t.append_fragment(Speaker::Caller, " there");
        assert_eq!(snap[0].text, "Hi");

        t.reset();
        assert!(t.is_empty());
        assert_eq!(t.append_fragment(Speaker::Caller, "new"), Some(0));
    }

    #[test]
    fn speaker_serializes_lowercase() {
        let entry = TranscriptEntry {
            speaker: Speaker::Caller,
            text: "hi".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"speaker":"caller","text":"hi"}"#);
    }
}
