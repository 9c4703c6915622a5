//! Call lifecycle: states, outward events, and the session controller.

pub mod controller;
pub mod playback;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tools::{ConnectionRequest, Ticket};
use crate::transcript::TranscriptEntry;

pub use controller::{CallError, CallPanel, ControllerConfig, PanelStatus, RegistryFactory};
pub use playback::PlaybackScheduler;

/// Lifecycle of the panel's single call slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Connecting,
    Live,
    Ended,
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Ended => "ended",
        })
    }
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The panel operator hung up.
    Hangup,
    /// Handed to a human manager.
    Forwarded,
    /// The Live server closed the stream.
    RemoteClosed,
    TransportError,
    /// The session never got past connection setup.
    SetupFailed,
}

/// Everything the panel publishes to the rest of the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CallEvent {
    CallStarted {
        call_id: String,
        started_at: DateTime<Utc>,
    },
    CallForwarded {
        call_id: String,
    },
    /// Always the last event of a call, carrying the final transcript.
    CallEnded {
        call_id: String,
        ended_at: DateTime<Utc>,
        transcript: Vec<TranscriptEntry>,
        reason: EndReason,
    },
    TicketCreated(Ticket),
    IssueAutoResolved {
        account_id: String,
        details: String,
        resolution_id: String,
    },
    NewConnectionRequested(ConnectionRequest),
    StateChanged {
        state: CallState,
    },
    /// A transcript entry was added or grew in place.
    TranscriptUpdated {
        index: usize,
        entry: TranscriptEntry,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Speaker;

    #[test]
    fn events_are_tagged_kebab_case() {
        let event = CallEvent::StateChanged {
            state: CallState::Live,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state-changed");
        assert_eq!(json["state"], "live");
    }

    #[test]
    fn call_ended_carries_transcript() {
        let event = CallEvent::CallEnded {
            call_id: "c1".into(),
            ended_at: Utc::now(),
            transcript: vec![TranscriptEntry {
                speaker: Speaker::Agent,
                text: "Namaskaram".into(),
            }],
            reason: EndReason::Forwarded,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "call-ended");
        assert_eq!(json["reason"], "forwarded");
        assert_eq!(json["transcript"][0]["speaker"], "agent");

        let back: CallEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(back, CallEvent::CallEnded { reason: EndReason::Forwarded, .. }));
    }

    #[test]
    fn state_display_matches_serde() {
        for state in [CallState::Idle, CallState::Connecting, CallState::Live, CallState::Ended] {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, state.to_string());
        }
    }
}
