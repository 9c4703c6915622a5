//! In-memory record of calls, tickets, and requests built from [`CallEvent`]s.
//!
//! The ledger only listens; it never drives the controller. It lives for
//! the process lifetime and is what the CLI prints at the end of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{CallEvent, EndReason};
use crate::tools::{ConnectionRequest, Ticket};
use crate::transcript::TranscriptEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    #[serde(rename = "In Progress")]
    InProgress,
    Completed,
    Forwarded,
    Missed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: CallStatus,
    pub transcript: Vec<TranscriptEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStats {
    pub total_calls: usize,
    /// Calls that reached the agent (completed or forwarded).
    pub attended_calls: usize,
    pub missed_calls: usize,
    pub forwarded_calls: usize,
    pub auto_resolved: usize,
    pub new_connection_requests: usize,
}

#[derive(Debug, Default)]
pub struct CallLedger {
    calls: Vec<CallRecord>,
    tickets: Vec<Ticket>,
    connection_requests: Vec<ConnectionRequest>,
    auto_resolved: usize,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &CallEvent) {
        match event {
            CallEvent::CallStarted {
                call_id,
                started_at,
            } => self.calls.push(CallRecord {
                id: call_id.clone(),
                start_time: *started_at,
                end_time: None,
                status: CallStatus::InProgress,
                transcript: Vec::new(),
            }),
            CallEvent::CallForwarded { call_id } => {
                if let Some(call) = self.call_mut(call_id) {
                    call.status = CallStatus::Forwarded;
                }
            }
            CallEvent::CallEnded {
                call_id,
                ended_at,
                transcript,
                reason,
            } => {
                let Some(call) = self.call_mut(call_id) else {
                    tracing::warn!(call_id = %call_id, "Call ended without a start record");
                    return;
                };
                call.end_time = Some(*ended_at);
                call.transcript = transcript.clone();
                call.status = match (reason, call.status) {
                    (EndReason::SetupFailed, _) => CallStatus::Missed,
                    (EndReason::Forwarded, _) | (_, CallStatus::Forwarded) => CallStatus::Forwarded,
                    _ => CallStatus::Completed,
                };
            }
            CallEvent::TicketCreated(ticket) => self.tickets.push(ticket.clone()),
            CallEvent::IssueAutoResolved { .. } => self.auto_resolved += 1,
            CallEvent::NewConnectionRequested(request) => {
                self.connection_requests.push(request.clone());
            }
            CallEvent::StateChanged { .. }
            | CallEvent::TranscriptUpdated { .. }
            | CallEvent::Error { .. } => {}
        }
    }

    fn call_mut(&mut self, id: &str) -> Option<&mut CallRecord> {
        self.calls.iter_mut().rev().find(|c| c.id == id)
    }

    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    pub fn connection_requests(&self) -> &[ConnectionRequest] {
        &self.connection_requests
    }

    pub fn stats(&self) -> CallStats {
        let count = |status| self.calls.iter().filter(|c| c.status == status).count();
        let forwarded = count(CallStatus::Forwarded);
        CallStats {
            total_calls: self.calls.len(),
            attended_calls: count(CallStatus::Completed) + forwarded,
            missed_calls: count(CallStatus::Missed),
            forwarded_calls: forwarded,
            auto_resolved: self.auto_resolved,
            new_connection_requests: self.connection_requests.len(),
        }
    }
}
