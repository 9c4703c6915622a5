//! Live session core of a call-center voice agent panel.
//!
//! A [`CallPanel`](call::CallPanel) streams one call at a time to Gemini
//! Live and plays back the agent's speech. Tool calls run against mock
//! backends while a two-sided transcript builds up. Everything the rest of an
//! application needs to know arrives as [`CallEvent`](call::CallEvent)s.

pub mod audio;
pub mod call;
pub mod config;
pub mod ledger;
pub mod live;
pub mod tools;
pub mod transcript;

pub use call::{CallEvent, CallPanel, CallState, EndReason};
pub use config::Config;
pub use ledger::CallLedger;
