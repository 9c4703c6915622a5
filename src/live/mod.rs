//! Gemini Live transport: wire protocol and WebSocket connector.

pub mod gemini;
pub mod protocol;

pub use gemini::{
    GeminiLiveConnector, LinkEvent, LiveConnector, OutboundMessage, DEFAULT_MODEL, DEFAULT_VOICE,
    GEMINI_LIVE_WS_URL,
};
pub use protocol::{build_setup_message, parse_server_message, ServerMessage, SessionSetup, SetupMessage};
