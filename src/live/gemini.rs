//! Gemini Live WebSocket connector.
//!
//! [`LiveConnector`] is the seam between the call controller and the
//! network: the controller hands over the setup frame and the receiving
//! end of its outbound queue, and gets back a stream of [`LinkEvent`]s once
//! the server has acknowledged setup. Tests substitute a scripted connector.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::protocol::{
    build_audio_message, build_tool_response_message, parse_server_message, ServerMessage,
    SetupMessage,
};
use crate::tools::FunctionResponse;

/// Default Gemini Live WebSocket endpoint.
pub const GEMINI_LIVE_WS_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Model the panel talks to unless configured otherwise.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

pub const DEFAULT_VOICE: &str = "Kore";

/// Client → server traffic queued by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Base64 16kHz PCM frame.
    Audio(String),
    ToolResponse(FunctionResponse),
    Close,
}

/// Server → client traffic delivered to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message(ServerMessage),
    /// The server closed the stream.
    Closed,
    Error(String),
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Open a session, send `setup`, and wait for the server to accept it.
    ///
    /// From then on every message taken from `outbound` goes on the wire in
    /// order, and server frames arrive on the returned receiver.
    async fn connect(
        &self,
        session_id: &str,
        setup: SetupMessage,
        outbound: mpsc::Receiver<OutboundMessage>,
    ) -> anyhow::Result<mpsc::Receiver<LinkEvent>>;
}

#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    api_key: Option<String>,
    endpoint: String,
    setup_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(api_key: Option<String>, endpoint: impl Into<String>, setup_timeout: Duration) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            endpoint: endpoint.into(),
            setup_timeout,
        }
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        session_id: &str,
        setup: SetupMessage,
        outbound: mpsc::Receiver<OutboundMessage>,
    ) -> anyhow::Result<mpsc::Receiver<LinkEvent>> {
        let Some(api_key) = self.api_key.as_deref() else {
            anyhow::bail!("Gemini API key is required");
        };
        let url = format!("{}?key={api_key}", self.endpoint);

        tracing::info!(
            session_id = %session_id,
            model = %setup.setup.model,
            tools = setup.setup.tools.first().map_or(0, |t| t.function_declarations.len()),
            "Connecting to Gemini Live"
        );

        let (mut ws_stream, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Gemini Live: {e}"))?;

        let setup_json = serde_json::to_string(&setup)?;
        tracing::debug!(session_id = %session_id, bytes = setup_json.len(), "Sending Gemini Live setup");
        ws_stream
            .send(WsMessage::Text(setup_json.into()))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send setup message: {e}"))?;

        let timeout = self.setup_timeout;
        match tokio::time::timeout(timeout, wait_for_setup_complete(&mut ws_stream, session_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => anyhow::bail!("Gemini Live setupComplete timeout ({}s)", timeout.as_secs()),
        }

        let (ws_sender, ws_receiver) = ws_stream.split();
        let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(256);

        tokio::spawn(outbound_loop(outbound, ws_sender, session_id.to_string()));
        tokio::spawn(inbound_loop(ws_receiver, event_tx, session_id.to_string()));

        Ok(event_rx)
    }
}

/// Gemini sends JSON in Binary frames too; return the text of either kind.
fn frame_json(msg: &WsMessage) -> Option<&str> {
    match msg {
        WsMessage::Text(text) => Some(text.as_str()),
        WsMessage::Binary(data) if data.first() == Some(&b'{') => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

async fn wait_for_setup_complete(ws_stream: &mut WsStream, session_id: &str) -> anyhow::Result<()> {
    while let Some(msg_result) = ws_stream.next().await {
        let msg = msg_result.map_err(|e| anyhow::anyhow!("WebSocket error before setupComplete: {e}"))?;
        if let WsMessage::Close(frame) = &msg {
            anyhow::bail!("Connection closed before setupComplete: {frame:?}");
        }
        match frame_json(&msg).map(parse_server_message) {
            Some(Ok(parsed)) if parsed.setup_complete => {
                tracing::info!(session_id = %session_id, "Gemini Live setup complete, ready to stream");
                return Ok(());
            }
            Some(Ok(parsed)) => {
                if let Some(error) = parsed.error {
                    anyhow::bail!("Gemini Live rejected setup: {error}");
                }
            }
            Some(Err(e)) => {
                tracing::debug!(session_id = %session_id, error = %e, "Unparseable frame during setup");
            }
            None => {
                tracing::debug!(session_id = %session_id, msg = ?msg, "Gemini Live setup phase: non-JSON frame");
            }
        }
    }
    anyhow::bail!("Stream ended before setupComplete")
}

async fn outbound_loop(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut ws_sender: futures_util::stream::SplitSink<WsStream, WsMessage>,
    session_id: String,
) {
    let mut audio_chunk_count: u64 = 0;

    while let Some(msg) = rx.recv().await {
        let json = match msg {
            OutboundMessage::Audio(data) => {
                audio_chunk_count += 1;
                if audio_chunk_count == 1 || audio_chunk_count.is_multiple_of(50) {
                    tracing::info!(
                        session_id = %session_id,
                        chunk = audio_chunk_count,
                        b64_len = data.len(),
                        "Sending audio chunk to Gemini"
                    );
                }
                serde_json::to_string(&build_audio_message(data))
            }
            OutboundMessage::ToolResponse(response) => {
                tracing::debug!(
                    session_id = %session_id,
                    call_id = %response.id,
                    tool = %response.name,
                    "Sending tool response"
                );
                serde_json::to_string(&build_tool_response_message(response))
            }
            OutboundMessage::Close => {
                if let Err(e) = ws_sender.send(WsMessage::Close(None)).await {
                    tracing::debug!(session_id = %session_id, error = %e, "Close frame not sent");
                }
                break;
            }
        };

        match json {
            Ok(json) => {
                if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                    tracing::warn!(session_id = %session_id, "WebSocket send failed, closing outbound loop");
                    break;
                }
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Failed to serialize outbound message");
            }
        }
    }

    tracing::debug!(session_id = %session_id, chunks = audio_chunk_count, "Outbound loop terminated");
}

async fn inbound_loop(
    mut ws_receiver: futures_util::stream::SplitStream<WsStream>,
    event_tx: mpsc::Sender<LinkEvent>,
    session_id: String,
) {
    let mut audio_response_count: u64 = 0;

    while let Some(msg_result) = ws_receiver.next().await {
        let msg = match msg_result {
            Ok(WsMessage::Close(frame)) => {
                tracing::info!(session_id = %session_id, close_frame = ?frame, "Gemini Live connection closed");
                let _ = event_tx.send(LinkEvent::Closed).await;
                return;
            }
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Gemini Live WebSocket error");
                let _ = event_tx.send(LinkEvent::Error(format!("WebSocket error: {e}"))).await;
                return;
            }
        };

        let Some(text) = frame_json(&msg) else {
            if let WsMessage::Binary(data) = &msg {
                tracing::warn!(
                    session_id = %session_id,
                    len = data.len(),
                    "Unexpected non-JSON binary frame from Gemini Live, skipping"
                );
            }
            continue;
        };

        let parsed = match parse_server_message(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Malformed Gemini Live message, skipping");
                continue;
            }
        };

        if !parsed.audio.is_empty() {
            audio_response_count += parsed.audio.len() as u64;
            if audio_response_count == 1 || audio_response_count.is_multiple_of(50) {
                tracing::info!(session_id = %session_id, audio_n = audio_response_count, "Gemini audio response");
            }
        }

        if event_tx.send(LinkEvent::Message(parsed)).await.is_err() {
            tracing::debug!(session_id = %session_id, "Event receiver dropped, closing inbound loop");
            return;
        }
    }

    let _ = event_tx.send(LinkEvent::Closed).await;
    tracing::debug!(session_id = %session_id, "Inbound loop terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::protocol::{build_setup_message, SessionSetup};

    fn setup() -> SetupMessage {
        build_setup_message(&SessionSetup {
            model: DEFAULT_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            system_instruction: String::new(),
            declarations: Vec::new(),
        })
    }

    #[tokio::test]
    async fn connect_without_key_fails_fast() {
        let connector = GeminiLiveConnector::new(None, GEMINI_LIVE_WS_URL, Duration::from_secs(1));
        let (_tx, rx) = mpsc::channel(1);
        let err = connector.connect("s1", setup(), rx).await.unwrap_err();
        assert!(err.to_string().contains("API key is required"));
    }

    #[tokio::test]
    async fn blank_key_counts_as_missing() {
        let connector =
            GeminiLiveConnector::new(Some("   ".into()), GEMINI_LIVE_WS_URL, Duration::from_secs(1));
        let (_tx, rx) = mpsc::channel(1);
        assert!(connector.connect("s2", setup(), rx).await.is_err());
    }

    #[test]
    fn binary_json_frames_are_read_as_text() {
        let frame = WsMessage::Binary(br#"{"setupComplete":{}}"#.to_vec().into());
        assert_eq!(frame_json(&frame), Some(r#"{"setupComplete":{}}"#));

        let audio = WsMessage::Binary(vec![0u8, 1, 2].into());
        assert_eq!(frame_json(&audio), None);

        let text = WsMessage::Text("{}".to_string().into());
        assert_eq!(frame_json(&text), Some("{}"));
    }
}
