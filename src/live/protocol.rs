//! Wire messages for the Gemini Live `BidiGenerateContent` stream.
//!
//! ## Protocol Overview
//!
//! 1. **Setup**: the first frame carries the model, audio-only responses, both
//!    transcription streams, the agent's tools, persona, and voice
//! 2. **Stream**: microphone audio as `realtimeInput.mediaChunks`
//! 3. **Receive**: `serverContent` (speech, transcripts, turn and
//!    interruption markers) and `toolCall` requests
//! 4. **Answer**: one `toolResponse` per function call
//!
//! Google sends JSON inside Binary frames as well as Text frames, so the
//! connector hands both to [`parse_server_message`].

use serde::Serialize;
use serde_json::Value;

use crate::audio::codec::INPUT_AUDIO_MIME;
use crate::tools::{FunctionDeclaration, FunctionResponse, ToolCall};

// ── Setup message ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSet>,
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechConfig {
    #[serde(rename = "voiceConfig")]
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceConfig {
    #[serde(rename = "prebuiltVoiceConfig")]
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrebuiltVoiceConfig {
    #[serde(rename = "voiceName")]
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSet {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Enables a transcription stream. Serializes as `{}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionConfig {}

/// Session parameters that end up in the setup frame.
#[derive(Debug, Clone)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub declarations: Vec<FunctionDeclaration>,
}

/// Build the first frame of a call session.
pub fn build_setup_message(session: &SessionSetup) -> SetupMessage {
    let model = if session.model.starts_with("models/") {
        session.model.clone()
    } else {
        format!("models/{}", session.model)
    };

    SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: session.voice.clone(),
                        },
                    },
                }),
            },
            system_instruction: (!session.system_instruction.is_empty()).then(|| SystemInstruction {
                parts: vec![TextPart {
                    text: session.system_instruction.clone(),
                }],
            }),
            tools: if session.declarations.is_empty() {
                Vec::new()
            } else {
                vec![ToolSet {
                    function_declarations: session.declarations.clone(),
                }]
            },
            input_audio_transcription: TranscriptionConfig {},
            output_audio_transcription: TranscriptionConfig {},
        },
    }
}

// ── Client → server messages ──────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RealtimeInputMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize)]
pub struct MediaChunk {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

/// Wrap an already base64-encoded 16kHz PCM frame.
///
/// Wire format: `{"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "<base64>"}]}}`
pub fn build_audio_message(data_b64: String) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: INPUT_AUDIO_MIME.to_string(),
                data: data_b64,
            }],
        },
    }
}

#[derive(Debug, Serialize)]
pub struct ToolResponseMessage {
    #[serde(rename = "toolResponse")]
    pub tool_response: ToolResponsePayload,
}

#[derive(Debug, Serialize)]
pub struct ToolResponsePayload {
    #[serde(rename = "functionResponses")]
    pub function_responses: FunctionResponse,
}

/// Wire format: `{"toolResponse": {"functionResponses": {"id", "name", "response": {"result"|"error": ..}}}}`
pub fn build_tool_response_message(response: FunctionResponse) -> ToolResponseMessage {
    ToolResponseMessage {
        tool_response: ToolResponsePayload {
            function_responses: response,
        },
    }
}

// ── Server → client messages ──────────────────────────────────────

/// Everything one server frame can carry, in the fields the call
/// controller acts on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMessage {
    pub setup_complete: bool,
    pub interrupted: bool,
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
    pub turn_complete: bool,
    /// Base64 PCM payloads from `modelTurn.parts[].inlineData`, in order.
    pub audio: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub error: Option<String>,
}

fn transcription_text(value: &Value, key: &str) -> Option<String> {
    let from = |v: &Value| {
        v.get(key)
            .and_then(|t| t.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    // Accept both nested (`serverContent.inputTranscription`) and top-level placement.
    value
        .get("serverContent")
        .and_then(|c| from(c))
        .or_else(|| from(value))
}

/// Parse one JSON frame from the Live server.
pub fn parse_server_message(json_text: &str) -> Result<ServerMessage, serde_json::Error> {
    let value: Value = serde_json::from_str(json_text)?;
    let mut msg = ServerMessage {
        setup_complete: value.get("setupComplete").is_some(),
        input_transcription: transcription_text(&value, "inputTranscription"),
        output_transcription: transcription_text(&value, "outputTranscription"),
        ..ServerMessage::default()
    };

    if let Some(content) = value.get("serverContent") {
        msg.interrupted = content.get("interrupted").and_then(Value::as_bool) == Some(true);
        msg.turn_complete = content.get("turnComplete").and_then(Value::as_bool) == Some(true);

        if let Some(parts) = content.pointer("/modelTurn/parts").and_then(Value::as_array) {
            for part in parts {
                if let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) {
                    msg.audio.push(data.to_string());
                }
            }
        }
    }

    if let Some(calls) = value
        .pointer("/toolCall/functionCalls")
        .and_then(Value::as_array)
    {
        // A call without a name is kept so it still gets an error response.
        for call in calls {
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
            msg.tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: name.to_string(),
                args: call
                    .get("args")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            });
        }
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown server error");
        msg.error = Some(message.to_string());
    }

    Ok(msg)
}
