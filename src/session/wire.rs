//! JSON messages of the bidirectional streaming endpoint
//!
//! Outbound messages are externally tagged (`{"setup": {...}}`); inbound
//! messages carry one or more optional top-level fields and are flattened into
//! an ordered list of `ServerEvent`s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::AudioFrame;
use crate::config::PersonaConfig;
use crate::tools::{ToolDeclaration, ToolRequest, ToolResult};
use crate::{Error, Result};

/// Message sent to the endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Session setup: model, persona, voice and advertised tools
    #[must_use]
    pub fn setup(model: &str, persona: &PersonaConfig, tools: Vec<ToolDeclaration>) -> Self {
        let tools = if tools.is_empty() {
            Vec::new()
        } else {
            vec![ToolSet {
                function_declarations: tools,
            }]
        };

        Self::Setup(Setup {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: persona.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: (!persona.instructions.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part::text(&persona.instructions)],
            }),
            tools,
            output_audio_transcription: Some(Empty {}),
        })
    }

    /// One captured audio frame
    #[must_use]
    pub fn audio(frame: &AudioFrame) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: frame.mime_type(),
                data: frame.payload(),
            }],
        })
    }

    /// A complete user turn of text
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(text)],
            }],
            turn_complete: true,
        })
    }

    /// Answer to a tool call
    #[must_use]
    pub fn tool_response(result: ToolResult) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: vec![result],
        })
    }

    /// Serialize to the JSON text sent on the wire
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Short name for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::RealtimeInput(_) => "realtimeInput",
            Self::ClientContent(_) => "clientContent",
            Self::ToolResponse(_) => "toolResponse",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Empty>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<ToolDeclaration>,
}

/// Serializes as `{}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<ToolResult>,
}

/// Role-tagged list of parts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Text or inline media
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

/// Base64 payload with its MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Message received from the endpoint
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
    #[serde(default)]
    pub error: Option<ServerError>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(default)]
    pub function_calls: Vec<ToolRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

/// One thing that happened, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    Audio { mime_type: String, data: String },
    Text { text: String, transcript: bool },
    Interrupted,
    TurnComplete,
    ToolCall(ToolRequest),
    ToolCallCancellation(Vec<String>),
    GoAway { time_left: Option<String> },
    Error { code: Option<i64>, message: String },
}

impl ServerMessage {
    /// Parse a JSON frame
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolViolation` if the frame is not a server message
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::ProtocolViolation(format!("unparseable server message: {e}")))
    }

    /// Flatten into events, preserving the order within the message
    #[must_use]
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    events.push(ServerEvent::Text {
                        text,
                        transcript: false,
                    });
                }
                if let Some(blob) = part.inline_data {
                    events.push(ServerEvent::Audio {
                        mime_type: blob.mime_type,
                        data: blob.data,
                    });
                }
            }

            if let Some(transcription) = content.output_transcription
                && !transcription.text.is_empty()
            {
                events.push(ServerEvent::Text {
                    text: transcription.text,
                    transcript: true,
                });
            }

            if content.interrupted {
                events.push(ServerEvent::Interrupted);
            }
            if content.turn_complete {
                events.push(ServerEvent::TurnComplete);
            }
        }

        if let Some(call) = self.tool_call {
            events.extend(call.function_calls.into_iter().map(ServerEvent::ToolCall));
        }

        if let Some(cancellation) = self.tool_call_cancellation {
            events.push(ServerEvent::ToolCallCancellation(cancellation.ids));
        }

        if let Some(go_away) = self.go_away {
            events.push(ServerEvent::GoAway {
                time_left: go_away.time_left,
            });
        }

        if let Some(error) = self.error {
            events.push(ServerEvent::Error {
                code: error.code,
                message: error.message,
            });
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn persona() -> PersonaConfig {
        PersonaConfig {
            instructions: "Be brief.".to_string(),
            voice: "Puck".to_string(),
        }
    }

    #[test]
    fn setup_message_shape() {
        let tools = vec![ToolDeclaration {
            name: "update_mode".to_string(),
            description: "Switch mode".to_string(),
            parameters: json!({"type": "OBJECT"}),
        }];
        let value = serde_json::to_value(ClientMessage::setup("models/x", &persona(), tools)).unwrap();

        assert_eq!(value["setup"]["model"], "models/x");
        assert_eq!(
            value["setup"]["generationConfig"]["responseModalities"],
            json!(["AUDIO"])
        );
        assert_eq!(
            value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Puck"
        );
        assert_eq!(
            value["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be brief."
        );
        assert_eq!(
            value["setup"]["tools"][0]["functionDeclarations"][0]["name"],
            "update_mode"
        );
        assert_eq!(value["setup"]["outputAudioTranscription"], json!({}));
    }

    #[test]
    fn setup_without_tools_omits_field() {
        let value = serde_json::to_value(ClientMessage::setup("m", &persona(), Vec::new())).unwrap();
        assert!(value["setup"].get("tools").is_none());
    }

    #[test]
    fn audio_message_shape() {
        let frame = AudioFrame {
            sequence: 3,
            sample_rate: 16_000,
            samples: vec![1, -2],
        };
        let value = serde_json::to_value(ClientMessage::audio(&frame)).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [
                {"mimeType": "audio/pcm;rate=16000", "data": "AQD+/w=="}
            ]}})
        );
    }

    #[test]
    fn text_and_tool_response_shape() {
        let value = serde_json::to_value(ClientMessage::text("hi")).unwrap();
        assert_eq!(
            value,
            json!({"clientContent": {
                "turns": [{"role": "user", "parts": [{"text": "hi"}]}],
                "turnComplete": true
            }})
        );

        let result = ToolResult::success("c1", "update_mode", json!({"mode": "STANDARD"}));
        let value = serde_json::to_value(ClientMessage::tool_response(result)).unwrap();
        assert_eq!(
            value,
            json!({"toolResponse": {"functionResponses": [
                {"id": "c1", "name": "update_mode", "response": {"result": {"mode": "STANDARD"}}}
            ]}})
        );
    }

    #[test]
    fn server_content_events_keep_order() {
        let message = ServerMessage::parse(
            br#"{"serverContent": {
                "modelTurn": {"parts": [
                    {"text": "[SENTIMENT: POSITIVE] Up 4%"},
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAA="}}
                ]},
                "turnComplete": true
            }}"#,
        )
        .unwrap();

        let events = message.into_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ServerEvent::Text { transcript: false, .. }));
        assert!(matches!(&events[1], ServerEvent::Audio { mime_type, .. } if mime_type == "audio/pcm;rate=24000"));
        assert_eq!(events[2], ServerEvent::TurnComplete);
    }

    #[test]
    fn tool_call_and_setup_complete() {
        let events = ServerMessage::parse(br#"{"setupComplete": {}}"#)
            .unwrap()
            .into_events();
        assert_eq!(events, vec![ServerEvent::SetupComplete]);

        let events = ServerMessage::parse(
            br#"{"toolCall": {"functionCalls": [
                {"id": "a", "name": "update_mode", "args": {"mode": "FOCUS_SHIELD"}},
                {"id": "b", "name": "create_widget"}
            ]}}"#,
        )
        .unwrap()
        .into_events();

        assert_eq!(events.len(), 2);
        let ServerEvent::ToolCall(first) = &events[0] else {
            panic!("expected tool call");
        };
        assert_eq!(first.args["mode"], "FOCUS_SHIELD");
        let ServerEvent::ToolCall(second) = &events[1] else {
            panic!("expected tool call");
        };
        assert_eq!(second.args, Value::Null);
    }

    #[test]
    fn transcription_interrupt_and_go_away() {
        let events = ServerMessage::parse(
            br#"{"serverContent": {"outputTranscription": {"text": "hello"}, "interrupted": true},
                "goAway": {"timeLeft": "10s"}}"#,
        )
        .unwrap()
        .into_events();

        assert_eq!(
            events,
            vec![
                ServerEvent::Text {
                    text: "hello".to_string(),
                    transcript: true
                },
                ServerEvent::Interrupted,
                ServerEvent::GoAway {
                    time_left: Some("10s".to_string())
                },
            ]
        );
    }

    #[test]
    fn garbage_is_protocol_violation() {
        assert!(matches!(
            ServerMessage::parse(b"not json"),
            Err(Error::ProtocolViolation(_))
        ));
    }
}
