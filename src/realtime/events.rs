//! Realtime socket event taxonomy
//!
//! Inbound frames are JSON objects discriminated by `type`. Only the events
//! the coaching session reacts to are modelled; everything else parses as
//! [`ServerEvent::Other`].

use serde::{Deserialize, Serialize};

/// Error payload attached to an `error` event
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Event received from the remote session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The session is established
    #[serde(rename = "session.created")]
    SessionCreated,

    /// Remote error; does not end the session by itself
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<ErrorDetail>,
    },

    /// Partial transcription of the user's speech
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    UserTranscriptDelta {
        #[serde(default)]
        delta: Option<String>,
    },

    /// Final transcription of the user's speech
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    UserTranscriptCompleted {
        #[serde(default)]
        transcript: Option<String>,
    },

    /// Partial transcript of what the coach is saying
    #[serde(
        rename = "response.output_audio_transcript.delta",
        alias = "response.audio_transcript.delta"
    )]
    AssistantTranscriptDelta {
        #[serde(default)]
        delta: Option<String>,
    },

    /// The coach's transcript for this response is complete
    #[serde(
        rename = "response.output_audio_transcript.done",
        alias = "response.audio_transcript.done"
    )]
    AssistantTranscriptDone,

    /// Base64 PCM16 chunk of synthesized speech
    #[serde(rename = "response.output_audio.delta", alias = "response.audio.delta")]
    AssistantAudioDelta {
        #[serde(default)]
        delta: Option<String>,
        #[serde(default)]
        audio: Option<String>,
    },

    /// The turn is complete
    #[serde(rename = "response.done")]
    TurnComplete,

    /// Any event the session does not react to
    #[serde(other)]
    Other,
}

impl ServerEvent {
    /// Parse a text frame, returning `None` for anything that is not a typed JSON object
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::trace!(error = %e, "ignoring unparseable server frame");
                None
            }
        }
    }

    /// Audio payload of an audio delta, if it carries a non-empty one
    #[must_use]
    pub fn audio_payload(&self) -> Option<&str> {
        match self {
            Self::AssistantAudioDelta { delta, audio } => delta
                .as_deref()
                .filter(|s| !s.is_empty())
                .or_else(|| audio.as_deref().filter(|s| !s.is_empty())),
            _ => None,
        }
    }

    /// Short label for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SessionCreated => "session_created",
            Self::Error { .. } => "error",
            Self::UserTranscriptDelta { .. } => "user_transcript_delta",
            Self::UserTranscriptCompleted { .. } => "user_transcript_completed",
            Self::AssistantTranscriptDelta { .. } => "assistant_transcript_delta",
            Self::AssistantTranscriptDone => "assistant_transcript_done",
            Self::AssistantAudioDelta { .. } => "assistant_audio_delta",
            Self::TurnComplete => "turn_complete",
            Self::Other => "other",
        }
    }
}

/// Event sent to the remote session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Append captured PCM16 audio (base64) to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

impl ClientEvent {
    /// Serialize to a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_events() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"session.created","session":{"id":"sess_1"}}"#),
            Some(ServerEvent::SessionCreated)
        );
        assert_eq!(
            ServerEvent::parse(r#"{"type":"response.done","response":{"status":"completed"}}"#),
            Some(ServerEvent::TurnComplete)
        );
        assert_eq!(
            ServerEvent::parse(
                r#"{"type":"conversation.item.input_audio_transcription.delta","item_id":"i1","delta":"Namaste"}"#
            ),
            Some(ServerEvent::UserTranscriptDelta {
                delta: Some("Namaste".into())
            })
        );
    }

    #[test]
    fn parses_error_detail() {
        let event = ServerEvent::parse(
            r#"{"type":"error","error":{"type":"invalid_request_error","code":"bad","message":"Nope"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::Error {
                error: Some(ErrorDetail {
                    message: Some("Nope".into()),
                    code: Some("bad".into()),
                })
            }
        );
    }

    #[test]
    fn accepts_beta_event_names() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"response.audio_transcript.delta","delta":"hi"}"#),
            Some(ServerEvent::AssistantTranscriptDelta {
                delta: Some("hi".into())
            })
        );
        assert_eq!(
            ServerEvent::parse(r#"{"type":"response.audio.delta","delta":"AAA="}"#)
                .and_then(|e| e.audio_payload().map(str::to_string)),
            Some("AAA=".to_string())
        );
    }

    #[test]
    fn unknown_types_are_other() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"rate_limits.updated","rate_limits":[]}"#),
            Some(ServerEvent::Other)
        );
    }

    #[test]
    fn untyped_or_invalid_frames_are_ignored() {
        assert_eq!(ServerEvent::parse("not json"), None);
        assert_eq!(ServerEvent::parse(r#"{"delta":"x"}"#), None);
        assert_eq!(ServerEvent::parse("[1,2]"), None);
    }

    #[test]
    fn audio_payload_falls_back_to_audio_field() {
        let event = ServerEvent::AssistantAudioDelta {
            delta: Some(String::new()),
            audio: Some("AQI=".into()),
        };
        assert_eq!(event.audio_payload(), Some("AQI="));
        let empty = ServerEvent::AssistantAudioDelta {
            delta: None,
            audio: None,
        };
        assert_eq!(empty.audio_payload(), None);
    }

    #[test]
    fn append_frame_shape() {
        let json = ClientEvent::InputAudioBufferAppend {
            audio: "AAE=".into(),
        }
        .to_json()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "input_audio_buffer.append");
        assert_eq!(value["audio"], "AAE=");
    }
}
