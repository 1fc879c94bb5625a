//! Error types for the coaching bridge

use thiserror::Error;

/// Result type alias for coaching bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the coaching bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or unusable server credential
    #[error("{0}")]
    Config(String),

    /// Malformed request parameters, one entry per violated constraint
    #[error("invalid input: {}", .0.join(" "))]
    Validation(Vec<String>),

    /// Remote service rejected the request or returned an unusable shape
    #[error("{0}")]
    Upstream(String),

    /// Socket-level failure
    #[error("{0}")]
    Transport(String),

    /// Microphone or speaker unavailable
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket protocol error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Short hint shown next to a failure notice
    #[must_use]
    pub const fn hint(&self) -> &'static str {
        match self {
            Self::Audio(_) => {
                "Check that microphone access is allowed and an input device is connected."
            }
            Self::Validation(_) => "Pick a listed mode, a 30/60/90 second duration and a difficulty.",
            Self::Transport(_) | Self::WebSocket(_) => {
                "Check your network connection, then start the session again."
            }
            _ => {
                "Check that OPENAI_API_KEY is set on the server and your OpenAI account has Realtime API access."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_every_violation() {
        let err = Error::Validation(vec![
            "duration must be 30, 60, or 90.".to_string(),
            "difficulty must be a string (e.g., Easy/Medium/Hard).".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.contains("duration"));
        assert!(text.contains("difficulty"));
    }

    #[test]
    fn config_errors_surface_verbatim() {
        let err = Error::Config("Server misconfigured: missing OPENAI_API_KEY".to_string());
        assert_eq!(err.to_string(), "Server misconfigured: missing OPENAI_API_KEY");
    }

    #[test]
    fn audio_errors_hint_at_permissions() {
        assert!(Error::Audio("denied".into()).hint().contains("microphone"));
    }
}
