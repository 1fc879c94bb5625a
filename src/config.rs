//! Configuration management for the coaching bridge

use std::time::Duration;

use secrecy::SecretString;

/// Default realtime model
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-realtime";

/// Default realtime voice
pub const DEFAULT_REALTIME_VOICE: &str = "marin";

/// Default upstream API base URL
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Default port for the token backend
pub const DEFAULT_PORT: u16 = 3000;

/// Default wait before a socket error is reported
pub const DEFAULT_TRANSPORT_DEBOUNCE_MS: u64 = 1500;

/// Default minimum lead time for scheduled playback
pub const DEFAULT_PLAYBACK_LOOKAHEAD_MS: u64 = 20;

/// Coaching bridge configuration
#[derive(Debug)]
pub struct Config {
    /// Token backend configuration
    pub api_server: ApiServerConfig,

    /// Realtime model selection
    pub realtime: RealtimeConfig,

    /// Session controller configuration
    pub client: ClientConfig,
}

/// Token backend configuration
#[derive(Debug)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Long-lived provider key (from `OPENAI_API_KEY`), never sent to clients
    pub openai_api_key: Option<SecretString>,

    /// Provider API base URL
    pub openai_base_url: String,
}

/// Realtime model selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Model identifier (e.g. "gpt-realtime")
    pub model: String,

    /// Voice identifier (e.g. "marin")
    pub voice: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: DEFAULT_REALTIME_VOICE.to_string(),
        }
    }
}

/// Session controller configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Token endpoint URL
    pub token_url: String,

    /// How long a socket may stay unopened after an error before it is reported
    pub transport_debounce: Duration,

    /// Minimum lead time between now and a chunk's scheduled start
    pub playback_lookahead: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token_url: default_token_url(DEFAULT_PORT),
            transport_debounce: Duration::from_millis(DEFAULT_TRANSPORT_DEBOUNCE_MS),
            playback_lookahead: Duration::from_millis(DEFAULT_PLAYBACK_LOOKAHEAD_MS),
        }
    }
}

fn default_token_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/api/realtime-token")
}

impl Config {
    /// Load configuration from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Empty values are treated as unset.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = get("COACH_PORT")
            .or_else(|| get("PORT"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let api_server = ApiServerConfig {
            port,
            openai_api_key: get("OPENAI_API_KEY").map(SecretString::from),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        };

        let realtime = RealtimeConfig {
            model: get("REALTIME_MODEL").unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string()),
            voice: get("REALTIME_VOICE").unwrap_or_else(|| DEFAULT_REALTIME_VOICE.to_string()),
        };

        let millis = |key: &str, default: u64| {
            let value = get(key).and_then(|s| s.parse().ok()).unwrap_or(default);
            Duration::from_millis(value)
        };

        let client = ClientConfig {
            token_url: get("COACH_TOKEN_URL").unwrap_or_else(|| default_token_url(port)),
            transport_debounce: millis("COACH_TRANSPORT_DEBOUNCE_MS", DEFAULT_TRANSPORT_DEBOUNCE_MS),
            playback_lookahead: millis("COACH_PLAYBACK_LOOKAHEAD_MS", DEFAULT_PLAYBACK_LOOKAHEAD_MS),
        };

        if api_server.openai_api_key.is_none() {
            tracing::debug!("OPENAI_API_KEY not set; token backend will report misconfiguration");
        }

        Self {
            api_server,
            realtime,
            client,
        }
    }
}
