//! Short-lived realtime credentials
//!
//! The long-lived provider key stays on the backend. Clients ask the backend
//! for a [`Token`] scoped to one session and dial the socket with it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use crate::validation::SessionParams;
use crate::{Error, Result};

/// Realtime socket endpoint used when the backend does not name one
pub const DEFAULT_WS_URL: &str = "wss://api.openai.com/v1/realtime?model=gpt-realtime";

/// Socket endpoint for a model
#[must_use]
pub fn realtime_ws_url(model: &str) -> String {
    format!(
        "wss://api.openai.com/v1/realtime?model={}",
        urlencoding::encode(model)
    )
}

/// Ephemeral session credential
#[derive(Debug)]
pub struct Token {
    value: SecretString,
    /// When the credential stops being accepted; `None` if the backend did not say
    pub expires_at: Option<DateTime<Utc>>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub ws_url: String,
}

/// Token as the backend returns it
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub expires_at: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub ws_url: Option<String>,
}

impl Token {
    /// Build a token directly
    #[must_use]
    pub fn new(
        value: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
        ws_url: impl Into<String>,
    ) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at,
            model: None,
            voice: None,
            ws_url: ws_url.into(),
        }
    }

    /// Convert a backend response
    ///
    /// # Errors
    ///
    /// Returns error if the response has no token value
    pub fn from_response(response: TokenResponse) -> Result<Self> {
        let value = response
            .value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Upstream("Missing realtime token value.".to_string()))?;

        let expires_at = response.expires_at.as_ref().and_then(parse_expiry);
        if response.expires_at.is_some() && expires_at.is_none() {
            tracing::warn!("unreadable token expiry, treating as unknown");
        }

        Ok(Self {
            value: SecretString::from(value),
            expires_at,
            model: response.model,
            voice: response.voice,
            ws_url: response
                .ws_url
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
        })
    }

    /// The bearer credential. Never log this.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Whether the token had expired at `now`
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Check the token can still open a socket
    ///
    /// # Errors
    ///
    /// Returns error if the value is empty or the token has expired
    pub fn ensure_usable(&self) -> Result<()> {
        if self.expose().is_empty() {
            return Err(Error::Upstream("Missing realtime token value.".to_string()));
        }
        if self.is_expired_at(Utc::now()) {
            return Err(Error::Upstream("Realtime token expired.".to_string()));
        }
        Ok(())
    }
}

/// Accepts unix seconds (number or numeric string) or RFC 3339
fn parse_expiry(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| {
                #[allow(clippy::cast_possible_truncation)]
                n.as_f64().map(|f| f as i64)
            })
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|at| at.with_timezone(&Utc))
            }),
        _ => None,
    }
}

/// Source of session credentials
#[async_trait]
pub trait TokenBroker: Send + Sync {
    /// Obtain a credential for one session
    ///
    /// # Errors
    ///
    /// Returns error if the parameters are invalid or no credential could be obtained
    async fn fetch_token(&self, params: &SessionParams) -> Result<Token>;
}

/// Token broker backed by the coaching backend's HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpTokenBroker {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenBroker {
    /// Create a broker that posts to `url`
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Create a broker sharing an existing HTTP client
    #[must_use]
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TokenBroker for HttpTokenBroker {
    async fn fetch_token(&self, params: &SessionParams) -> Result<Token> {
        params.validate().map_err(Error::Validation)?;

        tracing::debug!(url = %self.url, mode = %params.mode, "requesting realtime token");
        let response = self.client.post(&self.url).json(params).send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if !status.is_success() {
            let err = classify_failure(status, &body);
            tracing::warn!(status = status.as_u16(), error = %err, "token request failed");
            return Err(err);
        }

        let wire: TokenResponse = serde_json::from_value(body).unwrap_or_default();
        Token::from_response(wire)
    }
}

/// Map a failed backend response onto the error taxonomy
fn classify_failure(status: StatusCode, body: &Value) -> Error {
    let error_text = body.get("error").and_then(Value::as_str);
    let message = body.get("message").and_then(Value::as_str);

    if status == StatusCode::BAD_REQUEST {
        let details: Vec<String> = body
            .get("details")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if details.is_empty() {
            return Error::Validation(vec![error_text.unwrap_or("Invalid input").to_string()]);
        }
        return Error::Validation(details);
    }

    let missing_credentials = body.get("code").and_then(Value::as_str) == Some("missing_credentials")
        || error_text.is_some_and(|t| t.contains("misconfigured"));
    if status == StatusCode::INTERNAL_SERVER_ERROR && missing_credentials {
        return Error::Config(error_text.unwrap_or("Server misconfigured").to_string());
    }

    Error::Upstream(
        message
            .or(error_text)
            .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_string),
    )
}
