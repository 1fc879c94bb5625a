//! Realtime token endpoint
//!
//! Exchanges the server's provider key for a short-lived client secret
//! scoped to one coaching session.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::{Value, json};

use super::ApiState;
use crate::realtime::token::realtime_ws_url;
use crate::validation::{SessionParams, validate_token_request};

/// Build token router
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route(
            "/api/realtime-token",
            post(realtime_token).fallback(method_not_allowed),
        )
        .with_state(state)
}

/// Token handed to the client
#[derive(Debug, Serialize)]
pub struct TokenBody {
    pub value: String,
    pub expires_at: Value,
    pub model: String,
    pub voice: String,
    pub ws_url: String,
}

async fn method_not_allowed() -> TokenError {
    TokenError::MethodNotAllowed
}

async fn realtime_token(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<TokenBody>, TokenError> {
    let api_key = state
        .config
        .api_server
        .openai_api_key
        .as_ref()
        .ok_or(TokenError::MissingCredentials)?;

    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let params = validate_token_request(&body).map_err(TokenError::InvalidInput)?;

    let realtime = &state.config.realtime;
    let payload = json!({
        "model": realtime.model,
        "modalities": ["audio", "text"],
        "instructions": coaching_instructions(&params),
        "voice": realtime.voice,
        "input_audio_format": "pcm16",
        "output_audio_format": "pcm16",
        "turn_detection": {
            "type": "server_vad",
            "threshold": 0.5,
            "prefix_padding_ms": 300,
            "silence_duration_ms": 500,
        },
    });

    let url = format!(
        "{}/v1/realtime/sessions",
        state.config.api_server.openai_base_url.trim_end_matches('/')
    );
    tracing::debug!(model = %realtime.model, mode = %params.mode, "minting realtime client secret");

    let response = state
        .http
        .post(&url)
        .bearer_auth(api_key.expose_secret())
        .json(&payload)
        .send()
        .await
        .map_err(|e| TokenError::Internal(e.to_string()))?;

    let status = response.status();
    let json: Value = response.json().await.unwrap_or_else(|_| json!({}));

    if !status.is_success() {
        let message = json
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| json.pointer("/error/code").and_then(Value::as_str))
            .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_string);
        tracing::warn!(status = status.as_u16(), error = %message, "provider rejected session request");
        return Err(TokenError::UpstreamRejected(message));
    }

    let Some((value, expires_at)) = extract_secret(&json) else {
        let keys = json
            .as_object()
            .map_or_else(|| "none".to_string(), |o| o.keys().cloned().collect::<Vec<_>>().join(", "));
        tracing::warn!(keys = %keys, "provider response had no client secret");
        return Err(TokenError::MissingSecret(keys));
    };

    tracing::info!(model = %realtime.model, "realtime client secret issued");
    Ok(Json(TokenBody {
        value,
        expires_at,
        model: realtime.model.clone(),
        voice: realtime.voice.clone(),
        ws_url: realtime_ws_url(&realtime.model),
    }))
}

/// Pull the secret out of either the flat or the nested response shape
fn extract_secret(json: &Value) -> Option<(String, Value)> {
    let value = json
        .get("value")
        .and_then(Value::as_str)
        .or_else(|| json.pointer("/client_secret/value").and_then(Value::as_str))
        .or_else(|| json.get("client_secret").and_then(Value::as_str))
        .filter(|v| !v.is_empty())?;

    let expires_at = [
        json.get("expires_at"),
        json.pointer("/client_secret/expires_at"),
        json.get("expires_at_unix"),
    ]
    .into_iter()
    .flatten()
    .find(|v| !v.is_null() && *v != &json!(0) && v.as_str() != Some(""))?;

    Some((value.to_string(), expires_at.clone()))
}

/// Persona and feedback format the coach follows
#[must_use]
pub fn coaching_instructions(params: &SessionParams) -> String {
    [
        "You are a Bollywood/Mumbai acting coach and casting director.",
        "Indian English is expected; Hinglish is allowed. Do NOT penalize Hinglish unless clarity suffers.",
        "Be warm, premium, and direct. Keep feedback short and actionable.",
        "After each user take, respond with spoken feedback in this structure:",
        "1) one quick praise (max 1 sentence),",
        "2) one correction only (pick the highest-impact issue),",
        "3) one micro-drill (10-20 seconds),",
        "4) a 'Take 2' direction (1 sentence).",
        "Avoid long monologues. Keep total response under ~12 seconds.",
        format!(
            "Current session: Mode={}, Duration={}s, Difficulty={}.",
            params.mode, params.duration, params.difficulty
        )
        .as_str(),
    ]
    .join("\n")
}

/// Token endpoint errors
#[derive(Debug)]
pub enum TokenError {
    MethodNotAllowed,
    MissingCredentials,
    InvalidInput(Vec<String>),
    UpstreamRejected(String),
    MissingSecret(String),
    Internal(String),
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            code: Option<&'static str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            message: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<Vec<String>>,
        }

        let (status, body) = match self {
            Self::MethodNotAllowed => (
                StatusCode::METHOD_NOT_ALLOWED,
                ErrorResponse {
                    error: "Method not allowed",
                    code: None,
                    message: None,
                    details: None,
                },
            ),
            Self::MissingCredentials => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "Server misconfigured: missing OPENAI_API_KEY",
                    code: Some("missing_credentials"),
                    message: None,
                    details: None,
                },
            ),
            Self::InvalidInput(details) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: "Invalid input",
                    code: None,
                    message: None,
                    details: Some(details),
                },
            ),
            Self::UpstreamRejected(message) => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse {
                    error: "Failed to create Realtime client secret",
                    code: None,
                    details: Some(vec![message.clone()]),
                    message: Some(message),
                },
            ),
            Self::MissingSecret(keys) => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse {
                    error: "Realtime token response missing client_secret",
                    code: None,
                    message: Some(format!(
                        "OpenAI returned a response but it had no value/expires_at (or client_secret.value/expires_at). \
                         Your account may need Realtime API access, or the API response format may have changed. \
                         Response keys: {keys}"
                    )),
                    details: Some(vec!["Unexpected response from OpenAI.".to_string()]),
                },
            ),
            Self::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "Realtime token failed",
                    code: None,
                    message: Some(message),
                    details: None,
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Mode;

    #[test]
    fn instructions_end_with_session_line() {
        let text = coaching_instructions(&SessionParams::new(Mode::AuditionSlate, 30, "Easy"));
        assert!(text.starts_with("You are a Bollywood/Mumbai acting coach"));
        assert!(text.ends_with("Current session: Mode=Audition Slate, Duration=30s, Difficulty=Easy."));
        assert_eq!(text.lines().count(), 10);
    }

    #[test]
    fn secret_from_nested_shape() {
        let json = json!({ "id": "sess_1", "client_secret": { "value": "ek_1", "expires_at": 1_700_000_000 } });
        assert_eq!(
            extract_secret(&json),
            Some(("ek_1".to_string(), json!(1_700_000_000)))
        );
    }

    #[test]
    fn secret_from_flat_shape() {
        let json = json!({ "value": "ek_2", "expires_at_unix": 42 });
        assert_eq!(extract_secret(&json), Some(("ek_2".to_string(), json!(42))));
    }

    #[test]
    fn secret_missing_parts() {
        assert_eq!(extract_secret(&json!({ "value": "ek_3" })), None);
        assert_eq!(extract_secret(&json!({ "expires_at": 5 })), None);
        assert_eq!(extract_secret(&json!({ "value": "", "expires_at": 5 })), None);
    }
}
