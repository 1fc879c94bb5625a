//! Token backend integration tests

use std::sync::{Arc, Mutex};

use audition_coach::api::ApiServer;
use audition_coach::realtime::token::{HttpTokenBroker, TokenBroker};
use audition_coach::{Error, Mode, SessionParams};
use axum::{
    Json, Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    routing::post,
};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{config_from, serve};

/// Send one request through the backend router
async fn call(server: &ApiServer, method: &str, body: Value) -> (StatusCode, Value) {
    let response = server
        .router()
        .oneshot(
            Request::builder()
                .method(method)
                .uri("/api/realtime-token")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn valid_body() -> Value {
    json!({ "mode": "Bollywood Romance", "duration": 60, "difficulty": "Medium" })
}

/// Fake provider that records the authorization header and request body
async fn fake_provider(status: StatusCode, reply: Value) -> (String, Arc<Mutex<Vec<(String, Value)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    let router = Router::new().route(
        "/v1/realtime/sessions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let recorder = Arc::clone(&recorder);
            let reply = reply.clone();
            async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                recorder.lock().unwrap().push((auth, body));
                (status, Json(reply))
            }
        }),
    );
    (serve(router).await, seen)
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = ApiServer::new(config_from(&[]));
    let response = server
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_token_rejects_other_methods() {
    let server = ApiServer::new(config_from(&[("OPENAI_API_KEY", "sk-test")]));
    let (status, json) = call(&server, "GET", Value::Null).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json["error"], "Method not allowed");
}

#[tokio::test]
async fn test_token_without_server_key() {
    let server = ApiServer::new(config_from(&[]));
    let (status, json) = call(&server, "POST", valid_body()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Server misconfigured: missing OPENAI_API_KEY");
    assert_eq!(json["code"], "missing_credentials");
}

#[tokio::test]
async fn test_token_invalid_input_lists_details() {
    let server = ApiServer::new(config_from(&[("OPENAI_API_KEY", "sk-test")]));
    let (status, json) = call(
        &server,
        "POST",
        json!({ "mode": "Opera", "duration": 45, "difficulty": "Hard" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid input");
    let details = json["details"].as_array().unwrap();
    assert_eq!(details.len(), 2);
    assert_eq!(details[1], "duration must be 30, 60, or 90.");
}

#[tokio::test]
async fn test_token_minted_from_provider() {
    let (base, seen) = fake_provider(
        StatusCode::OK,
        json!({
            "id": "sess_123",
            "object": "realtime.session",
            "client_secret": { "value": "ek_live_1", "expires_at": 1_900_000_000 },
        }),
    )
    .await;
    let server = ApiServer::new(config_from(&[
        ("OPENAI_API_KEY", "sk-server"),
        ("OPENAI_BASE_URL", base.as_str()),
        ("REALTIME_VOICE", "verse"),
    ]));

    let (status, json) = call(&server, "POST", valid_body()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["value"], "ek_live_1");
    assert_eq!(json["expires_at"], 1_900_000_000);
    assert_eq!(json["model"], "gpt-realtime");
    assert_eq!(json["voice"], "verse");
    assert_eq!(json["ws_url"], "wss://api.openai.com/v1/realtime?model=gpt-realtime");

    let seen = seen.lock().unwrap();
    let (auth, payload) = &seen[0];
    assert_eq!(auth, "Bearer sk-server");
    assert_eq!(payload["input_audio_format"], "pcm16");
    assert_eq!(payload["turn_detection"]["type"], "server_vad");
    assert_eq!(payload["turn_detection"]["silence_duration_ms"], 500);
    assert!(
        payload["instructions"]
            .as_str()
            .unwrap()
            .contains("Mode=Bollywood Romance, Duration=60s, Difficulty=Medium.")
    );
}

#[tokio::test]
async fn test_token_provider_rejection() {
    let (base, _) = fake_provider(
        StatusCode::UNAUTHORIZED,
        json!({ "error": { "message": "Incorrect API key provided", "code": "invalid_api_key" } }),
    )
    .await;
    let server = ApiServer::new(config_from(&[
        ("OPENAI_API_KEY", "sk-bad"),
        ("OPENAI_BASE_URL", base.as_str()),
    ]));

    let (status, json) = call(&server, "POST", valid_body()).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"], "Failed to create Realtime client secret");
    assert_eq!(json["message"], "Incorrect API key provided");
    assert_eq!(json["details"][0], "Incorrect API key provided");
}

#[tokio::test]
async fn test_token_provider_missing_secret() {
    let (base, _) = fake_provider(StatusCode::OK, json!({ "id": "sess_1", "model": "gpt-realtime" })).await;
    let server = ApiServer::new(config_from(&[
        ("OPENAI_API_KEY", "sk-test"),
        ("OPENAI_BASE_URL", base.as_str()),
    ]));

    let (status, json) = call(&server, "POST", valid_body()).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"], "Realtime token response missing client_secret");
    assert!(json["message"].as_str().unwrap().contains("Response keys: id, model"));
}

#[tokio::test]
async fn test_broker_surfaces_misconfiguration_verbatim() {
    let server = ApiServer::new(config_from(&[]));
    let base = serve(server.router()).await;
    let broker = HttpTokenBroker::new(format!("{base}/api/realtime-token"));

    let err = broker
        .fetch_token(&SessionParams::new(Mode::ComedyTiming, 30, "Easy"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(err.to_string(), "Server misconfigured: missing OPENAI_API_KEY");
}

#[tokio::test]
async fn test_broker_end_to_end_token() {
    let (provider, _) = fake_provider(
        StatusCode::OK,
        json!({ "value": "ek_flat", "expires_at": 4_102_444_800_i64 }),
    )
    .await;
    let server = ApiServer::new(config_from(&[
        ("OPENAI_API_KEY", "sk-test"),
        ("OPENAI_BASE_URL", provider.as_str()),
    ]));
    let base = serve(server.router()).await;
    let broker = HttpTokenBroker::new(format!("{base}/api/realtime-token"));

    let token = broker
        .fetch_token(&SessionParams::new(Mode::AuditionSlate, 90, "Medium"))
        .await
        .unwrap();
    assert_eq!(token.expose(), "ek_flat");
    assert!(token.ensure_usable().is_ok());
    assert_eq!(token.model.as_deref(), Some("gpt-realtime"));
}

#[tokio::test]
async fn test_broker_validates_before_calling() {
    // nothing listens here; validation must fail first
    let broker = HttpTokenBroker::new("http://127.0.0.1:9/api/realtime-token");
    let err = broker
        .fetch_token(&SessionParams {
            mode: "Musical".to_string(),
            duration: 45,
            difficulty: "x".to_string(),
        })
        .await
        .unwrap_err();

    assert!(
        matches!(&err, Error::Validation(details) if details.len() == 3),
        "unexpected error: {err:?}"
    );
}
