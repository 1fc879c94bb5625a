//! HTTP API for the coaching backend
//!
//! Holds the long-lived provider key and hands out per-session realtime
//! credentials.

pub mod health;
pub mod token;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{Config, Result};

/// Shared state for API handlers
#[derive(Debug)]
pub struct ApiState {
    pub config: Config,
    /// Client for provider requests
    pub http: reqwest::Client,
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Create a server listening on the configured port
    #[must_use]
    pub fn new(config: Config) -> Self {
        let port = config.api_server.port;
        Self {
            state: Arc::new(ApiState {
                config,
                http: reqwest::Client::new(),
            }),
            port,
        }
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .merge(token::router(Arc::clone(&self.state)))
            .merge(health::router())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        if self.state.config.api_server.openai_api_key.is_none() {
            tracing::warn!("OPENAI_API_KEY not set; token requests will fail");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the server stops abnormally
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;
        Ok(())
    }
}
