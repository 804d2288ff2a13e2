//! HTTP signaling surface
//!
//! - POST /sdp - Negotiate a publish session
//! - GET /health - Health check

use super::{SessionRequest, SignalingAdapter};
use crate::{Error, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error type ("request", "negotiation", "internal")
    error_type: String,
    /// Human-readable error message
    message: String,
}

impl ErrorResponse {
    fn new(status: StatusCode, error_type: &str, message: impl Into<String>) -> Response {
        (
            status,
            Json(Self {
                error_type: error_type.to_string(),
                message: message.into(),
            }),
        )
            .into_response()
    }
}

/// Map adapter errors to status codes and structured bodies
fn map_signaling_error(e: Error) -> Response {
    if e.is_negotiation_error() {
        ErrorResponse::new(StatusCode::BAD_REQUEST, "negotiation", e.to_string())
    } else {
        ErrorResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            e.to_string(),
        )
    }
}

/// HTTP server wrapping a [`SignalingAdapter`]
pub struct SignalingServer {
    bind_address: SocketAddr,
    adapter: SignalingAdapter,
}

impl SignalingServer {
    /// Create a server for `adapter` bound to `bind_address`
    pub fn new(bind_address: SocketAddr, adapter: SignalingAdapter) -> Self {
        Self {
            bind_address,
            adapter,
        }
    }

    /// The adapter behind the routes
    pub fn adapter(&self) -> &SignalingAdapter {
        &self.adapter
    }

    /// Build the router with all endpoints
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/sdp", post(sdp_handler))
            .with_state(self.adapter.clone())
            .layer(
                tower::ServiceBuilder::new()
                    .layer(tower_http::trace::TraceLayer::new_for_http())
                    .layer(tower_http::cors::CorsLayer::permissive()),
            )
    }

    /// Serve until `shutdown` resolves
    ///
    /// Once the listener stops, all sessions are torn down and their
    /// teardown awaited (bounded by [`SignalingAdapter::shutdown_and_wait`]).
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(self.bind_address)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to bind {}: {}", self.bind_address, e),
                ))
            })?;

        tracing::info!("Signaling server listening on {}", self.bind_address);

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        self.adapter.shutdown_and_wait().await;
        result?;

        Ok(())
    }
}

/// Health check endpoint
async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// POST /sdp - Negotiate a session and return the answer description
async fn sdp_handler(
    State(adapter): State<SignalingAdapter>,
    request: std::result::Result<Json<SessionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => {
            return ErrorResponse::new(StatusCode::BAD_REQUEST, "request", rejection.body_text())
        }
    };

    match adapter.handle(request).await {
        Ok(answer) => Json(answer.description().clone()).into_response(),
        Err(e) => {
            tracing::warn!("SDP request failed: {}", e);
            map_signaling_error(e)
        }
    }
}
