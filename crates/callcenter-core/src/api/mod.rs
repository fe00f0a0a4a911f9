//! # HTTP Surface
//!
//! axum routes the provider and agent desktops talk to:
//!
//! | route | purpose |
//! |---|---|
//! | `POST /webhooks/voice/inbound` | inbound-call webhook, answered with a signed signaling document |
//! | `POST /webhooks/voice/status` | provider status callback |
//! | `POST /calls/:id/answer` | agent claims a ringing call (`409` when someone else won) |
//! | `GET /agents/:id/events` | server-sent notifications for one agent |
//! | `GET /campaigns/:id/events` | server-sent notifications for one campaign |
//! | `GET /stats` | engine statistics |
//! | `GET /health` | liveness check |
//!
//! ```no_run
//! use std::sync::Arc;
//! use callcenter_core::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let engine = CallCenterEngine::builder()
//!     .with_provider(Arc::new(SimulatedProvider::new()))
//!     .build()
//!     .await?;
//! let app = callcenter_core::api::router(engine);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await
//!     .map_err(|e| CallCenterError::internal(e.to_string()))?;
//! axum::serve(listener, app).await
//!     .map_err(|e| CallCenterError::internal(e.to_string()))?;
//! # Ok(())
//! # }
//! ```

pub mod calls;
pub mod events;
pub mod webhooks;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::error::CallCenterError;
use crate::orchestrator::CallCenterEngine;

/// Header carrying the provider's webhook signature
pub const PROVIDER_SIGNATURE_HEADER: &str = "x-provider-signature";

/// Header carrying the signature of a rendered signaling document
pub const INSTRUCTION_SIGNATURE_HEADER: &str = "x-callcenter-signature";

pub type ApiState = Arc<CallCenterEngine>;

/// Build the router over a shared engine
pub fn router(engine: Arc<CallCenterEngine>) -> Router {
    Router::new()
        .route("/webhooks/voice/inbound", post(webhooks::inbound_call))
        .route("/webhooks/voice/status", post(webhooks::call_status))
        .route("/calls/:id/answer", post(calls::answer_call))
        .route("/agents/:id/events", get(events::agent_events))
        .route("/campaigns/:id/events", get(events::campaign_events))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

async fn stats(axum::extract::State(engine): axum::extract::State<ApiState>) -> impl IntoResponse {
    Json(engine.get_stats().await)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned from handlers, mapped onto an HTTP status
#[derive(Debug)]
pub struct ApiError(pub CallCenterError);

impl From<CallCenterError> for ApiError {
    fn from(err: CallCenterError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CallCenterError::WebhookSignatureInvalid => StatusCode::FORBIDDEN,
            CallCenterError::NotFound(_) => StatusCode::NOT_FOUND,
            CallCenterError::AlreadyClaimed { .. }
            | CallCenterError::InvalidStateTransition { .. }
            | CallCenterError::LockContention(_) => StatusCode::CONFLICT,
            CallCenterError::Validation(_) => StatusCode::BAD_REQUEST,
            CallCenterError::ProviderRejected(_) => StatusCode::BAD_GATEWAY,
            CallCenterError::AdapterUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CallCenterError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CallCenterError::Configuration(_)
            | CallCenterError::Database(_)
            | CallCenterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected ({}): {}", status, self.0);
        }
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;

    use crate::agent::InMemoryAgentDirectory;
    use crate::config::CallCenterConfig;
    use crate::contacts::InMemoryContactStore;
    use crate::orchestrator::CallCenterEngine;
    use crate::provider::SimulatedProvider;

    pub struct Harness {
        pub engine: Arc<CallCenterEngine>,
        pub provider: Arc<SimulatedProvider>,
        pub agents: Arc<InMemoryAgentDirectory>,
        pub contacts: Arc<InMemoryContactStore>,
    }

    pub async fn harness(config: CallCenterConfig, provider: SimulatedProvider) -> Harness {
        let provider = Arc::new(provider);
        let agents = Arc::new(InMemoryAgentDirectory::new());
        let contacts = Arc::new(InMemoryContactStore::new());
        let engine = CallCenterEngine::builder()
            .with_config(config)
            .with_provider(provider.clone())
            .with_agent_directory(agents.clone())
            .with_contact_store(contacts.clone())
            .build()
            .await
            .unwrap();
        Harness {
            engine,
            provider,
            agents,
            contacts,
        }
    }

    pub fn form_request(uri: &str, params: &[(&str, &str)], signature: Option<&str>) -> Request<Body> {
        let body = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.replace('+', "%2B")))
            .collect::<Vec<_>>()
            .join("&");
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded");
        if let Some(signature) = signature {
            builder = builder.header(super::PROVIDER_SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body)).unwrap()
    }

    pub async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::test_support::*;
    use super::*;
    use crate::config::CallCenterConfig;
    use crate::provider::SimulatedProvider;

    #[test]
    fn test_error_status_mapping() {
        let claimed = ApiError(CallCenterError::AlreadyClaimed {
            call_id: "c".into(),
            agent_id: "a".into(),
        });
        assert_eq!(claimed.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError(CallCenterError::WebhookSignatureInvalid).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError(CallCenterError::adapter_unavailable("down")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_health_and_stats() {
        let h = harness(CallCenterConfig::default(), SimulatedProvider::new()).await;
        let app = router(h.engine.clone());

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["live_calls"], 0);
    }
}
