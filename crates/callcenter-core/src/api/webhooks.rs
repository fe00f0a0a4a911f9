//! Provider webhooks
//!
//! Both endpoints verify the provider signature before touching any state. The URL the
//! signature covers is rebuilt from `provider.public_base_url` and the request path,
//! since the service usually sits behind a proxy.

use std::collections::BTreeMap;

use axum::extract::{Form, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::error::CallCenterError;
use crate::ids::ProviderCallId;
use crate::inbound::InboundWebhook;
use crate::provider::WebhookRequest;

use super::{ApiError, ApiState, INSTRUCTION_SIGNATURE_HEADER, PROVIDER_SIGNATURE_HEADER};

fn verified_request(
    engine: &ApiState,
    uri: &Uri,
    headers: &HeaderMap,
    params: BTreeMap<String, String>,
) -> Result<WebhookRequest, ApiError> {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or_else(|| uri.path());
    let request = WebhookRequest {
        url: format!(
            "{}{}",
            engine.config().provider.public_base_url.trim_end_matches('/'),
            path
        ),
        params,
        signature: headers
            .get(PROVIDER_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    engine.adapter().verify_webhook(&request)?;
    Ok(request)
}

fn required<'a>(request: &'a WebhookRequest, name: &str) -> Result<&'a str, ApiError> {
    request
        .param(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError(CallCenterError::validation(format!("missing form field {}", name))))
}

/// `POST /webhooks/voice/inbound`
pub async fn inbound_call(
    State(engine): State<ApiState>,
    uri: Uri,
    headers: HeaderMap,
    Form(params): Form<BTreeMap<String, String>>,
) -> Result<Response, ApiError> {
    let request = verified_request(&engine, &uri, &headers, params)?;
    let webhook = InboundWebhook {
        provider_call_id: ProviderCallId::from(required(&request, "CallSid")?),
        from: required(&request, "From")?.to_string(),
        to: request.param("To").unwrap_or_default().to_string(),
    };

    let outcome = engine.inbound().on_inbound_webhook(webhook).await?;
    let document = engine.adapter().render(&outcome.instruction)?;
    debug!(
        "📄 Answering inbound webhook for {} with {:?}",
        outcome.call_id, outcome.decision.action
    );

    let mut response = (StatusCode::OK, document.body).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(document.content_type));
    if let Some(signature) = document.signature {
        match HeaderValue::from_str(&signature) {
            Ok(value) => {
                response_headers.insert(INSTRUCTION_SIGNATURE_HEADER, value);
            }
            Err(e) => warn!("⚠️ Unusable instruction signature: {}", e),
        }
    }
    Ok(response)
}

/// `POST /webhooks/voice/status`
///
/// Callbacks for calls this process no longer tracks are acknowledged so the provider
/// stops redelivering them.
pub async fn call_status(
    State(engine): State<ApiState>,
    uri: Uri,
    headers: HeaderMap,
    Form(params): Form<BTreeMap<String, String>>,
) -> Result<StatusCode, ApiError> {
    let request = verified_request(&engine, &uri, &headers, params)?;
    let pid = ProviderCallId::from(required(&request, "CallSid")?);
    let status = required(&request, "CallStatus")?;

    match engine
        .registry()
        .apply_provider_status_by_provider_id(&pid, status)
        .await
    {
        Ok(_) => Ok(StatusCode::NO_CONTENT),
        Err(CallCenterError::NotFound(_)) => {
            debug!("Status {} for untracked provider call {}", status, pid);
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => Err(e.into()),
    }
}
