//! Request-level idempotency for mutating endpoints.
//!
//! A key arrives in `Idempotence-Key` or is generated and echoed back in
//! `X-Generated-Idempotency-Key`. The first request holding a key runs the
//! handler; later requests with the same key get the recorded response.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::error::AppError;
use crate::store::{KeyClaim, Store};
use crate::AppState;

pub const IDEMPOTENCY_HEADER: &str = "idempotence-key";
pub const GENERATED_KEY_HEADER: &str = "x-generated-idempotency-key";
pub const REPLAYED_HEADER: &str = "idempotent-replayed";
pub const MAX_KEY_LEN: usize = 64;

const MAX_RECORDED_BODY: usize = 1024 * 1024;

/// Key owned by the current request, placed in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(pub String);

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum KeySource {
    Client(String),
    Generated(String),
}

impl KeySource {
    fn key(&self) -> &str {
        match self {
            KeySource::Client(k) | KeySource::Generated(k) => k,
        }
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

pub(crate) fn extract_key(headers: &HeaderMap) -> Result<KeySource, AppError> {
    let Some(value) = headers.get(IDEMPOTENCY_HEADER) else {
        return Ok(KeySource::Generated(Uuid::new_v4().simple().to_string()));
    };
    let key = value
        .to_str()
        .map_err(|_| AppError::IdempotencyKeyInvalid)?
        .trim();
    if key.is_empty() || key.chars().count() > MAX_KEY_LEN {
        return Err(AppError::IdempotencyKeyInvalid);
    }
    Ok(KeySource::Client(key.to_string()))
}

fn replay(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let mut resp = (status, body).into_response();
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    resp
}

/// Stores a successful response against `key`, or releases the key so the
/// client may retry.
async fn record(store: &Store, key: &str, resp: Response) -> Response {
    if !resp.status().is_success() {
        if let Err(err) = store.release_idempotency_key(key).await {
            tracing::error!(error = %err, key, "failed to release idempotency key");
        }
        return resp;
    }

    let (parts, body) = resp.into_parts();
    let bytes = match to_bytes(body, MAX_RECORDED_BODY).await {
        Ok(b) => b,
        Err(err) => {
            tracing::error!(error = %err, key, "failed to buffer response for idempotency record");
            if let Err(err) = store.release_idempotency_key(key).await {
                tracing::error!(error = %err, key, "failed to release idempotency key");
            }
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let body = String::from_utf8_lossy(&bytes).into_owned();
    if let Err(err) = store
        .complete_idempotency_key(key, parts.status.as_u16(), body)
        .await
    {
        // The claim stays unfinished until the claim TTL passes. A retry then
        // finds the stored payment through its idempotency key.
        tracing::error!(error = %err, key, "failed to record idempotent response");
    }
    Response::from_parts(parts, Body::from(bytes))
}

pub async fn idempotency_guard(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if !is_mutating(req.method()) {
        return next.run(req).await;
    }

    let source = match extract_key(req.headers()) {
        Ok(source) => source,
        Err(err) => {
            tracing::debug!("rejected request with invalid idempotency key");
            return err.into_response();
        }
    };
    let key = source.key().to_string();

    let claim = state
        .store
        .claim_idempotency_key(&key, req.method().as_str(), req.uri().path())
        .await;

    let mut resp = match claim {
        Ok(KeyClaim::Claimed) => {
            req.extensions_mut().insert(IdempotencyKey(key.clone()));
            // The handler and its bookkeeping run on their own task, so a
            // dropped connection cannot leave the claim unfinished.
            let store = state.store.clone();
            let owned_key = key.clone();
            let task = tokio::spawn(async move {
                let resp = next.run(req).await;
                record(&store, &owned_key, resp).await
            });
            match task.await {
                Ok(resp) => resp,
                Err(err) => {
                    tracing::error!(error = %err, key = %key, "guarded handler aborted");
                    if let Err(err) = state.store.release_idempotency_key(&key).await {
                        tracing::error!(error = %err, key = %key, "failed to release idempotency key");
                    }
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        Ok(KeyClaim::Completed { status, body }) => {
            tracing::info!(key = %key, status, "replaying idempotent response");
            replay(status, body)
        }
        Ok(KeyClaim::InFlight) => AppError::IdempotencyInProgress.into_response(),
        Err(err) => {
            tracing::error!(error = %err, key = %key, "idempotency lookup failed");
            AppError::from(err).into_response()
        }
    };

    if let KeySource::Generated(generated) = &source {
        if let Ok(value) = HeaderValue::from_str(generated) {
            resp.headers_mut().insert(GENERATED_KEY_HEADER, value);
        }
    }
    resp
}
