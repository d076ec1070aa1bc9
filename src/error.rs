use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::gateway::GatewayError;
use crate::store::StoreError;

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("idempotency key is invalid")]
    IdempotencyKeyInvalid,
    #[error("a request with this idempotency key is still in progress")]
    IdempotencyInProgress,
    #[error("order not found")]
    OrderNotFound,
    #[error("order belongs to another user")]
    OrderForbidden,
    #[error("order already has a payment awaiting confirmation")]
    PaymentAlreadyOpen,
    #[error("payment not found")]
    PaymentNotFound,
    #[error("webhook source is not allowed")]
    SourceForbidden,
    #[error("webhook signature is invalid")]
    SignatureInvalid,
    #[error("malformed webhook event: {0}")]
    MalformedEvent(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            AppError::IdempotencyKeyInvalid => (StatusCode::BAD_REQUEST, "idempotency_key_invalid"),
            AppError::IdempotencyInProgress => (StatusCode::CONFLICT, "idempotency_in_progress"),
            AppError::OrderNotFound => (StatusCode::NOT_FOUND, "order_not_found"),
            AppError::OrderForbidden => (StatusCode::FORBIDDEN, "order_forbidden"),
            AppError::PaymentAlreadyOpen => (StatusCode::CONFLICT, "payment_already_open"),
            AppError::PaymentNotFound => (StatusCode::NOT_FOUND, "payment_not_found"),
            AppError::SourceForbidden => (StatusCode::FORBIDDEN, "source_forbidden"),
            AppError::SignatureInvalid => (StatusCode::UNAUTHORIZED, "signature_invalid"),
            AppError::MalformedEvent(_) => (StatusCode::BAD_REQUEST, "malformed_event"),
            AppError::Gateway(GatewayError::Provider { .. }) => {
                (StatusCode::BAD_GATEWAY, "provider_error")
            }
            AppError::Gateway(_) => (StatusCode::BAD_GATEWAY, "gateway_unavailable"),
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Provider rejections are relayed to the caller as the provider sent them.
        if let AppError::Gateway(GatewayError::Provider { status, body }) = self {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut resp = (status, body).into_response();
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            resp.headers_mut()
                .insert("X-Error-Code", HeaderValue::from_static("provider_error"));
            return resp;
        }

        let (status, code) = self.parts();
        let message = match &self {
            AppError::Validation(msg) | AppError::MalformedEvent(msg) => Some(msg.clone()),
            AppError::Store(_) => None,
            other => Some(other.to_string()),
        };
        if status.is_server_error() {
            tracing::error!(error = %self, code, "request failed");
        }
        let mut resp = (status, Json(ErrorBody { code, message })).into_response();
        resp.headers_mut()
            .insert("X-Error-Code", HeaderValue::from_static(code));
        resp
    }
}

pub type AppResult<T> = Result<T, AppError>;
