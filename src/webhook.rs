//! YooKassa notification intake.
//!
//! Order of checks: source address, signature, payload shape. Accepted events
//! are reconciled against the provider's own view of the payment.

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::config::Config;
use crate::dtos::WebhookResult;
use crate::error::{AppError, AppResult};
use crate::models::PaymentStatus;
use crate::signature::{self, SIGNATURE_HEADER};
use crate::store::Transition;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: String,
    pub event: String,
    pub object: NotificationObject,
}

#[derive(Debug, Deserialize)]
pub struct NotificationObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

pub(crate) fn source_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy: bool,
) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    peer.map(|addr| addr.ip())
}

pub(crate) fn check_source(config: &Config, ip: Option<IpAddr>) -> AppResult<()> {
    if !config.is_production() {
        return Ok(());
    }
    match ip {
        Some(ip) if config.webhook_allow_list.allows(ip) => Ok(()),
        _ => {
            tracing::warn!(source = ?ip, "webhook from address outside allow-list");
            Err(AppError::SourceForbidden)
        }
    }
}

fn parse(body: &[u8]) -> AppResult<Notification> {
    let notification: Notification =
        serde_json::from_slice(body).map_err(|e| AppError::MalformedEvent(e.to_string()))?;
    if notification.kind != "notification" {
        return Err(AppError::MalformedEvent(format!(
            "unexpected type `{}`",
            notification.kind
        )));
    }
    if notification.object.id.is_empty() {
        return Err(AppError::MalformedEvent("object.id is empty".into()));
    }
    Ok(notification)
}

pub async fn handle_webhook(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookResult>> {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    check_source(
        &state.config,
        source_ip(&headers, peer, state.config.trust_proxy),
    )?;

    let header = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if !signature::verify(&body, header, &state.config.webhook_secret) {
        tracing::warn!(peer = ?peer, "webhook signature rejected");
        return Err(AppError::SignatureInvalid);
    }

    let notification = parse(&body)?;
    if !notification.event.starts_with("payment.") {
        tracing::info!(event = %notification.event, "ignoring non-payment notification");
        return Ok(Json(WebhookResult {
            received: true,
            status: None,
            changed: false,
        }));
    }

    let provider_id = notification.object.id;
    let local = state
        .store
        .find_payment_by_provider_id(&provider_id)
        .await?
        .ok_or(AppError::PaymentNotFound)?;

    // The notification body is only a hint; the provider's record decides.
    let remote = state.gateway.get_payment(&provider_id).await?;
    tracing::debug!(
        provider_payment_id = %provider_id,
        event = %notification.event,
        reported = ?notification.object.status,
        provider_status = %remote.status,
        "reconciling payment"
    );

    let Some(target) = PaymentStatus::terminal_from_provider(&remote.status) else {
        return Ok(Json(WebhookResult {
            received: true,
            status: Some(local.status),
            changed: false,
        }));
    };

    let result = match state.store.apply_terminal_status(&provider_id, target).await? {
        Transition::Applied(p) => {
            tracing::info!(
                payment_id = p.id,
                order_id = p.order_id,
                status = %p.status,
                "payment reached terminal status"
            );
            WebhookResult {
                received: true,
                status: Some(p.status),
                changed: true,
            }
        }
        Transition::AlreadyApplied(p) => {
            tracing::debug!(payment_id = p.id, status = %p.status, "duplicate terminal notification");
            WebhookResult {
                received: true,
                status: Some(p.status),
                changed: false,
            }
        }
        Transition::Conflict(p) => {
            tracing::warn!(
                payment_id = p.id,
                current = %p.status,
                reported = target.as_str(),
                "conflicting terminal status ignored"
            );
            WebhookResult {
                received: true,
                status: Some(p.status),
                changed: false,
            }
        }
        Transition::NotFound => return Err(AppError::PaymentNotFound),
    };
    Ok(Json(result))
}
