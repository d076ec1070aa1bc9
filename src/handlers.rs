use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::json;

use crate::dtos::{Confirmation, CreatePaymentRequest, CreatePaymentResponse, PaymentView};
use crate::error::{AppError, AppResult};
use crate::gateway::{confirmation_for, CreatePayment};
use crate::idempotency::IdempotencyKey;
use crate::models::{NewPayment, Payment, PaymentStatus};
use crate::store::timestamp;
use crate::AppState;

pub async fn health() -> &'static str {
    "ok"
}

/// Parses a decimal amount with at most two fractional digits into minor units.
pub(crate) fn to_minor_units(value: &str) -> Option<i64> {
    let (whole, frac) = match value.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (value, ""),
    };
    if whole.is_empty()
        || frac.len() > 2
        || (value.contains('.') && frac.is_empty())
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    whole.checked_mul(100)?.checked_add(frac)
}

fn validate(req: &CreatePaymentRequest) -> AppResult<i64> {
    let minor = to_minor_units(&req.amount.value)
        .filter(|m| *m > 0)
        .ok_or_else(|| {
            AppError::Validation("amount.value must be a positive decimal with up to two fraction digits".into())
        })?;
    let currency = &req.amount.currency;
    if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(AppError::Validation(
            "amount.currency must be a three letter ISO code".into(),
        ));
    }
    let method = req.payment_method.as_str();
    if method.is_empty()
        || method.len() > 32
        || !method.bytes().all(|b| b.is_ascii_lowercase() || b == b'_')
    {
        return Err(AppError::Validation("payment_method is invalid".into()));
    }
    if let Some(url) = &req.return_url {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AppError::Validation("return_url must be an http(s) URL".into()));
        }
    }
    Ok(minor)
}

pub async fn create_payment(
    State(state): State<AppState>,
    Extension(IdempotencyKey(key)): Extension<IdempotencyKey>,
    Json(req): Json<CreatePaymentRequest>,
) -> AppResult<(StatusCode, Json<CreatePaymentResponse>)> {
    let minor = validate(&req)?;

    // A payment stored under this key whose response was never recorded.
    if let Some(payment) = state.store.find_payment_by_idempotency_key(&key).await? {
        tracing::info!(
            payment_id = payment.id,
            key = %key,
            "returning payment already stored for idempotency key"
        );
        return Ok((StatusCode::CREATED, Json(created_response(payment))));
    }

    let order = state
        .store
        .find_order(req.order_id)
        .await?
        .ok_or(AppError::OrderNotFound)?;
    if order.user_id != req.user_id {
        return Err(AppError::OrderForbidden);
    }
    if order.status != "pending" {
        return Err(AppError::Validation(format!(
            "order {} is already {}",
            order.id, order.status
        )));
    }
    if to_minor_units(&order.total_value) != Some(minor) || order.currency != req.amount.currency {
        return Err(AppError::Validation(
            "amount does not match the order total".into(),
        ));
    }
    if let Some(open) = state.store.find_open_payment_for_order(order.id).await? {
        tracing::info!(
            order_id = order.id,
            payment_id = open.id,
            "order already has an open payment"
        );
        return Err(AppError::PaymentAlreadyOpen);
    }

    let return_url = req
        .return_url
        .clone()
        .unwrap_or_else(|| state.config.return_url.clone());
    let requested = confirmation_for(&req.payment_method, &return_url);

    let provider_payment = state
        .gateway
        .create_payment(&CreatePayment {
            amount: req.amount.clone(),
            payment_method: req.payment_method.clone(),
            order_id: req.order_id,
            user_id: req.user_id,
            return_url,
        })
        .await?;

    let (confirmation_type, confirmation_url) = match provider_payment.confirmation {
        Some(c) => (c.kind, c.confirmation_url.or(c.confirmation_data)),
        None => (requested.kind().to_string(), None),
    };

    let now = timestamp();
    let metadata = json!({
        "idempotence_key": key,
        "order_id": req.order_id,
        "user_id": req.user_id,
    });
    let provider_payment_id = provider_payment.id;
    let inserted = state
        .store
        .insert_payment(NewPayment {
            provider_payment_id: provider_payment_id.clone(),
            order_id: req.order_id,
            user_id: req.user_id,
            amount_value: req.amount.value,
            amount_currency: req.amount.currency,
            payment_method: req.payment_method,
            status: PaymentStatus::Created.as_str().to_string(),
            confirmation_type,
            confirmation_url,
            idempotency_key: key.clone(),
            metadata: metadata.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
        .await;
    let payment = match inserted {
        Ok(payment) => payment,
        Err(err) => {
            // The provider already holds this payment; it needs manual reconciliation.
            tracing::error!(
                error = %err,
                provider_payment_id = %provider_payment_id,
                order_id = req.order_id,
                key = %key,
                "provider payment created but not stored"
            );
            if err.is_open_payment_conflict() {
                return Err(AppError::PaymentAlreadyOpen);
            }
            return Err(err.into());
        }
    };

    tracing::info!(
        payment_id = payment.id,
        provider_payment_id = %payment.provider_payment_id,
        order_id = payment.order_id,
        "payment created"
    );

    Ok((StatusCode::CREATED, Json(created_response(payment))))
}

fn created_response(payment: Payment) -> CreatePaymentResponse {
    CreatePaymentResponse {
        id: payment.id,
        provider_payment_id: payment.provider_payment_id,
        status: payment.status,
        confirmation: Confirmation {
            kind: payment.confirmation_type,
            url: payment.confirmation_url,
        },
    }
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<PaymentView>> {
    let payment = state
        .store
        .find_payment(id)
        .await?
        .ok_or(AppError::PaymentNotFound)?;
    Ok(Json(PaymentView::from(payment)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Amount;

    fn request(value: &str, currency: &str, method: &str) -> CreatePaymentRequest {
        CreatePaymentRequest {
            amount: Amount {
                value: value.into(),
                currency: currency.into(),
            },
            payment_method: method.into(),
            order_id: 1,
            user_id: 1,
            return_url: None,
        }
    }

    #[test]
    fn minor_units_parse() {
        assert_eq!(to_minor_units("100.00"), Some(10_000));
        assert_eq!(to_minor_units("100"), Some(10_000));
        assert_eq!(to_minor_units("0.5"), Some(50));
        assert_eq!(to_minor_units("12.34"), Some(1_234));
        assert_eq!(to_minor_units("1.234"), None);
        assert_eq!(to_minor_units("1."), None);
        assert_eq!(to_minor_units(".5"), None);
        assert_eq!(to_minor_units("-1.00"), None);
        assert_eq!(to_minor_units("1e3"), None);
    }

    #[test]
    fn validation_accepts_well_formed_requests() {
        assert_eq!(validate(&request("100.00", "RUB", "sbp")).unwrap(), 10_000);
        assert!(validate(&request("100.00", "RUB", "bank_card")).is_ok());
    }

    #[test]
    fn validation_rejects_bad_fields() {
        assert!(validate(&request("0.00", "RUB", "sbp")).is_err());
        assert!(validate(&request("abc", "RUB", "sbp")).is_err());
        assert!(validate(&request("10.00", "rub", "sbp")).is_err());
        assert!(validate(&request("10.00", "RUBL", "sbp")).is_err());
        assert!(validate(&request("10.00", "RUB", "")).is_err());
        let mut req = request("10.00", "RUB", "sbp");
        req.return_url = Some("javascript:alert(1)".into());
        assert!(validate(&req).is_err());
    }
}
