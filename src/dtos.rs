use serde::{Deserialize, Serialize};

use crate::gateway::Amount;
use crate::models::Payment;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: Amount,
    pub payment_method: String,
    pub order_id: i32,
    pub user_id: i32,
    #[serde(default)]
    pub return_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Confirmation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub id: i32,
    pub provider_payment_id: String,
    pub status: String,
    pub confirmation: Confirmation,
}

#[derive(Debug, Serialize)]
pub struct PaymentView {
    pub id: i32,
    pub provider_payment_id: String,
    pub order_id: i32,
    pub user_id: i32,
    pub amount: Amount,
    pub payment_method: String,
    pub status: String,
    pub confirmation: Confirmation,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Payment> for PaymentView {
    fn from(p: Payment) -> Self {
        let metadata = serde_json::from_str(&p.metadata)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
        Self {
            id: p.id,
            provider_payment_id: p.provider_payment_id,
            order_id: p.order_id,
            user_id: p.user_id,
            amount: Amount {
                value: p.amount_value,
                currency: p.amount_currency,
            },
            payment_method: p.payment_method,
            status: p.status,
            confirmation: Confirmation {
                kind: p.confirmation_type,
                url: p.confirmation_url,
            },
            metadata,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResult {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub changed: bool,
}
