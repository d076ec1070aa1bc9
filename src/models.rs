use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Queryable, Selectable)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Order {
    pub id: i32,
    pub user_id: i32,
    pub total_value: String,
    pub currency: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub user_id: i32,
    pub total_value: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Queryable, Selectable)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Payment {
    pub id: i32,
    pub provider_payment_id: String,
    pub order_id: i32,
    pub user_id: i32,
    pub amount_value: String,
    pub amount_currency: String,
    pub payment_method: String,
    pub status: String,
    pub confirmation_type: String,
    pub confirmation_url: Option<String>,
    pub idempotency_key: String,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct NewPayment {
    pub provider_payment_id: String,
    pub order_id: i32,
    pub user_id: i32,
    pub amount_value: String,
    pub amount_currency: String,
    pub payment_method: String,
    pub status: String,
    pub confirmation_type: String,
    pub confirmation_url: Option<String>,
    pub idempotency_key: String,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::idempotency_keys)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct IdempotencyRecord {
    pub key: String,
    pub method: String,
    pub path: String,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::idempotency_keys)]
pub struct NewIdempotencyRecord {
    pub key: String,
    pub method: String,
    pub path: String,
    pub created_at: String,
}

/// Local payment lifecycle: `created -> succeeded | canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Created,
    Succeeded,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Canceled => "canceled",
        }
    }

    /// Maps a provider status onto a terminal local status. Non-terminal
    /// provider states (`pending`, `waiting_for_capture`) yield `None`.
    pub fn terminal_from_provider(provider_status: &str) -> Option<PaymentStatus> {
        match provider_status {
            "succeeded" => Some(PaymentStatus::Succeeded),
            "canceled" => Some(PaymentStatus::Canceled),
            _ => None,
        }
    }

    /// Order status that follows a terminal payment status.
    pub fn order_status(&self) -> &'static str {
        match self {
            PaymentStatus::Created => "pending",
            PaymentStatus::Succeeded => "paid",
            PaymentStatus::Canceled => "canceled",
        }
    }
}
