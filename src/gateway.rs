//! Outbound calls to the YooKassa payments API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::YooKassaCredentials;

/// Payment method that completes through an SBP QR code rather than a redirect.
pub const QR_METHOD: &str = "sbp";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The provider answered with a non-success status.
    #[error("provider responded with {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid provider payment id `{0}`")]
    InvalidPaymentId(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub value: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfirmationRequest {
    Qr,
    Redirect { return_url: String },
}

impl ConfirmationRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfirmationRequest::Qr => "qr",
            ConfirmationRequest::Redirect { .. } => "redirect",
        }
    }
}

/// SBP payments confirm by QR code; every other method redirects the payer.
pub fn confirmation_for(payment_method: &str, return_url: &str) -> ConfirmationRequest {
    if payment_method == QR_METHOD {
        ConfirmationRequest::Qr
    } else {
        ConfirmationRequest::Redirect {
            return_url: return_url.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub amount: Amount,
    pub payment_method: String,
    pub order_id: i32,
    pub user_id: i32,
    pub return_url: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProviderConfirmation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub confirmation_url: Option<String>,
    #[serde(default)]
    pub confirmation_data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPayment {
    pub id: String,
    pub status: String,
    pub amount: Amount,
    #[serde(default)]
    pub confirmation: Option<ProviderConfirmation>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, request: &CreatePayment) -> Result<ProviderPayment, GatewayError>;
    async fn get_payment(&self, payment_id: &str) -> Result<ProviderPayment, GatewayError>;
}

#[derive(Serialize)]
struct PaymentMethodData<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Serialize)]
struct PaymentMetadata {
    order_id: i32,
    user_id: i32,
}

#[derive(Serialize)]
struct CreatePaymentBody<'a> {
    amount: &'a Amount,
    capture: bool,
    confirmation: ConfirmationRequest,
    payment_method_data: PaymentMethodData<'a>,
    description: String,
    metadata: PaymentMetadata,
}

impl<'a> CreatePaymentBody<'a> {
    fn new(request: &'a CreatePayment) -> Self {
        Self {
            amount: &request.amount,
            capture: true,
            confirmation: confirmation_for(&request.payment_method, &request.return_url),
            payment_method_data: PaymentMethodData {
                kind: &request.payment_method,
            },
            description: format!("Mat-Focus order #{}", request.order_id),
            metadata: PaymentMetadata {
                order_id: request.order_id,
                user_id: request.user_id,
            },
        }
    }
}

fn valid_payment_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

pub struct YooKassaGateway {
    credentials: YooKassaCredentials,
    http: reqwest::Client,
}

impl YooKassaGateway {
    pub fn new(credentials: YooKassaCredentials) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(credentials.timeout)
            .build()?;
        Ok(Self { credentials, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.credentials.api_url.trim_end_matches('/'), path)
    }

    async fn decode(response: reqwest::Response) -> Result<ProviderPayment, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body, "yookassa rejected request");
            return Err(GatewayError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<ProviderPayment>().await?)
    }
}

#[async_trait]
impl PaymentGateway for YooKassaGateway {
    async fn create_payment(&self, request: &CreatePayment) -> Result<ProviderPayment, GatewayError> {
        // Provider-facing key, fresh per outbound call.
        let idempotence_key = Uuid::new_v4().to_string();
        let body = CreatePaymentBody::new(request);
        tracing::debug!(
            order_id = request.order_id,
            method = %request.payment_method,
            confirmation = body.confirmation.kind(),
            "creating yookassa payment"
        );
        let response = self
            .http
            .post(self.url("payments"))
            .basic_auth(&self.credentials.shop_id, Some(&self.credentials.secret_key))
            .header("Idempotence-Key", idempotence_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "yookassa create payment failed");
                GatewayError::from(e)
            })?;
        Self::decode(response).await
    }

    async fn get_payment(&self, payment_id: &str) -> Result<ProviderPayment, GatewayError> {
        if !valid_payment_id(payment_id) {
            return Err(GatewayError::InvalidPaymentId(payment_id.to_string()));
        }
        let response = self
            .http
            .get(self.url(&format!("payments/{payment_id}")))
            .basic_auth(&self.credentials.shop_id, Some(&self.credentials.secret_key))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, payment_id, "yookassa get payment failed");
                GatewayError::from(e)
            })?;
        Self::decode(response).await
    }
}
