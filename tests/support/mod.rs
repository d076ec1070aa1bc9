#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use mat_focus_payments::allowlist::IpAllowList;
use mat_focus_payments::config::{Config, Environment, YooKassaCredentials};
use mat_focus_payments::gateway::{
    confirmation_for, ConfirmationRequest, CreatePayment, GatewayError, PaymentGateway,
    ProviderConfirmation, ProviderPayment,
};
use mat_focus_payments::models::{NewOrder, NewPayment, Order};
use mat_focus_payments::signature;
use mat_focus_payments::store::{Store, DEFAULT_CLAIM_TTL};
use mat_focus_payments::{app, AppState};

pub const WEBHOOK_SECRET: &str = "whsec_mat_focus_test";
pub const RETURN_URL: &str = "https://mat-focus.example/payment/result";

/// In-process stand-in for YooKassa that counts calls.
#[derive(Default)]
pub struct FakeGateway {
    pub creates: AtomicUsize,
    pub fetches: AtomicUsize,
    statuses: Mutex<HashMap<String, String>>,
    reject_create: Mutex<Option<(u16, String)>>,
    create_delay: Mutex<Option<Duration>>,
    fixed_id: Mutex<Option<String>>,
}

impl FakeGateway {
    pub fn set_status(&self, id: &str, status: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(id.to_string(), status.to_string());
    }

    pub fn reject_creates_with(&self, status: u16, body: &str) {
        *self.reject_create.lock().unwrap() = Some((status, body.to_string()));
    }

    /// Makes every `create_payment` call take `delay` before answering.
    pub fn delay_creates_by(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = Some(delay);
    }

    /// Makes every created payment carry the same provider id.
    pub fn reuse_payment_id(&self, id: &str) {
        *self.fixed_id.lock().unwrap() = Some(id.to_string());
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment(&self, request: &CreatePayment) -> Result<ProviderPayment, GatewayError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((status, body)) = self.reject_create.lock().unwrap().clone() {
            return Err(GatewayError::Provider { status, body });
        }
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let id = self
            .fixed_id
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| format!("2d9c3c2a-000f-5000-9000-{n:012}"));
        self.set_status(&id, "pending");
        let confirmation = match confirmation_for(&request.payment_method, &request.return_url) {
            ConfirmationRequest::Qr => ProviderConfirmation {
                kind: "qr".into(),
                confirmation_url: None,
                confirmation_data: Some(format!("https://qr.nspk.ru/{id}")),
            },
            ConfirmationRequest::Redirect { .. } => ProviderConfirmation {
                kind: "redirect".into(),
                confirmation_url: Some(format!("https://yoomoney.ru/checkout/{id}")),
                confirmation_data: None,
            },
        };
        Ok(ProviderPayment {
            id,
            status: "pending".into(),
            amount: request.amount.clone(),
            confirmation: Some(confirmation),
        })
    }

    async fn get_payment(&self, payment_id: &str) -> Result<ProviderPayment, GatewayError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let status = self.statuses.lock().unwrap().get(payment_id).cloned();
        match status {
            Some(status) => Ok(ProviderPayment {
                id: payment_id.to_string(),
                status,
                amount: mat_focus_payments::gateway::Amount {
                    value: "100.00".into(),
                    currency: "RUB".into(),
                },
                confirmation: None,
            }),
            None => Err(GatewayError::Provider {
                status: 404,
                body: r#"{"type":"error","code":"not_found"}"#.into(),
            }),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Store,
    pub gateway: Arc<FakeGateway>,
}

pub fn test_config(environment: Environment) -> Config {
    Config {
        database_url: String::new(),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        environment,
        yookassa: YooKassaCredentials {
            shop_id: "test-shop".into(),
            secret_key: "test_secret".into(),
            api_url: "http://127.0.0.1:9".into(),
            timeout: Duration::from_secs(1),
        },
        webhook_secret: WEBHOOK_SECRET.into(),
        return_url: RETURN_URL.into(),
        webhook_allow_list: IpAllowList::yookassa(),
        trust_proxy: false,
        idempotency_claim_ttl: DEFAULT_CLAIM_TTL,
    }
}

pub async fn test_app(environment: Environment) -> TestApp {
    test_app_with_claim_ttl(environment, DEFAULT_CLAIM_TTL).await
}

pub async fn test_app_with_claim_ttl(environment: Environment, ttl: Duration) -> TestApp {
    let path = std::env::temp_dir().join(format!("mat-focus-{}.db", uuid::Uuid::new_v4()));
    let store = Store::connect(path.to_str().unwrap())
        .await
        .unwrap()
        .with_claim_ttl(ttl);
    let gateway = Arc::new(FakeGateway::default());
    let mut config = test_config(environment);
    config.idempotency_claim_ttl = ttl;
    let state = AppState {
        store: store.clone(),
        gateway: gateway.clone(),
        config: Arc::new(config),
    };
    TestApp {
        router: app(state),
        store,
        gateway,
    }
}

pub async fn create_order(store: &Store, user_id: i32, total: &str) -> Order {
    store
        .insert_order(NewOrder {
            user_id,
            total_value: total.into(),
            currency: "RUB".into(),
        })
        .await
        .unwrap()
}

/// A `created` payment row for `order`, as the create handler would store it.
pub fn stored_payment(order: &Order, provider_id: &str, key: &str) -> NewPayment {
    NewPayment {
        provider_payment_id: provider_id.into(),
        order_id: order.id,
        user_id: order.user_id,
        amount_value: order.total_value.clone(),
        amount_currency: order.currency.clone(),
        payment_method: "sbp".into(),
        status: "created".into(),
        confirmation_type: "qr".into(),
        confirmation_url: Some(format!("https://qr.nspk.ru/{provider_id}")),
        idempotency_key: key.into(),
        metadata: "{}".into(),
        created_at: "2024-06-01T10:00:00+00:00".into(),
        updated_at: "2024-06-01T10:00:00+00:00".into(),
    }
}

pub fn payment_body(order_id: i32, user_id: i32, method: &str) -> Value {
    serde_json::json!({
        "amount": {"value": "100.00", "currency": "RUB"},
        "payment_method": method,
        "order_id": order_id,
        "user_id": user_id,
    })
}

pub async fn post_payment(router: &Router, key: Option<&str>, body: &Value) -> Response {
    let mut req = Request::builder()
        .uri("/payments")
        .method("POST")
        .header("content-type", "application/json");
    if let Some(key) = key {
        req = req.header("Idempotence-Key", key);
    }
    let req = req.body(Body::from(body.to_string())).unwrap();
    router.clone().oneshot(req).await.unwrap()
}

pub async fn post_webhook(
    router: &Router,
    peer: &str,
    body: &str,
    signature_header: Option<String>,
) -> Response {
    let mut req = Request::builder()
        .uri("/webhooks/yookassa")
        .method("POST")
        .header("content-type", "application/json");
    if let Some(sig) = signature_header {
        req = req.header(signature::SIGNATURE_HEADER, sig);
    }
    let mut req = req.body(Body::from(body.to_string())).unwrap();
    let addr: SocketAddr = peer.parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    router.clone().oneshot(req).await.unwrap()
}

pub fn notification(event: &str, provider_id: &str, status: &str) -> String {
    serde_json::json!({
        "type": "notification",
        "event": event,
        "object": {"id": provider_id, "status": status}
    })
    .to_string()
}

pub fn signed(body: &str) -> Option<String> {
    Some(signature::sign(body.as_bytes(), WEBHOOK_SECRET, "9f86d081"))
}

pub async fn body_bytes(resp: Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), 1024 * 64)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(resp: Response) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}
