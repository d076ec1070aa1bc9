use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::allowlist::{InvalidRange, IpAllowList};
use crate::store::DEFAULT_CLAIM_TTL;

const DEFAULT_API_URL: &str = "https://api.yookassa.ru/v3";
const DEFAULT_RETURN_URL: &str = "http://localhost:3000/payment/result";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {value}")]
    Invalid { name: &'static str, value: String },
    #[error(transparent)]
    AllowList(#[from] InvalidRange),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }
}

#[derive(Clone)]
pub struct YooKassaCredentials {
    pub shop_id: String,
    pub secret_key: String,
    pub api_url: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for YooKassaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YooKassaCredentials")
            .field("shop_id", &self.shop_id)
            .field("secret_key", &"***")
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Process-wide settings. Built once at start and shared read-only.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub environment: Environment,
    pub yookassa: YooKassaCredentials,
    pub webhook_secret: String,
    pub return_url: String,
    pub webhook_allow_list: IpAllowList,
    pub trust_proxy: bool,
    /// Age after which an unfinished idempotency claim may be taken over.
    pub idempotency_claim_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = required("DATABASE_URL")?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let host: IpAddr = host.parse().map_err(|_| ConfigError::Invalid {
            name: "HOST",
            value: host.clone(),
        })?;
        let port: u16 = parsed("PORT", 3000)?;

        let environment = env::var("APP_ENV")
            .map(|v| Environment::parse(&v))
            .unwrap_or(Environment::Development);

        let yookassa = YooKassaCredentials {
            shop_id: required("YOOKASSA_SHOP_ID")?,
            secret_key: required("YOOKASSA_SECRET_KEY")?,
            api_url: env::var("YOOKASSA_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            timeout: Duration::from_secs(parsed("GATEWAY_TIMEOUT_SECS", 10)?),
        };

        let webhook_allow_list = match env::var("WEBHOOK_ALLOWED_IPS") {
            Ok(list) if !list.trim().is_empty() => IpAllowList::parse(list.split(','))?,
            _ => IpAllowList::yookassa(),
        };

        Ok(Self {
            database_url,
            listen_addr: SocketAddr::new(host, port),
            environment,
            yookassa,
            webhook_secret: required("WEBHOOK_SECRET")?,
            return_url: env::var("PAYMENT_RETURN_URL")
                .unwrap_or_else(|_| DEFAULT_RETURN_URL.to_string()),
            webhook_allow_list,
            trust_proxy: env::var("TRUST_PROXY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            idempotency_claim_ttl: Duration::from_secs(parsed(
                "IDEMPOTENCY_CLAIM_TTL_SECS",
                DEFAULT_CLAIM_TTL.as_secs(),
            )?),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: v }),
        Err(_) => Ok(default),
    }
}
