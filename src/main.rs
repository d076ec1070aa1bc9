use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mat_focus_payments::{
    app, config::Config, gateway::YooKassaGateway, store::Store, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mat_focus_payments=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;
    if !config.is_production() {
        tracing::warn!("webhook source allow-list is bypassed outside production");
    }

    let store = Store::connect(&config.database_url)
        .await
        .context("opening database")?
        .with_claim_ttl(config.idempotency_claim_ttl);
    let gateway = YooKassaGateway::new(config.yookassa.clone()).context("building gateway client")?;

    let addr = config.listen_addr;
    let state = AppState {
        store,
        gateway: Arc::new(gateway),
        config: Arc::new(config),
    };

    tracing::debug!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
