//! Atrium FHIR Server
//!
//! A FHIR R4 resource server backed by PostgreSQL.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use atrium_persistence::{PostgresConfig, Repository, SubscriptionEngine};
use atrium_rest::{AppState, ServerConfig, create_app, init_logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_logging(&config.log_level);

    info!(
        host = %config.host,
        port = config.port,
        base_url = %config.base_url,
        "starting Atrium FHIR Server"
    );

    let repo = Arc::new(Repository::new(PostgresConfig::from_env()).await?);
    repo.init_schema().await?;
    info!("database schema ready");

    let subscriptions = Arc::new(SubscriptionEngine::new(repo.registry().clone()));
    repo.attach_subscriptions(subscriptions.clone());
    repo.load_subscriptions(&subscriptions).await?;
    info!(
        active = subscriptions.subscription_count(),
        "subscription registry loaded"
    );

    let state = AppState::new(repo, subscriptions, config.clone());
    let app = create_app(state);

    serve(app, &config).await
}

/// Binds the listener and serves until ctrl-c.
async fn serve(app: axum::Router, config: &ServerConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr();
    info!(address = %addr, "server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
