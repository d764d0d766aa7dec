mod error;
mod routes;
mod session;
mod state;

use anyhow::Context;
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zenmail_config::ConfigManager;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_manager = ConfigManager::new();
    let config = config_manager.load().context("load app config")?;
    if config.session.secret.is_none() {
        warn!("SESSION_SECRET not set; using the development secret");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let environment = config.server.environment;
    let frontend = config.frontend.url.clone();
    let prune_every = Duration::from_secs(config.session.prune_secs.max(1));

    let state = AppState::initialize(config)
        .await
        .context("initialize app state")?;
    let pruner = tokio::spawn(session::prune_expired(state.sessions.clone(), prune_every));
    let app = routes::app(Arc::new(state)).context("build router")?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(
        %addr,
        environment = environment.as_str(),
        %frontend,
        "ZenMail backend listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve http")?;

    pruner.abort();
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
    }
}
