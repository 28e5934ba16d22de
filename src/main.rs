mod agent;
mod config;
mod db;
mod errors;
mod models;
mod prompt;
mod routes;
mod service;

use tracing::info;

use crate::agent::GenerationClient;
use crate::config::Config;
use crate::db::Database;
use crate::service::chat_service::ChatService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_relay=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // ── Database ──────────────────────────────────────────────────────────────
    let database = Database::open(&config.database_url).await?;

    // ── Dependency wiring ─────────────────────────────────────────────────────
    info!(
        base_url = %config.upstream.base_url,
        model = %config.upstream.model,
        history_limit = config.history_limit,
        "Generation service configured"
    );
    let agent = GenerationClient::new(config.upstream.clone());
    let chat_service = ChatService::new(&database, agent, config.history_limit);
    let app = routes::router(chat_service);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    database.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
