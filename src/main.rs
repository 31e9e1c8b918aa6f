//! Licensing Server
//!
//! Serves the licensing database over HTTP and runs job transfers.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use licensing_server::config::Config;
use licensing_server::db;
use licensing_server::licensing::LicensingProvider;
use licensing_server::routes;
use licensing_server::state::AppState;
use licensing_server::storage::DefaultConnector;
use licensing_server::transfer::MimeTableCache;

/// Finished transfer sessions stay queryable this long.
const SESSION_RETENTION_HOURS: i64 = 24;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "licensing_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Licensing Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Mime table: {}", config.transfer.mime_types_url);
    tracing::info!("Transfer pool size: {}", config.transfer.pool_size());

    // Initialize database
    let db_pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database initialized at {}", config.database.url);

    let connector = Arc::new(DefaultConnector::new(config.storage.default_region.clone()));
    let mime = MimeTableCache::new(config.transfer.mime_types_url.clone());
    let app_state = AppState::new(
        config.clone(),
        LicensingProvider::new(db_pool),
        connector,
        mime,
    );

    app_state
        .transfers()
        .registry()
        .clone()
        .start_cleanup_task(chrono::Duration::hours(SESSION_RETENTION_HOURS));

    let app = routes::app(app_state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Licensing Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
