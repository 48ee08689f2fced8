//! Botgate server library.
//!
//! Provides a reusable serve function wiring storage, credentials, the chat
//! gateway and the JSON routes to a port, for the binary and for tests.

#![deny(missing_docs)]

mod cors;
mod error;
mod health;
mod routes;

use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use auth::CredentialGuard;
use axum::{Router, routing::get};
use chat::ChatGateway;
use config::Config;
use storage::Storage;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// Configuration for serving botgate.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized botgate TOML configuration.
    pub config: Config,
}

/// Starts and runs the botgate server with the provided configuration.
pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> anyhow::Result<()> {
    let storage = Storage::connect(&config.database)
        .await
        .map_err(|e| anyhow!("Failed to open the database: {e}"))?;

    let guard = Arc::new(CredentialGuard::new(&config.credentials)?);

    let shutdown = CancellationToken::new();
    let (gateway, recorder_worker) =
        ChatGateway::new(&config.providers, storage.clone(), guard.clone(), shutdown.clone())?;

    let cors = match &config.server.cors {
        Some(cors_config) => cors::generate(cors_config),
        None => CorsLayer::permissive(),
    };

    let mut app = Router::new()
        .merge(routes::router(routes::AppState {
            storage,
            guard,
        }))
        .merge(chat::router(Arc::new(gateway)));

    if config.server.health.enabled {
        app = app.route(&config.server.health.path, get(health::health));
    }

    let app = app.layer(cors);

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    log::info!("Chat endpoint available at: http://{listen_address}/chat/{{provider}}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow!("Server failed: {e}"))?;

    // Stop accepting work, then let the recorder drain its queue.
    shutdown.cancel();

    if let Err(e) = recorder_worker.await {
        log::error!("Recorder worker did not shut down cleanly: {e}");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for the shutdown signal: {e}");
    }
}
