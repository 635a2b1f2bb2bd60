//! edgelistd - versioned IP list distribution for a CDN control plane
//!
//! Serves the IP list and IP item RPC surface to admins, tenants and edge
//! nodes, and the version-cursor pull protocol nodes sync from.

mod config;
mod db;
mod error;
mod http;
mod metrics;
mod security;
mod services;
mod telemetry;

use crate::config::{Config, LogFormat};
use crate::db::Database;
use crate::security::identity::TokenResolver;
use crate::services::Services;
use crate::services::directory::SqlDirectory;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "edgelist.toml".to_string());

    let config = Config::load(&config_path);

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = config.as_ref().map(|c| c.log.format).unwrap_or_default();
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }

    let config = config.map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validation::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path);
    }

    info!(
        server = %config.server.name,
        listen = %config.server.listen,
        "Starting edgelistd"
    );

    if config.server.metrics {
        metrics::init();
        info!("Metrics initialized");
    } else {
        info!("Metrics disabled");
    }

    // Initialize database
    let db = Database::new(&config.database.path).await?;

    let identity = Arc::new(TokenResolver::new(&config.tokens));
    info!(count = identity.len(), "Loaded bearer tokens");

    let directory = Arc::new(SqlDirectory::new(db.pool().clone()));
    let services = Arc::new(Services::new(db, directory, &config.sync));

    // Observe change signals; the push layer subscribes the same way
    {
        let mut rx = services.notifier.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        metrics::record_notify_signal();
                        debug!(
                            item_id = change.item_id,
                            list_id = change.list_id,
                            version = change.version,
                            "IP item change signalled"
                        );
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change listener lagged behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    let state = http::AppState {
        services,
        identity,
    };
    let app = http::router(state, config.server.metrics);
    http::serve(config.server.listen, app).await?;

    info!("edgelistd stopped");
    Ok(())
}
