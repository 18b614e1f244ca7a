//! Taskboard document server.
//!
//! An axum WebSocket server holding the `tasks`, `groups` and
//! `activity_logs` collections and pushing live query results to clients.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin taskboard-server
//!
//! # Run on a custom address with seed data
//! cargo run --bin taskboard-server -- --bind 127.0.0.1:8080 --seed demo.json
//! ```

use std::sync::Arc;

use clap::Parser;
use taskboard_server::config::{ServerCliArgs, ServerConfig};
use taskboard_server::documents::DocumentStore;
use taskboard_server::server::{self, ServerState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting taskboard document server");

    let store = DocumentStore::new();
    if let Some(seed) = &config.seed_file {
        match store.load_seed(seed).await {
            Ok(count) => tracing::info!(path = %seed.display(), count, "seed data loaded"),
            Err(e) => {
                tracing::error!(error = %e, "failed to load seed data");
                std::process::exit(1);
            }
        }
    }
    let state = Arc::new(ServerState::with_config(config.max_payload_size, store));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "document server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "document server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start document server");
            std::process::exit(1);
        }
    }
}
