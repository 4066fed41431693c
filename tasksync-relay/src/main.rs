//! `tasksync-relay`: document relay for `tasksync` clients.
//!
//! An axum WebSocket server that stores task documents per collection and
//! pushes a fresh snapshot of a collection to its subscribers after every
//! change.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin tasksync-relay
//!
//! # Run on custom address
//! cargo run --bin tasksync-relay -- --bind 127.0.0.1:8080
//! ```

use std::sync::Arc;

use clap::Parser;
use tasksync_relay::config::{RelayCliArgs, RelayConfig};
use tasksync_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting tasksync relay server");

    tracing::info!(
        max_document_size = config.limits.max_document_size,
        max_documents = config.limits.max_documents,
        "document limits"
    );
    let state = Arc::new(RelayState::with_store(config.limits.open_store()));

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
