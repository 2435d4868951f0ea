//! # fleetgraph
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    apps/fleetgraph (THE BINARY)              │
//! │                                                              │
//! │  ┌──────────┐   ┌──────────┐   ┌───────────┐  ┌───────────┐ │
//! │  │   CLI    │   │ HTTP shim│──▶│    bus    │◀─│ scheduler │ │
//! │  │  (clap)  │   │  (axum)  │   │ (tokio)   │  └───────────┘ │
//! │  └────┬─────┘   └──────────┘   └─────┬─────┘                │
//! │       │                              ▼                      │
//! │       │                       ┌──────────────┐              │
//! │       └──────────────────────▶│   router     │              │
//! │                               └──────┬───────┘              │
//! │                                      ▼                      │
//! │                             ┌─────────────────┐             │
//! │                             │ fleetgraph-core │             │
//! │                             └─────────────────┘             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! fleetgraph serve --port 8080
//! fleetgraph status
//! fleetgraph dump -o backup.json
//! fleetgraph children root --recursive
//! ```

use clap::Parser;
use fleetgraph::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // FLEETGRAPH_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("FLEETGRAPH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fleetgraph=info,fleetgraph_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
