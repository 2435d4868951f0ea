//! # fleetgraph CLI Module
//!
//! ## Available Commands
//!
//! - `serve` - Run the bus router, scheduler and HTTP shim
//! - `status` - Show node and edge counts
//! - `dump` - Write a JSON backup
//! - `restore` - Load a JSON backup
//! - `describe` - Show one node through a parent edge
//! - `children` - List descendants of a node

mod commands;

use crate::config::Config;
use crate::error::AppError;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// fleetgraph - IoT fleet state graph
///
/// Nodes hold points, edges carry subtree hashes, rules react to changes.
#[derive(Parser, Debug)]
#[command(name = "fleetgraph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the redb store (overrides config)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Store backend: "redb" or "memory" (overrides config)
    #[arg(short = 'B', long, global = true)]
    pub store: Option<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long = "json", global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the router, scheduler and HTTP shim
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show store status
    Status,

    /// Write nodes, edges and meta as JSON
    Dump {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Upsert nodes, edges and meta from a JSON dump
    Restore {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Describe a node
    Describe {
        /// Node id, or "root"
        id: String,

        /// Parent whose edge to show; "skip" computes the hash on the fly
        #[arg(short, long, default_value = "")]
        parent: String,
    },

    /// List descendants of a node
    Children {
        /// Node id, or "root"
        id: String,

        /// Only nodes of this type
        #[arg(short = 't', long = "type", default_value = "")]
        node_type: String,

        /// Include tombstoned edges
        #[arg(long)]
        include_deleted: bool,

        /// Walk the whole subtree
        #[arg(short, long)]
        recursive: bool,
    },
}

impl Cli {
    /// File and environment configuration with CLI overrides applied.
    pub fn load_config(&self) -> Result<Config, AppError> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(path) = &self.database {
            config.store.path.clone_from(path);
        }
        if let Some(kind) = &self.store {
            config.store.kind = kind.parse()?;
        }
        Ok(config)
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), AppError> {
    let mut config = cli.load_config()?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Serve { host, port }) => {
            if let Some(host) = host {
                config.api.host = host;
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            cmd_serve(&config).await
        }
        Some(Commands::Status) | None => cmd_status(&config, json_mode),
        Some(Commands::Dump { output }) => cmd_dump(&config, &output),
        Some(Commands::Restore { input }) => cmd_restore(&config, &input),
        Some(Commands::Describe { id, parent }) => cmd_describe(&config, &id, &parent),
        Some(Commands::Children {
            id,
            node_type,
            include_deleted,
            recursive,
        }) => cmd_children(&config, &id, &node_type, include_deleted, recursive),
    }
}
