//! # Application Errors

use crate::bus::BusError;
use fleetgraph_core::GraphError;
use thiserror::Error;

/// Errors surfaced by the binary: bus, graph, config and I/O failures.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// An error string returned in a bus reply.
    #[error("remote: {0}")]
    Remote(String),

    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(String),

    /// A blocking task panicked or was cancelled.
    #[error("task: {0}")]
    Task(String),
}

impl AppError {
    pub fn is_not_found(&self) -> bool {
        match self {
            AppError::Graph(e) => e.is_not_found(),
            AppError::Remote(msg) => msg.starts_with("not found"),
            _ => false,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Task(e.to_string())
    }
}
