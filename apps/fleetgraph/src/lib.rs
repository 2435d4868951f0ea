//! # fleetgraph
//!
//! The async side of the fleet state graph: an in-process subject bus, the
//! message router and scheduler around `fleetgraph-core`, plus a thin HTTP
//! shim and the CLI.

pub mod api;
pub mod bus;
pub mod cli;
pub mod client;
pub mod config;
pub mod effects;
pub mod error;
pub mod metrics;
pub mod router;
pub mod scheduler;
pub mod service;

pub use bus::{Bus, BusError, BusMessage, Subscription};
pub use client::BusClient;
pub use config::Config;
pub use error::AppError;
pub use router::MessageRouter;
pub use service::FleetService;
