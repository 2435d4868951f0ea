//! # Storage
//!
//! The redb-backed graph store.

mod redb_graph;

pub use redb_graph::{GraphCounts, GraphStore, ReadTxn, WriteTxn};
