//! # Backup and Restore
//!
//! A full-graph document `{nodes, edges, meta}` for dump/reload outside
//! the bus. Stored hashes travel with their edges, so a restored graph is
//! content-equal to the dumped one.

use crate::graph::{GraphRead, GraphWrite};
use crate::primitives::SCHEMA_VERSION;
use crate::storage::GraphStore;
use crate::{Edge, GraphError, Meta, Node, WriteGuard};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Maximum node count accepted by [`read_backup`].
pub const MAX_RESTORE_NODE_COUNT: usize = 1_000_000;

/// Maximum edge count accepted by [`read_backup`].
pub const MAX_RESTORE_EDGE_COUNT: usize = 10_000_000;

/// Full-graph backup document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub meta: Meta,
}

/// Snapshot the whole graph from one read transaction.
pub fn dump(store: &GraphStore) -> Result<Backup, GraphError> {
    let txn = store.read()?;
    Ok(Backup {
        nodes: txn.all_nodes()?,
        edges: txn.all_edges()?,
        meta: txn.meta()?,
    })
}

/// Write a dump as pretty JSON.
pub fn write_dump<W: Write>(store: &GraphStore, writer: W) -> Result<Backup, GraphError> {
    let backup = dump(store)?;
    serde_json::to_writer_pretty(writer, &backup)
        .map_err(|e| GraphError::Internal(format!("write backup: {e}")))?;
    Ok(backup)
}

/// Parse a backup document.
pub fn read_backup<R: Read>(reader: R) -> Result<Backup, GraphError> {
    let backup: Backup = serde_json::from_reader(reader)
        .map_err(|e| GraphError::Validation(format!("invalid backup: {e}")))?;

    if backup.nodes.len() > MAX_RESTORE_NODE_COUNT {
        return Err(GraphError::Validation(format!(
            "backup holds {} nodes (max {MAX_RESTORE_NODE_COUNT})",
            backup.nodes.len()
        )));
    }
    if backup.edges.len() > MAX_RESTORE_EDGE_COUNT {
        return Err(GraphError::Validation(format!(
            "backup holds {} edges (max {MAX_RESTORE_EDGE_COUNT})",
            backup.edges.len()
        )));
    }
    if backup.meta.schema_version > SCHEMA_VERSION {
        return Err(GraphError::Validation(format!(
            "backup schema version {} is newer than {SCHEMA_VERSION}",
            backup.meta.schema_version
        )));
    }
    Ok(backup)
}

/// Upsert every node and edge of `backup` in one transaction.
///
/// The metadata record is replaced only when the backup names a root.
pub fn restore(store: &GraphStore, guard: &WriteGuard<'_>, backup: &Backup) -> Result<(), GraphError> {
    if backup.meta.schema_version > SCHEMA_VERSION {
        return Err(GraphError::Validation(format!(
            "backup schema version {} is newer than {SCHEMA_VERSION}",
            backup.meta.schema_version
        )));
    }

    let mut txn = store.write(guard)?;
    for node in &backup.nodes {
        txn.put_node(node)?;
    }
    for edge in &backup.edges {
        txn.put_edge(edge)?;
    }
    if backup.meta.root_id.as_ref().is_some_and(|id| !id.as_str().is_empty()) {
        txn.set_meta(&Meta {
            schema_version: SCHEMA_VERSION,
            root_id: backup.meta.root_id.clone(),
        })?;
    }
    txn.commit()?;

    tracing::info!(
        nodes = backup.nodes.len(),
        edges = backup.edges.len(),
        "backup restored"
    );
    Ok(())
}
