//! # Ingestor Module
//!
//! The single-writer entry point for point mutations.
//!
//! - Validate incoming points before touching the store
//! - Stamp unset times with the ingestion time
//! - Merge by `(type, key)` into the node or edge point set
//! - Recompute the hash chain and commit in one transaction

use crate::graph::{GraphRead, GraphWrite, is_ancestor};
use crate::hash::recompute_chain;
use crate::primitives::{MAX_POINTS_PER_MESSAGE, MAX_TEXT_LENGTH};
use crate::storage::{GraphStore, WriteTxn};
use crate::{Edge, GraphError, Node, NodeId, NodeType, Point, WriteGuard, point_type};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Applies point deltas to nodes and edges.
///
/// Writes go through the store's own lock. Callers take the guard with
/// [`PointIngestor::lock`] and keep it for the mutation and everything
/// that must run serialized after it.
#[derive(Debug)]
pub struct PointIngestor {
    store: Arc<GraphStore>,
}

impl PointIngestor {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Take the write capability.
    pub fn lock(&self) -> Result<WriteGuard<'_>, GraphError> {
        self.store.lock()
    }

    /// Validate a point batch.
    ///
    /// A batch is valid if:
    /// - It holds at most `MAX_POINTS_PER_MESSAGE` points
    /// - Every point has a non-empty type
    /// - No type, key or text exceeds `MAX_TEXT_LENGTH`
    /// - Every `nodeType` point names a known node type
    pub fn validate(points: &[Point]) -> Result<(), GraphError> {
        if points.len() > MAX_POINTS_PER_MESSAGE {
            return Err(GraphError::Validation(format!(
                "too many points: {} (max {MAX_POINTS_PER_MESSAGE})",
                points.len()
            )));
        }

        for point in points {
            if point.point_type.is_empty() {
                return Err(GraphError::Validation("point type is empty".to_string()));
            }
            if point.point_type.len() > MAX_TEXT_LENGTH
                || point.key.len() > MAX_TEXT_LENGTH
                || point.text.len() > MAX_TEXT_LENGTH
            {
                return Err(GraphError::Validation(format!(
                    "point {} exceeds {MAX_TEXT_LENGTH} bytes",
                    point.point_type
                )));
            }
            if point.point_type == point_type::NODE_TYPE {
                point.text.parse::<NodeType>()?;
            }
        }

        Ok(())
    }

    /// Merge `points` into node `id`.
    ///
    /// A missing node is created as a device. If no root exists yet and the
    /// new node has no parent, it becomes the root and gets a `none` edge.
    /// `nodeType` points set the node's type and are not stored.
    pub fn apply_node_points(
        &self,
        guard: &WriteGuard<'_>,
        id: &NodeId,
        points: &[Point],
    ) -> Result<(), GraphError> {
        Self::validate(points)?;
        let points = stamp(points, Utc::now());

        let mut txn = self.store.write(guard)?;
        let id = txn.resolve(id)?;
        reject_reserved(&id)?;

        let (mut node, created) = match txn.node(&id)? {
            Some(node) => (node, false),
            None => (Node::new(id.clone(), NodeType::Device), true),
        };

        for point in points {
            if point.point_type == point_type::NODE_TYPE {
                node.node_type = point.text.parse()?;
                continue;
            }
            node.points.process_point(point);
        }
        txn.put_node(&node)?;

        if created && txn.all_edges_up(&id)?.is_empty() {
            claim_root(&mut txn, &id)?;
        }

        recompute_chain(&mut txn, &id)?;
        txn.commit()
    }

    /// Merge `points` into the `(parent, id)` edge, creating it if needed.
    ///
    /// An empty or `none` parent resolves to the current root when the node
    /// has no live parent yet, to the node's only live parent when it has
    /// exactly one, and is rejected when it has several. With no root
    /// assigned the edge hangs off `none` and the node becomes the root.
    pub fn apply_edge_points(
        &self,
        guard: &WriteGuard<'_>,
        id: &NodeId,
        parent: &NodeId,
        points: &[Point],
    ) -> Result<(), GraphError> {
        Self::validate(points)?;
        let points = stamp(points, Utc::now());

        let mut txn = self.store.write(guard)?;
        let id = txn.resolve(id)?;
        reject_reserved(&id)?;
        let parent = resolve_parent(&txn, &id, parent)?;

        if !parent.is_none() {
            txn.find_node(&parent)?;
        }
        if txn.node(&id)?.is_none() {
            txn.put_node(&Node::new(id.clone(), NodeType::Device))?;
        }

        let mut edge = match txn.edge(&parent, &id)? {
            Some(edge) => edge,
            None => {
                if parent == id || is_ancestor(&txn, &id, &parent)? {
                    return Err(GraphError::Validation(format!(
                        "{id} under {parent} would create a cycle"
                    )));
                }
                if parent.is_none() {
                    claim_root(&mut txn, &id)?;
                }
                Edge::new(parent.clone(), id.clone())
            }
        };

        for point in points {
            edge.points.process_point(point);
        }
        txn.put_edge(&edge)?;

        recompute_chain(&mut txn, &id)?;
        txn.commit()
    }
}

fn stamp(points: &[Point], now: DateTime<Utc>) -> Vec<Point> {
    points
        .iter()
        .cloned()
        .map(|mut p| {
            if p.time.is_none() {
                p.time = Some(now);
            }
            p
        })
        .collect()
}

fn reject_reserved(id: &NodeId) -> Result<(), GraphError> {
    if id.is_reserved() {
        return Err(GraphError::Validation(format!("'{id}' is a reserved id")));
    }
    Ok(())
}

/// First writer wins: only takes the root when none is assigned.
fn claim_root(txn: &mut WriteTxn, id: &NodeId) -> Result<(), GraphError> {
    let mut meta = txn.meta()?;
    if meta.root_id.is_some() {
        return Ok(());
    }
    meta.root_id = Some(id.clone());
    txn.set_meta(&meta)?;
    if txn.edge(&NodeId::none(), id)?.is_none() {
        txn.put_edge(&Edge::new(NodeId::none(), id.clone()))?;
    }
    tracing::info!(node_id = %id, "root node assigned");
    Ok(())
}

fn resolve_parent<G: GraphRead + ?Sized>(
    graph: &G,
    id: &NodeId,
    parent: &NodeId,
) -> Result<NodeId, GraphError> {
    let parent = graph.resolve(parent)?;
    if !parent.as_str().is_empty() && !parent.is_none() {
        return Ok(parent);
    }

    match graph.root_id()? {
        Some(root) if root != *id => {
            let ups = graph.edges_up(id, false)?;
            match ups.as_slice() {
                [] => Ok(root),
                [only] => Ok(only.up.clone()),
                _ => Err(GraphError::Validation(format!(
                    "{id} has {} parents; name one",
                    ups.len()
                ))),
            }
        }
        _ => Ok(NodeId::none()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
