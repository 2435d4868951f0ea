//! # Subtree Hashing
//!
//! Every edge `(up -> n)` carries the digest of `n`'s subtree:
//!
//! ```text
//! digest(n) = blake3( postcard(n.id, n.type, n.points)
//!                   ‖ for each child edge e of n, ordered by edge id:
//!                         postcard(e.points) ‖ e.hash )
//! ```
//!
//! All parent edges of a node therefore carry the same digest. A child
//! edge's own points (its tombstone flag included) participate one level
//! up, in the parent's digest.

use crate::graph::{GraphRead, GraphWrite};
use crate::primitives::MAX_TRAVERSAL_DEPTH;
use crate::{Edge, GraphError, Node, NodeId, SubtreeHash};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

fn feed<T: Serialize + ?Sized>(hasher: &mut blake3::Hasher, value: &T) -> Result<(), GraphError> {
    let bytes = postcard::to_allocvec(value)
        .map_err(|e| GraphError::Internal(format!("hash encoding failed: {e}")))?;
    hasher.update(&bytes);
    Ok(())
}

/// Combine a node's own state with its child edges.
///
/// `down_edges` may come in any order; they are sorted by edge id here.
pub fn combine(node: &Node, down_edges: &[Edge]) -> Result<SubtreeHash, GraphError> {
    let mut hasher = blake3::Hasher::new();
    feed(&mut hasher, &(&node.id, node.node_type, &node.points))?;

    let mut ordered: Vec<&Edge> = down_edges.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));
    for edge in ordered {
        feed(&mut hasher, &edge.points)?;
        hasher.update(edge.hash.as_bytes());
    }

    Ok(SubtreeHash(*hasher.finalize().as_bytes()))
}

/// Digest of `node` computed from the stored child edges.
pub fn node_digest<G: GraphRead + ?Sized>(graph: &G, node: &Node) -> Result<SubtreeHash, GraphError> {
    combine(node, &graph.all_edges_down(&node.id)?)
}

/// Recompute and store the hash of every edge from `start` up to the root.
///
/// Ancestors are collected first (tombstoned edges included, missing nodes
/// skipped), then processed children-before-parents so that a node reached
/// over several paths is hashed exactly once, after all of its affected
/// children. Returns the number of edges written.
///
/// # Errors
///
/// - `NotFound` if `start` does not exist.
/// - `RecursionLimit` if the ancestor set is deeper than `MAX_TRAVERSAL_DEPTH`.
/// - `Cycle` if the ancestor set cannot be ordered.
pub fn recompute_chain<W: GraphWrite + ?Sized>(txn: &mut W, start: &NodeId) -> Result<usize, GraphError> {
    txn.find_node(start)?;

    // node -> its parents inside the affected set
    let mut parents: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
    let mut queue = VecDeque::from([(start.clone(), 0usize)]);

    while let Some((id, level)) = queue.pop_front() {
        if parents.contains_key(&id) {
            continue;
        }
        if level > MAX_TRAVERSAL_DEPTH {
            return Err(GraphError::RecursionLimit {
                start: start.to_string(),
                depth: level,
            });
        }

        let mut ups = BTreeSet::new();
        for edge in txn.all_edges_up(&id)? {
            if edge.up.is_none() || txn.node(&edge.up)?.is_none() {
                continue;
            }
            queue.push_back((edge.up.clone(), level + 1));
            ups.insert(edge.up);
        }
        parents.insert(id, ups);
    }

    // pending[n] = affected children of n not yet hashed
    let mut pending: BTreeMap<&NodeId, usize> = parents.keys().map(|id| (id, 0)).collect();
    for ups in parents.values() {
        for up in ups {
            if let Some(count) = pending.get_mut(up) {
                *count += 1;
            }
        }
    }

    let mut ready: VecDeque<NodeId> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| (*id).clone())
        .collect();
    let mut processed = 0usize;
    let mut written = 0usize;

    while let Some(id) = ready.pop_front() {
        processed += 1;
        let node = txn.find_node(&id)?;
        let digest = node_digest(&*txn, &node)?;

        for mut edge in txn.all_edges_up(&id)? {
            if edge.hash != digest {
                edge.hash = digest;
                txn.put_edge(&edge)?;
                written += 1;
            }
        }

        if let Some(ups) = parents.get(&id) {
            for up in ups {
                if let Some(count) = pending.get_mut(up) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.push_back(up.clone());
                    }
                }
            }
        }
    }

    if processed < parents.len() {
        let stuck = pending
            .iter()
            .find(|(_, count)| **count > 0)
            .map(|(id, _)| id.to_string())
            .unwrap_or_default();
        return Err(GraphError::Cycle(stuck));
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NodeType, Point, Points};

    fn node(id: &str, value: f64) -> Node {
        let mut n = Node::new(NodeId::from(id), NodeType::Device);
        n.points.process_point(Point::value("value", value));
        n
    }

    #[test]
    fn combine_is_order_independent() {
        let n = node("n", 1.0);
        let mut a = Edge::new(NodeId::from("n"), NodeId::from("a"));
        a.hash = SubtreeHash([1u8; 32]);
        let mut b = Edge::new(NodeId::from("n"), NodeId::from("b"));
        b.hash = SubtreeHash([2u8; 32]);

        let forward = combine(&n, &[a.clone(), b.clone()]).expect("hash");
        let backward = combine(&n, &[b, a]).expect("hash");
        assert_eq!(forward, backward);
    }

    #[test]
    fn node_points_change_the_digest() {
        let before = combine(&node("n", 1.0), &[]).expect("hash");
        let after = combine(&node("n", 2.0), &[]).expect("hash");
        assert_ne!(before, after);
    }

    #[test]
    fn child_edge_points_change_the_digest() {
        let n = node("n", 1.0);
        let child = Edge::new(NodeId::from("n"), NodeId::from("c"));
        let mut tombstoned = child.clone();
        tombstoned.points = Points::from(vec![Point::flag(crate::point_type::TOMBSTONE, true)]);

        let live = combine(&n, &[child]).expect("hash");
        let dead = combine(&n, &[tombstoned]).expect("hash");
        assert_ne!(live, dead);
    }
}
