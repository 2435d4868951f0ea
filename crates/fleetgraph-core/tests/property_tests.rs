//! # Property-Based Tests
//!
//! Determinism and round-trip invariants of the graph under random point
//! streams and random tree shapes.

#![allow(clippy::unwrap_used, clippy::panic)]

use fleetgraph_core::hash::{combine, node_digest};
use fleetgraph_core::{
    Edge, GraphStore, Node, NodeId, NodeType, Point, PointIngestor, SubtreeHash, dump, read_backup,
    restore, write_dump,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::sync::Arc;

fn point_strategy() -> impl Strategy<Value = Point> {
    ("[a-z]{1,6}", "[a-z0-9]{0,3}", -1000.0f64..1000.0)
        .prop_map(|(t, k, v)| Point::value(t, v).with_key(k))
}

/// `parents[i]` picks the parent of node `i + 1` among nodes `0..=i`.
fn tree_strategy() -> impl Strategy<Value = Vec<usize>> {
    vec(any::<prop::sample::Index>(), 0..20)
        .prop_map(|picks| picks.iter().enumerate().map(|(i, p)| p.index(i + 1)).collect())
}

fn build_tree(parents: &[usize]) -> PointIngestor {
    let ing = PointIngestor::new(Arc::new(GraphStore::in_memory().expect("store")));
    {
        let guard = ing.lock().expect("lock");
        ing.apply_node_points(&guard, &NodeId::new("n0"), &[Point::value("seed", 0.0)])
            .expect("root");
        for (i, parent) in parents.iter().enumerate() {
            let child = NodeId::new(format!("n{}", i + 1));
            let parent = NodeId::new(format!("n{parent}"));
            ing.apply_edge_points(&guard, &child, &parent, &[]).expect("edge");
            ing.apply_node_points(&guard, &child, &[Point::value("seed", (i + 1) as f64)])
                .expect("points");
        }
    }
    ing
}

fn edge_hashes(store: &GraphStore) -> Vec<((String, String), SubtreeHash)> {
    store
        .edges()
        .expect("edges")
        .into_iter()
        .map(|e| ((e.up.to_string(), e.down.to_string()), e.hash))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Applying the same points twice leaves node state and hashes unchanged.
    #[test]
    fn identical_points_are_idempotent(points in vec(point_strategy(), 1..10)) {
        let ing = build_tree(&[0, 0, 1]);
        let store = Arc::clone(ing.store());
        let target = NodeId::new("n3");
        let now = chrono::Utc::now();
        let stamped: Vec<Point> = points.into_iter().map(|p| p.at(now)).collect();

        let guard = ing.lock().expect("lock");
        ing.apply_node_points(&guard, &target, &stamped).expect("first");
        let node_once = store.node(&target).expect("node");
        let hashes_once = edge_hashes(&store);

        ing.apply_node_points(&guard, &target, &stamped).expect("second");
        prop_assert_eq!(store.node(&target).expect("node"), node_once);
        prop_assert_eq!(edge_hashes(&store), hashes_once);
    }

    /// Every stored edge hash equals a fresh digest of its child node.
    #[test]
    fn stored_hashes_match_fresh_digests(parents in tree_strategy()) {
        let ing = build_tree(&parents);
        let txn = ing.store().read().expect("read");
        for edge in txn.all_edges().expect("edges") {
            let node = ing.store().node(&edge.down).expect("node");
            prop_assert_eq!(edge.hash, node_digest(&txn, &node).expect("digest"));
        }
    }

    /// Child order never changes a node digest.
    #[test]
    fn digest_ignores_child_order(seeds in vec(any::<u8>(), 1..8)) {
        let node = Node::new(NodeId::new("p"), NodeType::Group);
        let edges: Vec<Edge> = seeds
            .iter()
            .map(|s| {
                let mut e = Edge::new(NodeId::new("p"), NodeId::new(format!("c{s}")));
                e.hash = SubtreeHash([*s; 32]);
                e
            })
            .collect();
        let mut reversed = edges.clone();
        reversed.reverse();
        prop_assert_eq!(combine(&node, &edges).expect("hash"), combine(&node, &reversed).expect("hash"));
    }

    /// Dump then restore into an empty store reproduces the graph.
    #[test]
    fn dump_restore_round_trip(parents in tree_strategy()) {
        let source = build_tree(&parents);
        let mut buf = Vec::new();
        write_dump(source.store(), &mut buf).expect("dump");

        let target = PointIngestor::new(Arc::new(GraphStore::in_memory().expect("store")));
        let backup = read_backup(buf.as_slice()).expect("parse");
        restore(target.store(), &target.lock().expect("lock"), &backup).expect("restore");

        let original = dump(source.store()).expect("dump");
        let restored = dump(target.store()).expect("dump");
        prop_assert_eq!(restored.nodes, original.nodes);
        prop_assert_eq!(restored.edges, original.edges);
        prop_assert_eq!(restored.meta.root_id, original.meta.root_id);
    }
}
