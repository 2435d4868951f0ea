//! # Graph Engine
//!
//! Read/write traits over a storage transaction and the traversal
//! algorithms built on top of them.
//!
//! Every walk here is iterative, carries an explicit visited set and honors
//! `MAX_TRAVERSAL_DEPTH`. Orderings are deterministic: children are visited
//! in edge-id order and result sets are built from `BTreeSet`/`BTreeMap`.

use crate::primitives::{MAX_TRAVERSAL_DEPTH, ROOT_ALIAS};
use crate::{Edge, GraphError, Meta, Node, NodeEdge, NodeId, NodeType};
use std::collections::{BTreeSet, VecDeque};

// =============================================================================
// TRAITS
// =============================================================================

/// Read access to nodes, edges and metadata.
///
/// Implemented by both read and write transactions, so the same traversal
/// code runs against committed state and against a mutation in flight.
pub trait GraphRead {
    /// Lookup a node by id.
    fn node(&self, id: &NodeId) -> Result<Option<Node>, GraphError>;

    /// Lookup the edge `(up, down)`.
    fn edge(&self, up: &NodeId, down: &NodeId) -> Result<Option<Edge>, GraphError>;

    /// Every edge whose `down` is `id`, tombstoned or not.
    fn all_edges_up(&self, id: &NodeId) -> Result<Vec<Edge>, GraphError>;

    /// Every edge whose `up` is `id`, tombstoned or not, ordered by edge id.
    fn all_edges_down(&self, id: &NodeId) -> Result<Vec<Edge>, GraphError>;

    /// The metadata record.
    fn meta(&self) -> Result<Meta, GraphError>;

    /// Like [`GraphRead::node`] but unknown ids are `NotFound`.
    fn find_node(&self, id: &NodeId) -> Result<Node, GraphError> {
        self.node(id)?
            .ok_or_else(|| GraphError::NotFound(format!("node {id}")))
    }

    /// Like [`GraphRead::edge`] but unknown pairs are `NotFound`.
    fn find_edge(&self, up: &NodeId, down: &NodeId) -> Result<Edge, GraphError> {
        self.edge(up, down)?
            .ok_or_else(|| GraphError::NotFound(format!("edge {up} -> {down}")))
    }

    /// Parent edges of `id`.
    fn edges_up(&self, id: &NodeId, include_tombstoned: bool) -> Result<Vec<Edge>, GraphError> {
        let mut edges = self.all_edges_up(id)?;
        if !include_tombstoned {
            edges.retain(|e| !e.is_tombstone());
        }
        Ok(edges)
    }

    /// Child edges of `id`, ordered by edge id.
    fn edges_down(&self, id: &NodeId, include_tombstoned: bool) -> Result<Vec<Edge>, GraphError> {
        let mut edges = self.all_edges_down(id)?;
        if !include_tombstoned {
            edges.retain(|e| !e.is_tombstone());
        }
        Ok(edges)
    }

    fn root_id(&self) -> Result<Option<NodeId>, GraphError> {
        Ok(self.meta()?.root_id)
    }

    /// Map the `root` alias to the current root id; other ids pass through.
    fn resolve(&self, id: &NodeId) -> Result<NodeId, GraphError> {
        if id.as_str() != ROOT_ALIAS {
            return Ok(id.clone());
        }
        self.root_id()?
            .ok_or_else(|| GraphError::NotFound("root node not assigned".to_string()))
    }
}

/// Raw record writes. Hash maintenance is the caller's job.
pub trait GraphWrite: GraphRead {
    fn put_node(&mut self, node: &Node) -> Result<(), GraphError>;
    fn put_edge(&mut self, edge: &Edge) -> Result<(), GraphError>;
    fn set_meta(&mut self, meta: &Meta) -> Result<(), GraphError>;
}

// =============================================================================
// DESCENDANTS
// =============================================================================

/// Filter for [`descendants`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescendantQuery {
    /// Only return nodes of this type. Traversal still passes through others.
    pub node_type: Option<NodeType>,
    /// Walk the whole subtree instead of the immediate children.
    pub recursive: bool,
    /// Return nodes reached through tombstoned edges.
    pub include_deleted: bool,
}

impl DescendantQuery {
    pub fn children() -> Self {
        Self::default()
    }

    pub fn subtree() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn of_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    #[must_use]
    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }
}

enum Step {
    Enter { edge: Edge, level: usize },
    Leave,
}

/// Nodes below `id`, each paired with the edge it was reached through.
///
/// Depth-first, children in edge-id order. Tombstoned edges are never
/// descended into; with `include_deleted` the tombstoned child itself is
/// still returned. A node reachable over several parents is returned once
/// per edge.
///
/// # Errors
///
/// - `RecursionLimit` when the walk goes deeper than `MAX_TRAVERSAL_DEPTH`.
/// - `Cycle` when a node shows up again on its own ancestor path.
pub fn descendants<G: GraphRead + ?Sized>(
    graph: &G,
    id: &NodeId,
    query: &DescendantQuery,
) -> Result<Vec<NodeEdge>, GraphError> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    let mut path = vec![id.clone()];
    let mut stack: Vec<Step> = graph
        .all_edges_down(id)?
        .into_iter()
        .rev()
        .map(|edge| Step::Enter { edge, level: 1 })
        .collect();

    while let Some(step) = stack.pop() {
        let (edge, level) = match step {
            Step::Leave => {
                path.pop();
                continue;
            }
            Step::Enter { edge, level } => (edge, level),
        };

        if level > MAX_TRAVERSAL_DEPTH {
            return Err(GraphError::RecursionLimit {
                start: id.to_string(),
                depth: level,
            });
        }
        if !visited.insert(edge.id.clone()) {
            continue;
        }

        let tombstone = edge.is_tombstone();
        if tombstone && !query.include_deleted {
            continue;
        }

        let Some(node) = graph.node(&edge.down)? else {
            tracing::warn!(node_id = %edge.down, parent = %edge.up, "edge points at missing node");
            continue;
        };

        if query.node_type.is_none_or(|t| t == node.node_type) {
            out.push(node.to_node_edge(&edge));
        }

        if query.recursive && !tombstone {
            if path.contains(&edge.down) {
                return Err(GraphError::Cycle(edge.down.to_string()));
            }
            let children = graph.all_edges_down(&edge.down)?;
            path.push(edge.down);
            stack.push(Step::Leave);
            stack.extend(
                children
                    .into_iter()
                    .rev()
                    .map(|child| Step::Enter { edge: child, level: level + 1 }),
            );
        }
    }

    Ok(out)
}

// =============================================================================
// ANCESTOR WALKS
// =============================================================================

/// Shortest distance from `id` up to the root over live edges.
///
/// Returns `Ok(None)` when no live path reaches the root.
pub fn min_dist_to_root<G: GraphRead + ?Sized>(
    graph: &G,
    id: &NodeId,
) -> Result<Option<usize>, GraphError> {
    let Some(root) = graph.root_id()? else {
        return Ok(None);
    };

    let mut queue = VecDeque::from([(id.clone(), 0usize)]);
    let mut visited = BTreeSet::new();

    while let Some((current, dist)) = queue.pop_front() {
        if current == root {
            return Ok(Some(dist));
        }
        if dist >= MAX_TRAVERSAL_DEPTH {
            return Err(GraphError::RecursionLimit {
                start: id.to_string(),
                depth: dist,
            });
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        for edge in graph.edges_up(&current, false)? {
            if !edge.up.is_none() {
                queue.push_back((edge.up, dist + 1));
            }
        }
    }

    Ok(None)
}

/// Whether `ancestor` can be reached from `id` by walking parent edges,
/// tombstoned ones included.
pub fn is_ancestor<G: GraphRead + ?Sized>(
    graph: &G,
    ancestor: &NodeId,
    id: &NodeId,
) -> Result<bool, GraphError> {
    let mut stack = vec![id.clone()];
    let mut visited = BTreeSet::new();

    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        for edge in graph.all_edges_up(&current)? {
            if edge.up == *ancestor {
                return Ok(true);
            }
            if !edge.up.is_none() {
                stack.push(edge.up);
            }
        }
    }

    Ok(false)
}

/// Every node a user can see: each live parent of the user plus that
/// parent's live subtree, de-duplicated by `(id, parent)`.
///
/// Parents are returned detached (parent `none`) with a freshly computed hash.
pub fn nodes_for_user<G: GraphRead + ?Sized>(
    graph: &G,
    user_id: &NodeId,
) -> Result<Vec<NodeEdge>, GraphError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut push = |ne: NodeEdge, out: &mut Vec<NodeEdge>| {
        if seen.insert((ne.id.clone(), ne.parent.clone())) {
            out.push(ne);
        }
    };

    let user_edges = graph.edges_up(user_id, false)?;
    if user_edges.is_empty() {
        return Err(GraphError::NotFound(format!("user {user_id} has no parent")));
    }

    for user_edge in user_edges {
        let parent_id = user_edge.up;
        if parent_id.is_none() {
            continue;
        }
        let parent = graph.find_node(&parent_id)?;
        let hash = crate::hash::node_digest(graph, &parent)?;
        push(parent.detached(hash), &mut out);
        for ne in descendants(graph, &parent_id, &DescendantQuery::subtree())? {
            push(ne, &mut out);
        }
    }

    Ok(out)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::GraphStore;
    use crate::{Point, point_type};

    fn tree() -> GraphStore {
        // root -> a -> b, root -> c
        let store = GraphStore::in_memory().expect("store");
        {
            let guard = store.lock().expect("lock");
            let root = Node::new(NodeId::from("root-id"), NodeType::Device);
            store.insert_node_with_edge(&guard, root, &NodeId::none()).expect("root");
            for (id, parent, t) in [
                ("a", "root-id", NodeType::Group),
                ("b", "a", NodeType::Rule),
                ("c", "root-id", NodeType::Device),
            ] {
                store
                    .insert_node_with_edge(&guard, Node::new(NodeId::from(id), t), &NodeId::from(parent))
                    .expect("insert");
            }
        }
        store
    }

    fn ids(nodes: &[NodeEdge]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn immediate_children_only_by_default() {
        let store = tree();
        let txn = store.read().expect("txn");
        let found = descendants(&txn, &NodeId::from("root-id"), &DescendantQuery::children())
            .expect("descendants");
        let mut got = ids(&found);
        got.sort_unstable();
        assert_eq!(got, vec!["a", "c"]);
    }

    #[test]
    fn recursive_walk_with_type_filter() {
        let store = tree();
        let txn = store.read().expect("txn");
        let query = DescendantQuery::subtree().of_type(NodeType::Rule);
        let found = descendants(&txn, &NodeId::from("root-id"), &query).expect("descendants");
        assert_eq!(ids(&found), vec!["b"]);
        assert_eq!(found[0].parent, NodeId::from("a"));
    }

    #[test]
    fn tombstoned_subtree_is_not_descended() {
        let store = tree();
        {
            let guard = store.lock().expect("lock");
            store
                .delete_node(&guard, &NodeId::from("a"), &NodeId::from("root-id"))
                .expect("delete");
        }
        let txn = store.read().expect("txn");
        let root = NodeId::from("root-id");

        let live = descendants(&txn, &root, &DescendantQuery::subtree()).expect("live");
        assert_eq!(ids(&live), vec!["c"]);

        let all = descendants(&txn, &root, &DescendantQuery::subtree().include_deleted(true))
            .expect("all");
        let mut got = ids(&all);
        got.sort_unstable();
        assert_eq!(got, vec!["a", "c"]);
    }

    #[test]
    fn root_alias_resolves() {
        let store = tree();
        let txn = store.read().expect("txn");
        assert_eq!(txn.resolve(&NodeId::from("root")).expect("resolve"), NodeId::from("root-id"));
        assert!(is_ancestor(&txn, &NodeId::from("root-id"), &NodeId::from("b")).expect("walk"));
        assert!(!is_ancestor(&txn, &NodeId::from("c"), &NodeId::from("b")).expect("walk"));
    }

    #[test]
    fn distance_to_root() {
        let store = tree();
        let txn = store.read().expect("txn");
        assert_eq!(min_dist_to_root(&txn, &NodeId::from("b")).expect("dist"), Some(2));
        assert_eq!(min_dist_to_root(&txn, &NodeId::from("root-id")).expect("dist"), Some(0));
        assert_eq!(min_dist_to_root(&txn, &NodeId::from("nobody")).expect("dist"), None);
    }

    #[test]
    fn user_sees_parent_and_its_subtree() {
        let store = tree();
        {
            let guard = store.lock().expect("lock");
            let mut user = Node::new(NodeId::from("u"), NodeType::User);
            user.points.process_point(Point::text(point_type::EMAIL, "u@example.com"));
            store.insert_node_with_edge(&guard, user, &NodeId::from("a")).expect("user");
        }
        let txn = store.read().expect("txn");
        let visible = nodes_for_user(&txn, &NodeId::from("u")).expect("visible");
        let mut got = ids(&visible);
        got.sort_unstable();
        assert_eq!(got, vec!["a", "b", "u"]);
    }
}
