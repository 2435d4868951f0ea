//! # redb-backed Graph Storage
//!
//! Nodes, edges and the metadata record live in redb tables:
//!
//! - `nodes`: node id -> postcard `Node`
//! - `edges`: `(up, down)` -> postcard `Edge`
//! - `parent_index`: `(down, up)` -> `()`, for parent lookups
//! - `meta`: `"meta"` -> postcard `Meta`
//!
//! Child scans are a range over `(up, ..)`, parent scans a range over the
//! index. Every mutation opens one write transaction, writes its records,
//! recomputes the hash chain in the same transaction and commits; any error
//! drops the transaction and nothing is persisted.

use crate::graph::{
    DescendantQuery, GraphRead, GraphWrite, descendants, is_ancestor, min_dist_to_root,
    nodes_for_user,
};
use crate::hash::{node_digest, recompute_chain};
use crate::primitives::{NO_PARENT, SCHEMA_VERSION, SKIP_EDGE};
use crate::{Edge, GraphError, Meta, Node, NodeEdge, NodeId, Point, WriteGuard, WriteLock, point_type};
use chrono::Utc;
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Table for nodes: node id -> serialized Node bytes
const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Table for edges: (up, down) -> serialized Edge bytes
const EDGES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("edges");

/// Reverse index: (down, up) -> ()
const PARENT_INDEX: TableDefinition<(&str, &str), ()> = TableDefinition::new("parent_index");

/// Table for the metadata record
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const META_KEY: &str = "meta";

pub(crate) fn storage_err(e: impl std::fmt::Display) -> GraphError {
    GraphError::Internal(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, GraphError> {
    postcard::to_allocvec(value).map_err(|e| GraphError::Internal(format!("encode: {e}")))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, GraphError> {
    postcard::from_bytes(bytes).map_err(|e| GraphError::Internal(format!("decode: {e}")))
}

// =============================================================================
// TABLE HELPERS (shared by read and write transactions)
// =============================================================================

fn get_node<T>(table: &T, id: &NodeId) -> Result<Option<Node>, GraphError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(id.as_str()).map_err(storage_err)? {
        Some(bytes) => decode(bytes.value()).map(Some),
        None => Ok(None),
    }
}

fn get_edge<T>(table: &T, up: &NodeId, down: &NodeId) -> Result<Option<Edge>, GraphError>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    match table
        .get((up.as_str(), down.as_str()))
        .map_err(storage_err)?
    {
        Some(bytes) => decode(bytes.value()).map(Some),
        None => Ok(None),
    }
}

fn child_edges<T>(table: &T, up: &NodeId) -> Result<Vec<Edge>, GraphError>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    let mut edges: Vec<Edge> = Vec::new();
    for entry in table.range((up.as_str(), "")..).map_err(storage_err)? {
        let (key, value) = entry.map_err(storage_err)?;
        if key.value().0 != up.as_str() {
            break;
        }
        edges.push(decode(value.value())?);
    }
    edges.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(edges)
}

fn parent_ids<T>(index: &T, down: &NodeId) -> Result<Vec<NodeId>, GraphError>
where
    T: ReadableTable<(&'static str, &'static str), ()>,
{
    let mut ups = Vec::new();
    for entry in index.range((down.as_str(), "")..).map_err(storage_err)? {
        let (key, _) = entry.map_err(storage_err)?;
        let (d, u) = key.value();
        if d != down.as_str() {
            break;
        }
        ups.push(NodeId::new(u));
    }
    Ok(ups)
}

fn read_meta<T>(table: &T) -> Result<Option<Meta>, GraphError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(META_KEY).map_err(storage_err)? {
        Some(bytes) => decode(bytes.value()).map(Some),
        None => Ok(None),
    }
}

fn fresh_meta() -> Meta {
    Meta {
        schema_version: SCHEMA_VERSION,
        root_id: None,
    }
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

/// A consistent read-only snapshot.
pub struct ReadTxn {
    txn: ReadTransaction,
}

impl ReadTxn {
    /// All nodes, ordered by id.
    pub fn all_nodes(&self) -> Result<Vec<Node>, GraphError> {
        let table = self.txn.open_table(NODES).map_err(storage_err)?;
        let mut nodes = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            nodes.push(decode(value.value())?);
        }
        Ok(nodes)
    }

    /// All edges, ordered by `(up, down)`.
    pub fn all_edges(&self) -> Result<Vec<Edge>, GraphError> {
        let table = self.txn.open_table(EDGES).map_err(storage_err)?;
        let mut edges = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            edges.push(decode(value.value())?);
        }
        Ok(edges)
    }

    pub fn counts(&self) -> Result<GraphCounts, GraphError> {
        let nodes = self.txn.open_table(NODES).map_err(storage_err)?;
        let edges = self.txn.open_table(EDGES).map_err(storage_err)?;
        Ok(GraphCounts {
            nodes: nodes.len().map_err(storage_err)? as usize,
            edges: edges.len().map_err(storage_err)? as usize,
        })
    }
}

impl GraphRead for ReadTxn {
    fn node(&self, id: &NodeId) -> Result<Option<Node>, GraphError> {
        let table = self.txn.open_table(NODES).map_err(storage_err)?;
        get_node(&table, id)
    }

    fn edge(&self, up: &NodeId, down: &NodeId) -> Result<Option<Edge>, GraphError> {
        let table = self.txn.open_table(EDGES).map_err(storage_err)?;
        get_edge(&table, up, down)
    }

    fn all_edges_up(&self, id: &NodeId) -> Result<Vec<Edge>, GraphError> {
        let index = self.txn.open_table(PARENT_INDEX).map_err(storage_err)?;
        let table = self.txn.open_table(EDGES).map_err(storage_err)?;
        let mut edges = Vec::new();
        for up in parent_ids(&index, id)? {
            if let Some(edge) = get_edge(&table, &up, id)? {
                edges.push(edge);
            }
        }
        Ok(edges)
    }

    fn all_edges_down(&self, id: &NodeId) -> Result<Vec<Edge>, GraphError> {
        let table = self.txn.open_table(EDGES).map_err(storage_err)?;
        child_edges(&table, id)
    }

    fn meta(&self) -> Result<Meta, GraphError> {
        let table = self.txn.open_table(META).map_err(storage_err)?;
        Ok(read_meta(&table)?.unwrap_or_else(fresh_meta))
    }
}

/// A write transaction. Dropped without [`WriteTxn::commit`] it aborts.
pub struct WriteTxn {
    txn: WriteTransaction,
}

impl WriteTxn {
    pub fn commit(self) -> Result<(), GraphError> {
        self.txn.commit().map_err(storage_err)
    }

    /// Drop the `(up, down)` record. Only used to retarget an edge.
    fn remove_edge(&mut self, up: &NodeId, down: &NodeId) -> Result<(), GraphError> {
        let mut table = self.txn.open_table(EDGES).map_err(storage_err)?;
        table
            .remove((up.as_str(), down.as_str()))
            .map_err(storage_err)?;
        let mut index = self.txn.open_table(PARENT_INDEX).map_err(storage_err)?;
        index
            .remove((down.as_str(), up.as_str()))
            .map_err(storage_err)?;
        Ok(())
    }
}

impl GraphRead for WriteTxn {
    fn node(&self, id: &NodeId) -> Result<Option<Node>, GraphError> {
        let table = self.txn.open_table(NODES).map_err(storage_err)?;
        get_node(&table, id)
    }

    fn edge(&self, up: &NodeId, down: &NodeId) -> Result<Option<Edge>, GraphError> {
        let table = self.txn.open_table(EDGES).map_err(storage_err)?;
        get_edge(&table, up, down)
    }

    fn all_edges_up(&self, id: &NodeId) -> Result<Vec<Edge>, GraphError> {
        let index = self.txn.open_table(PARENT_INDEX).map_err(storage_err)?;
        let table = self.txn.open_table(EDGES).map_err(storage_err)?;
        let mut edges = Vec::new();
        for up in parent_ids(&index, id)? {
            if let Some(edge) = get_edge(&table, &up, id)? {
                edges.push(edge);
            }
        }
        Ok(edges)
    }

    fn all_edges_down(&self, id: &NodeId) -> Result<Vec<Edge>, GraphError> {
        let table = self.txn.open_table(EDGES).map_err(storage_err)?;
        child_edges(&table, id)
    }

    fn meta(&self) -> Result<Meta, GraphError> {
        let table = self.txn.open_table(META).map_err(storage_err)?;
        Ok(read_meta(&table)?.unwrap_or_else(fresh_meta))
    }
}

impl GraphWrite for WriteTxn {
    fn put_node(&mut self, node: &Node) -> Result<(), GraphError> {
        let bytes = encode(node)?;
        let mut table = self.txn.open_table(NODES).map_err(storage_err)?;
        table
            .insert(node.id.as_str(), bytes.as_slice())
            .map_err(storage_err)?;
        Ok(())
    }

    fn put_edge(&mut self, edge: &Edge) -> Result<(), GraphError> {
        let bytes = encode(edge)?;
        let mut table = self.txn.open_table(EDGES).map_err(storage_err)?;
        table
            .insert((edge.up.as_str(), edge.down.as_str()), bytes.as_slice())
            .map_err(storage_err)?;
        let mut index = self.txn.open_table(PARENT_INDEX).map_err(storage_err)?;
        index
            .insert((edge.down.as_str(), edge.up.as_str()), ())
            .map_err(storage_err)?;
        Ok(())
    }

    fn set_meta(&mut self, meta: &Meta) -> Result<(), GraphError> {
        let bytes = encode(meta)?;
        let mut table = self.txn.open_table(META).map_err(storage_err)?;
        table
            .insert(META_KEY, bytes.as_slice())
            .map_err(storage_err)?;
        Ok(())
    }
}

// =============================================================================
// GRAPH STORE
// =============================================================================

/// Node and edge totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    pub nodes: usize,
    pub edges: usize,
}

/// The persisted fleet graph.
///
/// Reads open their own snapshot and may run from any thread. Mutations
/// require a [`WriteGuard`] taken from [`GraphStore::lock`] and commit
/// node/edge records together with the recomputed hash chain.
pub struct GraphStore {
    db: Database,
    lock: WriteLock,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore").finish_non_exhaustive()
    }
}

impl GraphStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;
        Self::init(db)
    }

    /// A store that lives only in memory.
    pub fn in_memory() -> Result<Self, GraphError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(storage_err)?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, GraphError> {
        let write_txn = db.begin_write().map_err(storage_err)?;
        {
            write_txn.open_table(NODES).map_err(storage_err)?;
            write_txn.open_table(EDGES).map_err(storage_err)?;
            write_txn.open_table(PARENT_INDEX).map_err(storage_err)?;
            let mut meta_table = write_txn.open_table(META).map_err(storage_err)?;
            match read_meta(&meta_table)? {
                None => {
                    let bytes = encode(&fresh_meta())?;
                    meta_table
                        .insert(META_KEY, bytes.as_slice())
                        .map_err(storage_err)?;
                }
                Some(meta) if meta.schema_version > SCHEMA_VERSION => {
                    return Err(GraphError::Internal(format!(
                        "unsupported schema version {} (this build reads up to {SCHEMA_VERSION})",
                        meta.schema_version
                    )));
                }
                Some(_) => {}
            }
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(Self {
            db,
            lock: WriteLock::new(),
        })
    }

    /// Take this store's write capability, blocking until it is free.
    pub fn lock(&self) -> Result<WriteGuard<'_>, GraphError> {
        self.lock.acquire()
    }

    /// Open a read snapshot.
    pub fn read(&self) -> Result<ReadTxn, GraphError> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        Ok(ReadTxn { txn })
    }

    /// Open a write transaction. Only the holder of this store's lock can
    /// do this; a guard from any other lock is rejected.
    pub fn write(&self, guard: &WriteGuard<'_>) -> Result<WriteTxn, GraphError> {
        self.lock.check(guard)?;
        let txn = self.db.begin_write().map_err(storage_err)?;
        Ok(WriteTxn { txn })
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn node(&self, id: &NodeId) -> Result<Node, GraphError> {
        let txn = self.read()?;
        let id = txn.resolve(id)?;
        txn.find_node(&id)
    }

    pub fn edge(&self, up: &NodeId, down: &NodeId) -> Result<Edge, GraphError> {
        self.read()?.find_edge(up, down)
    }

    pub fn edges_up(&self, id: &NodeId, include_tombstoned: bool) -> Result<Vec<Edge>, GraphError> {
        self.read()?.edges_up(id, include_tombstoned)
    }

    pub fn edges_down(&self, id: &NodeId, include_tombstoned: bool) -> Result<Vec<Edge>, GraphError> {
        self.read()?.edges_down(id, include_tombstoned)
    }

    /// See [`crate::graph::descendants`]. `id` may be the `root` alias.
    pub fn descendants(&self, id: &NodeId, query: &DescendantQuery) -> Result<Vec<NodeEdge>, GraphError> {
        let txn = self.read()?;
        let id = txn.resolve(id)?;
        descendants(&txn, &id, query)
    }

    /// A node seen through one parent edge.
    ///
    /// `parent` empty means `none`. `skip` returns the node detached with a
    /// hash computed from its current children. `id` may be the `root` alias.
    pub fn node_edge(&self, id: &NodeId, parent: &str) -> Result<NodeEdge, GraphError> {
        let txn = self.read()?;
        let id = txn.resolve(id)?;
        let node = txn.find_node(&id)?;

        let parent = if parent.is_empty() { NO_PARENT } else { parent };
        if parent == SKIP_EDGE {
            let hash = node_digest(&txn, &node)?;
            return Ok(node.detached(hash));
        }

        let parent = txn.resolve(&NodeId::new(parent))?;
        let edge = txn.find_edge(&parent, &id)?;
        Ok(node.to_node_edge(&edge))
    }

    pub fn meta(&self) -> Result<Meta, GraphError> {
        self.read()?.meta()
    }

    pub fn root_id(&self) -> Result<Option<NodeId>, GraphError> {
        self.read()?.root_id()
    }

    pub fn nodes(&self) -> Result<Vec<Node>, GraphError> {
        self.read()?.all_nodes()
    }

    pub fn edges(&self) -> Result<Vec<Edge>, GraphError> {
        self.read()?.all_edges()
    }

    pub fn counts(&self) -> Result<GraphCounts, GraphError> {
        self.read()?.counts()
    }

    pub fn nodes_for_user(&self, user_id: &NodeId) -> Result<Vec<NodeEdge>, GraphError> {
        nodes_for_user(&self.read()?, user_id)
    }

    pub fn min_dist_to_root(&self, id: &NodeId) -> Result<Option<usize>, GraphError> {
        min_dist_to_root(&self.read()?, id)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Replace a node record and rehash everything above it.
    pub fn upsert_node(&self, guard: &WriteGuard<'_>, node: &Node) -> Result<(), GraphError> {
        let mut txn = self.write(guard)?;
        txn.put_node(node)?;
        recompute_chain(&mut txn, &node.id)?;
        txn.commit()
    }

    /// Replace an edge record and rehash from its child up.
    pub fn upsert_edge(&self, guard: &WriteGuard<'_>, edge: &Edge) -> Result<(), GraphError> {
        let mut txn = self.write(guard)?;
        if !edge.up.is_none() {
            txn.find_node(&edge.up)?;
        }
        txn.put_edge(edge)?;
        recompute_chain(&mut txn, &edge.down)?;
        txn.commit()
    }

    /// Create or replace `node` and link it under `parent`.
    ///
    /// A parent of `none` with no root assigned makes `node` the root.
    /// Re-inserting under a parent whose edge was tombstoned revives it.
    pub fn insert_node_with_edge(
        &self,
        guard: &WriteGuard<'_>,
        node: Node,
        parent: &NodeId,
    ) -> Result<(), GraphError> {
        let mut txn = self.write(guard)?;
        if !parent.is_none() {
            txn.find_node(parent)?;
        }
        if *parent == node.id || is_ancestor(&txn, &node.id, parent)? {
            return Err(GraphError::Validation(format!(
                "{} under {parent} would create a cycle",
                node.id
            )));
        }

        txn.put_node(&node)?;
        match txn.edge(parent, &node.id)? {
            Some(mut edge) if edge.is_tombstone() => {
                edge.points
                    .process_point(Point::flag(point_type::TOMBSTONE, false).at(Utc::now()));
                txn.put_edge(&edge)?;
            }
            Some(_) => {}
            None => txn.put_edge(&Edge::new(parent.clone(), node.id.clone()))?,
        }

        if parent.is_none() {
            let mut meta = txn.meta()?;
            if meta.root_id.is_none() {
                meta.root_id = Some(node.id.clone());
                txn.set_meta(&meta)?;
            }
        }

        recompute_chain(&mut txn, &node.id)?;
        txn.commit()
    }

    /// Atomically retarget the `(old_parent, id)` edge to `new_parent`.
    ///
    /// The edge keeps its id and points. Both the new and the old ancestor
    /// chains are rehashed.
    pub fn move_edge(
        &self,
        guard: &WriteGuard<'_>,
        id: &NodeId,
        old_parent: &NodeId,
        new_parent: &NodeId,
    ) -> Result<(), GraphError> {
        let mut txn = self.write(guard)?;
        let mut edge = txn.find_edge(old_parent, id)?;
        if old_parent == new_parent {
            return Ok(());
        }
        txn.find_node(new_parent)?;
        if txn.edge(new_parent, id)?.is_some() {
            return Err(GraphError::Validation(format!(
                "{id} is already a child of {new_parent}"
            )));
        }
        if new_parent == id || is_ancestor(&txn, id, new_parent)? {
            return Err(GraphError::Validation(format!(
                "moving {id} under {new_parent} would create a cycle"
            )));
        }

        txn.remove_edge(old_parent, id)?;
        edge.up = new_parent.clone();
        txn.put_edge(&edge)?;

        recompute_chain(&mut txn, id)?;
        if !old_parent.is_none() && txn.node(old_parent)?.is_some() {
            recompute_chain(&mut txn, old_parent)?;
        }
        txn.commit()
    }

    /// Link an existing node under a second parent, keeping its other edges.
    ///
    /// Copying onto a parent whose edge was tombstoned revives that edge.
    pub fn copy_edge(
        &self,
        guard: &WriteGuard<'_>,
        id: &NodeId,
        new_parent: &NodeId,
    ) -> Result<(), GraphError> {
        let mut txn = self.write(guard)?;
        txn.find_node(id)?;
        txn.find_node(new_parent)?;

        match txn.edge(new_parent, id)? {
            Some(edge) if !edge.is_tombstone() => return Ok(()),
            Some(mut edge) => {
                edge.points
                    .process_point(Point::flag(point_type::TOMBSTONE, false).at(Utc::now()));
                txn.put_edge(&edge)?;
            }
            None => {
                if new_parent == id || is_ancestor(&txn, id, new_parent)? {
                    return Err(GraphError::Validation(format!(
                        "copying {id} under {new_parent} would create a cycle"
                    )));
                }
                txn.put_edge(&Edge::new(new_parent.clone(), id.clone()))?;
            }
        }

        recompute_chain(&mut txn, id)?;
        txn.commit()
    }

    /// Tombstone the `(parent, id)` edge. Other parent edges of `id` stay live.
    pub fn delete_node(&self, guard: &WriteGuard<'_>, id: &NodeId, parent: &NodeId) -> Result<(), GraphError> {
        let mut txn = self.write(guard)?;
        let mut edge = txn.find_edge(parent, id)?;
        edge.points
            .process_point(Point::flag(point_type::TOMBSTONE, true).at(Utc::now()));
        txn.put_edge(&edge)?;
        recompute_chain(&mut txn, id)?;
        txn.commit()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::NodeType;
    use tempfile::tempdir;

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    fn seeded() -> GraphStore {
        let store = GraphStore::in_memory().expect("store");
        {
            let guard = store.lock().expect("lock");
            store
                .insert_node_with_edge(&guard, Node::new(id("r"), NodeType::Device), &NodeId::none())
                .expect("root");
            store
                .insert_node_with_edge(&guard, Node::new(id("g1"), NodeType::Group), &id("r"))
                .expect("g1");
            store
                .insert_node_with_edge(&guard, Node::new(id("g2"), NodeType::Group), &id("r"))
                .expect("g2");
            store
                .insert_node_with_edge(&guard, Node::new(id("d"), NodeType::Device), &id("g1"))
                .expect("d");
        }
        store
    }

    #[test]
    fn first_parentless_insert_becomes_root() {
        let store = seeded();
        assert_eq!(store.root_id().expect("root"), Some(id("r")));
        assert_eq!(store.node(&id("root")).expect("alias").id, id("r"));
        assert_eq!(
            store.counts().expect("counts"),
            GraphCounts { nodes: 4, edges: 4 }
        );
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = seeded();
        assert!(store.node(&id("nope")).unwrap_err().is_not_found());
        assert!(store.edge(&id("g2"), &id("d")).unwrap_err().is_not_found());
    }

    #[test]
    fn guard_from_another_lock_is_rejected() {
        let store = seeded();
        let other = WriteLock::new();
        let guard = other.acquire().expect("lock");

        let err = store
            .insert_node_with_edge(&guard, Node::new(id("x"), NodeType::Device), &id("r"))
            .unwrap_err();
        assert!(matches!(err, GraphError::Internal(_)));
        assert!(store.node(&id("x")).unwrap_err().is_not_found());
        assert!(store.edge(&id("r"), &id("x")).unwrap_err().is_not_found());
    }

    #[test]
    fn persistence_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("graph.redb");
        let hash_before = {
            let store = GraphStore::open(&path).expect("open");
            let guard = store.lock().expect("lock");
            store
                .insert_node_with_edge(&guard, Node::new(id("r"), NodeType::Device), &NodeId::none())
                .expect("root");
            store
                .insert_node_with_edge(&guard, Node::new(id("c"), NodeType::Device), &id("r"))
                .expect("child");
            store.edge(&NodeId::none(), &id("r")).expect("edge").hash
        };

        let store = GraphStore::open(&path).expect("reopen");
        assert_eq!(store.root_id().expect("root"), Some(id("r")));
        assert_eq!(store.edge(&NodeId::none(), &id("r")).expect("edge").hash, hash_before);
        assert_eq!(store.edges_down(&id("r"), false).expect("children").len(), 1);
    }

    #[test]
    fn child_change_rehashes_every_ancestor() {
        let store = seeded();
        let before_root = store.edge(&NodeId::none(), &id("r")).expect("edge").hash;
        let before_g1 = store.edge(&id("r"), &id("g1")).expect("edge").hash;
        let before_g2 = store.edge(&id("r"), &id("g2")).expect("edge").hash;

        let guard = store.lock().expect("lock");
        let mut d = store.node(&id("d")).expect("d");
        d.points.process_point(Point::value("value", 1.0));
        store.upsert_node(&guard, &d).expect("upsert");

        assert_ne!(store.edge(&NodeId::none(), &id("r")).expect("edge").hash, before_root);
        assert_ne!(store.edge(&id("r"), &id("g1")).expect("edge").hash, before_g1);
        assert_eq!(store.edge(&id("r"), &id("g2")).expect("edge").hash, before_g2);
    }

    #[test]
    fn move_retargets_edge_and_keeps_its_id() {
        let store = seeded();
        let edge_id = store.edge(&id("g1"), &id("d")).expect("edge").id;

        let guard = store.lock().expect("lock");
        store.move_edge(&guard, &id("d"), &id("g1"), &id("g2")).expect("move");

        assert!(store.edge(&id("g1"), &id("d")).unwrap_err().is_not_found());
        assert_eq!(store.edge(&id("g2"), &id("d")).expect("moved").id, edge_id);
        assert_eq!(store.edges_up(&id("d"), false).expect("ups").len(), 1);
        assert!(store.edges_down(&id("g1"), true).expect("g1").is_empty());
    }

    #[test]
    fn move_under_own_descendant_is_rejected() {
        let store = seeded();
        let guard = store.lock().expect("lock");
        let err = store
            .move_edge(&guard, &id("g1"), &id("r"), &id("d"))
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
        // nothing was committed
        assert!(store.edge(&id("r"), &id("g1")).is_ok());
    }

    #[test]
    fn copy_adds_second_parent() {
        let store = seeded();
        let guard = store.lock().expect("lock");
        store.copy_edge(&guard, &id("d"), &id("g2")).expect("copy");

        let ups = store.edges_up(&id("d"), false).expect("ups");
        assert_eq!(ups.len(), 2);
        assert_eq!(ups[0].hash, ups[1].hash);
    }

    #[test]
    fn delete_tombstones_only_the_named_parent_edge() {
        let store = seeded();
        let guard = store.lock().expect("lock");
        store.copy_edge(&guard, &id("d"), &id("g2")).expect("copy");
        store.delete_node(&guard, &id("d"), &id("g1")).expect("delete");

        assert!(store.edge(&id("g1"), &id("d")).expect("edge").is_tombstone());
        assert!(!store.edge(&id("g2"), &id("d")).expect("edge").is_tombstone());
        assert_eq!(store.edges_up(&id("d"), false).expect("live").len(), 1);
        assert_eq!(store.edges_up(&id("d"), true).expect("all").len(), 2);
        // node record is untouched
        assert!(store.node(&id("d")).is_ok());
    }

    #[test]
    fn describe_variants() {
        let store = seeded();

        let root = store.node_edge(&id("root"), "").expect("root");
        assert_eq!(root.id, id("r"));
        assert!(root.parent.is_none());

        let d = store.node_edge(&id("d"), "g1").expect("d");
        assert_eq!(d.hash, store.edge(&id("g1"), &id("d")).expect("edge").hash);

        let skipped = store.node_edge(&id("d"), SKIP_EDGE).expect("skip");
        assert_eq!(skipped.hash, d.hash);
        assert!(skipped.edge_points.is_empty());

        assert!(store.node_edge(&id("d"), "g2").unwrap_err().is_not_found());
    }
}
