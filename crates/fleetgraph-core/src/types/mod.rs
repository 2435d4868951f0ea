//! # Core Type Definitions
//!
//! This module contains all core types for the fleet state graph:
//! - Identifiers (`NodeId`, `EdgeId`)
//! - State facts (`Point`, `Points`)
//! - Graph records (`Node`, `Edge`, `Meta`) and the `NodeEdge` view
//! - The closed node type table (`NodeType`, `Behavior`)
//! - Subtree digests (`SubtreeHash`)
//! - Error types (`GraphError`)

mod point;

pub use point::{Point, Points, bool_to_value, point_type};

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Opaque, globally unique node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The parent sentinel carried by the root node's own edge.
    pub fn none() -> Self {
        Self(crate::primitives::NO_PARENT.to_string())
    }

    pub fn is_none(&self) -> bool {
        self.0 == crate::primitives::NO_PARENT
    }

    /// Empty, `none` and `skip` are wire sentinels and never name a node.
    pub fn is_reserved(&self) -> bool {
        self.0.is_empty() || self.is_none() || self.0 == crate::primitives::SKIP_EDGE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Synthetic edge identifier; distinguishes multiple parents of one node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// NODE TYPES
// =============================================================================

/// Closed set of node type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Device,
    Group,
    User,
    Rule,
    Condition,
    Action,
    ActionInactive,
    Db,
    MsgService,
    Variable,
    Modbus,
    ModbusIo,
}

/// What the upstream walk and the scheduler do with a node of a given type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Plain state holder.
    Passive,
    /// Schedule-bearing container the scheduler walks into.
    Container,
    /// Evaluated by the rule engine.
    RuleEvaluation,
    /// Part of a rule's definition; only read through the rule.
    RulePart,
    /// Time-series export target.
    SeriesExport,
    /// Notification recipient.
    Recipient,
    /// Message delivery service.
    Delivery,
}

/// Tag → behavior lookup table.
const BEHAVIORS: [(NodeType, Behavior); 12] = [
    (NodeType::Device, Behavior::Passive),
    (NodeType::Group, Behavior::Container),
    (NodeType::User, Behavior::Recipient),
    (NodeType::Rule, Behavior::RuleEvaluation),
    (NodeType::Condition, Behavior::RulePart),
    (NodeType::Action, Behavior::RulePart),
    (NodeType::ActionInactive, Behavior::RulePart),
    (NodeType::Db, Behavior::SeriesExport),
    (NodeType::MsgService, Behavior::Delivery),
    (NodeType::Variable, Behavior::Passive),
    (NodeType::Modbus, Behavior::Passive),
    (NodeType::ModbusIo, Behavior::Passive),
];

impl NodeType {
    pub const ALL: [NodeType; 12] = [
        NodeType::Device,
        NodeType::Group,
        NodeType::User,
        NodeType::Rule,
        NodeType::Condition,
        NodeType::Action,
        NodeType::ActionInactive,
        NodeType::Db,
        NodeType::MsgService,
        NodeType::Variable,
        NodeType::Modbus,
        NodeType::ModbusIo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Device => "device",
            NodeType::Group => "group",
            NodeType::User => "user",
            NodeType::Rule => "rule",
            NodeType::Condition => "condition",
            NodeType::Action => "action",
            NodeType::ActionInactive => "actionInactive",
            NodeType::Db => "db",
            NodeType::MsgService => "msgService",
            NodeType::Variable => "variable",
            NodeType::Modbus => "modbus",
            NodeType::ModbusIo => "modbusIo",
        }
    }

    pub fn behavior(self) -> Behavior {
        BEHAVIORS
            .iter()
            .find(|(t, _)| *t == self)
            .map(|(_, b)| *b)
            .unwrap_or(Behavior::Passive)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| GraphError::Validation(format!("unknown node type: {s}")))
    }
}

// =============================================================================
// SUBTREE HASH
// =============================================================================

/// Merkle-style digest of an edge's subtree.
///
/// Raw bytes in binary formats, base64 in human-readable ones.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubtreeHash(pub [u8; 32]);

impl SubtreeHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self, GraphError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|e| GraphError::Validation(format!("invalid hash encoding: {e}")))?;
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, GraphError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GraphError::Validation(format!("hash must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for SubtreeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubtreeHash({})", self.to_base64())
    }
}

impl Serialize for SubtreeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_base64())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for SubtreeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HashVisitor;

        impl de::Visitor<'_> for HashVisitor {
            type Value = SubtreeHash;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 32 byte digest or its base64 encoding")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                SubtreeHash::from_base64(v).map_err(E::custom)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                SubtreeHash::from_slice(v).map_err(E::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(HashVisitor)
        } else {
            deserializer.deserialize_bytes(HashVisitor)
        }
    }
}

// =============================================================================
// NODE / EDGE / META
// =============================================================================

/// A typed bag of points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub points: Points,
}

impl Node {
    pub fn new(id: NodeId, node_type: NodeType) -> Self {
        Self {
            id,
            node_type,
            points: Points::new(),
        }
    }

    /// Pair this node with the edge it was reached through.
    pub fn to_node_edge(&self, edge: &Edge) -> NodeEdge {
        NodeEdge {
            id: self.id.clone(),
            node_type: self.node_type,
            parent: edge.up.clone(),
            points: self.points.clone(),
            edge_points: edge.points.clone(),
            hash: edge.hash,
        }
    }

    /// This node outside of any edge, with `parent` set to `none`.
    pub fn detached(&self, hash: SubtreeHash) -> NodeEdge {
        NodeEdge {
            id: self.id.clone(),
            node_type: self.node_type,
            parent: NodeId::none(),
            points: self.points.clone(),
            edge_points: Points::new(),
            hash,
        }
    }

    pub fn description(&self) -> &str {
        self.points.text(point_type::DESCRIPTION, "").unwrap_or_default()
    }
}

/// "`down` is a child of `up`", with its own points and subtree hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub up: NodeId,
    pub down: NodeId,
    #[serde(default)]
    pub points: Points,
    #[serde(default)]
    pub hash: SubtreeHash,
}

impl Edge {
    pub fn new(up: NodeId, down: NodeId) -> Self {
        Self {
            id: EdgeId::generate(),
            up,
            down,
            points: Points::new(),
            hash: SubtreeHash::default(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.points.value_bool(point_type::TOMBSTONE, "")
    }
}

/// Fleet-wide singleton record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Meta {
    #[serde(rename = "version")]
    pub schema_version: u32,
    #[serde(rename = "rootID", default)]
    pub root_id: Option<NodeId>,
}

/// A node as seen through one of its parent edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEdge {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub parent: NodeId,
    #[serde(default)]
    pub points: Points,
    #[serde(rename = "edgePoints", default)]
    pub edge_points: Points,
    #[serde(default)]
    pub hash: SubtreeHash,
}

impl NodeEdge {
    pub fn is_tombstone(&self) -> bool {
        self.edge_points.value_bool(point_type::TOMBSTONE, "")
    }

    pub fn description(&self) -> &str {
        self.points.text(point_type::DESCRIPTION, "").unwrap_or_default()
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by the graph core.
///
/// `NotFound` and `Validation` are reported back to the requester and are
/// otherwise harmless. `RecursionLimit` and `Cycle` are data-integrity
/// signals that abort one traversal branch. `Internal` aborts the enclosing
/// transaction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    /// Unknown node or edge id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed incoming payload or request.
    #[error("validation error: {0}")]
    Validation(String),

    /// A traversal went deeper than the hard depth bound.
    #[error("recursion limit reached walking from {start} (depth {depth})")]
    RecursionLimit { start: String, depth: usize },

    /// A traversal came back to a node already on its path.
    #[error("cycle detected at node {0}")]
    Cycle(String),

    /// Storage engine, serialization or lock failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure of an external side effect (sink write, action, delivery).
///
/// Never aborts a mutation; logged by whoever triggered the effect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EffectError(pub String);

impl EffectError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl GraphError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GraphError::NotFound(_))
    }

    /// Errors that indicate the store itself is unhealthy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GraphError::Internal(_))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_type_round_trips_through_str() {
        for t in NodeType::ALL {
            assert_eq!(t.as_str().parse::<NodeType>().expect("parse"), t);
        }
        assert!(matches!(
            "toaster".parse::<NodeType>(),
            Err(GraphError::Validation(_))
        ));
    }

    #[test]
    fn node_type_serde_matches_as_str() {
        let json = serde_json::to_string(&NodeType::ActionInactive).expect("encode");
        assert_eq!(json, "\"actionInactive\"");
    }

    #[test]
    fn behavior_table_covers_rules_and_sinks() {
        assert_eq!(NodeType::Rule.behavior(), Behavior::RuleEvaluation);
        assert_eq!(NodeType::Db.behavior(), Behavior::SeriesExport);
        assert_eq!(NodeType::Group.behavior(), Behavior::Container);
        assert_eq!(NodeType::Device.behavior(), Behavior::Passive);
    }

    #[test]
    fn hash_is_base64_in_json_and_bytes_in_postcard() {
        let hash = SubtreeHash([7u8; 32]);

        let json = serde_json::to_string(&hash).expect("json");
        assert_eq!(json, format!("\"{}\"", hash.to_base64()));
        let back: SubtreeHash = serde_json::from_str(&json).expect("json back");
        assert_eq!(back, hash);

        let bytes = postcard::to_allocvec(&hash).expect("postcard");
        let back: SubtreeHash = postcard::from_bytes(&bytes).expect("postcard back");
        assert_eq!(back, hash);
    }

    #[test]
    fn edge_tombstone_reads_point() {
        let mut edge = Edge::new(NodeId::from("a"), NodeId::from("b"));
        assert!(!edge.is_tombstone());
        edge.points.process_point(Point::flag(point_type::TOMBSTONE, true));
        assert!(edge.is_tombstone());
    }

    #[test]
    fn error_classification() {
        assert!(GraphError::NotFound("x".into()).is_not_found());
        assert!(GraphError::Internal("disk".into()).is_fatal());
        assert!(!GraphError::Validation("bad".into()).is_fatal());
    }
}
