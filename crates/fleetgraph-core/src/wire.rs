//! # Wire Payloads
//!
//! Bus subjects and the JSON payloads carried on them.
//!
//! | Subject                  | Payload                | Reply                 |
//! |--------------------------|------------------------|-----------------------|
//! | `node.<id>.points`       | `[Point]`              | empty or error string |
//! | `node.<id>.<up>.points`  | `[Point]`              | empty or error string |
//! | `node.<id>`              | parent id, `skip`, ""  | `NodeReply`           |
//! | `node.<id>.children`     | `ChildrenRequest`      | `NodesReply`          |
//! | `node.<id>.not`          | `Notification`         | none                  |
//! | `node.<id>.msg`          | `Message`              | none                  |

use crate::graph::DescendantQuery;
use crate::{GraphError, NodeEdge, NodeId, NodeType, Point};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription patterns for every handled subject.
pub mod pattern {
    pub const NODE_POINTS: &str = "node.*.points";
    pub const EDGE_POINTS: &str = "node.*.*.points";
    pub const DESCRIBE: &str = "node.*";
    pub const CHILDREN: &str = "node.*.children";
    pub const NOTIFICATION: &str = "node.*.not";
    pub const MESSAGE: &str = "node.*.msg";
}

// =============================================================================
// SUBJECTS
// =============================================================================

/// A parsed bus subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    NodePoints(NodeId),
    EdgePoints { id: NodeId, parent: NodeId },
    Describe(NodeId),
    Children(NodeId),
    Notification(NodeId),
    Message(NodeId),
}

impl Subject {
    pub fn parse(subject: &str) -> Result<Self, GraphError> {
        let tokens: Vec<&str> = subject.split('.').collect();
        if tokens.iter().skip(1).any(|t| t.is_empty()) {
            return Err(GraphError::Validation(format!("empty token in subject {subject}")));
        }

        let parsed = match tokens.as_slice() {
            ["node", id] => Subject::Describe(NodeId::from(*id)),
            ["node", id, "points"] => Subject::NodePoints(NodeId::from(*id)),
            ["node", id, "children"] => Subject::Children(NodeId::from(*id)),
            ["node", id, "not"] => Subject::Notification(NodeId::from(*id)),
            ["node", id, "msg"] => Subject::Message(NodeId::from(*id)),
            ["node", id, parent, "points"] => Subject::EdgePoints {
                id: NodeId::from(*id),
                parent: NodeId::from(*parent),
            },
            _ => {
                return Err(GraphError::Validation(format!("unknown subject {subject}")));
            }
        };
        Ok(parsed)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::NodePoints(id) => write!(f, "node.{id}.points"),
            Subject::EdgePoints { id, parent } => write!(f, "node.{id}.{parent}.points"),
            Subject::Describe(id) => write!(f, "node.{id}"),
            Subject::Children(id) => write!(f, "node.{id}.children"),
            Subject::Notification(id) => write!(f, "node.{id}.not"),
            Subject::Message(id) => write!(f, "node.{id}.msg"),
        }
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

pub fn encode_points(points: &[Point]) -> Result<Vec<u8>, GraphError> {
    encode(&points)
}

pub fn decode_points(payload: &[u8]) -> Result<Vec<Point>, GraphError> {
    decode(payload)
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, GraphError> {
    serde_json::to_vec(value).map_err(|e| GraphError::Internal(format!("encode: {e}")))
}

/// Decode a JSON payload; malformed input is a `Validation` error.
pub fn decode<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> Result<T, GraphError> {
    serde_json::from_slice(payload).map_err(|e| GraphError::Validation(format!("decode: {e}")))
}

/// Reply for a mutation: empty on success, the error text otherwise.
pub fn status_reply(result: &Result<(), GraphError>) -> Vec<u8> {
    match result {
        Ok(()) => Vec::new(),
        Err(e) => e.to_string().into_bytes(),
    }
}

/// Payload of `node.<id>.children`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildrenRequest {
    /// Type filter; empty for all types.
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(rename = "includeDel", default)]
    pub include_del: bool,
    #[serde(default)]
    pub recursive: bool,
}

impl ChildrenRequest {
    /// Decode a request; an empty payload asks for all live children.
    pub fn from_payload(payload: &[u8]) -> Result<Self, GraphError> {
        if payload.is_empty() {
            return Ok(Self::default());
        }
        decode(payload)
    }

    pub fn query(&self) -> Result<DescendantQuery, GraphError> {
        let node_type = if self.node_type.is_empty() {
            None
        } else {
            Some(self.node_type.parse::<NodeType>()?)
        };
        Ok(DescendantQuery {
            node_type,
            recursive: self.recursive,
            include_deleted: self.include_del,
        })
    }
}

/// Reply to `node.<id>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeReply {
    #[serde(default)]
    pub node: Option<NodeEdge>,
    #[serde(default)]
    pub error: String,
}

impl From<Result<NodeEdge, GraphError>> for NodeReply {
    fn from(result: Result<NodeEdge, GraphError>) -> Self {
        match result {
            Ok(node) => Self {
                node: Some(node),
                error: String::new(),
            },
            Err(e) => Self {
                node: None,
                error: e.to_string(),
            },
        }
    }
}

/// Reply to `node.<id>.children`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodesReply {
    #[serde(default)]
    pub nodes: Vec<NodeEdge>,
    #[serde(default)]
    pub error: String,
}

impl From<Result<Vec<NodeEdge>, GraphError>> for NodesReply {
    fn from(result: Result<Vec<NodeEdge>, GraphError>) -> Self {
        match result {
            Ok(nodes) => Self {
                nodes,
                error: String::new(),
            },
            Err(e) => Self {
                nodes: Vec::new(),
                error: e.to_string(),
            },
        }
    }
}

/// A notification to fan out to users.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub parent: String,
    #[serde(rename = "sourceNode", default)]
    pub source_node: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
}

/// A notification addressed to one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "parentID", default)]
    pub parent_id: String,
    #[serde(rename = "notificationID", default)]
    pub notification_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
}
