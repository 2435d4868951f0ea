//! # API Request/Response Types
//!
//! JSON bodies of the HTTP shim. Points use the bus wire shape.

use fleetgraph_core::{GraphCounts, GraphError, NodeId, NodeType, Point, point_type};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Store summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_count: usize,
    pub edge_count: usize,
    pub root_id: Option<String>,
}

impl StatusResponse {
    pub fn new(counts: GraphCounts, root_id: Option<NodeId>) -> Self {
        Self {
            node_count: counts.nodes,
            edge_count: counts.edges,
            root_id: root_id.map(|id| id.to_string()),
        }
    }
}

// =============================================================================
// ACK
// =============================================================================

/// Generic mutation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            id: None,
            error: None,
        }
    }

    pub fn created(id: &NodeId) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::ok()
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(msg.into()),
        }
    }
}

/// Error body for reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// `POST /nodes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertNodeRequest {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Empty or absent hangs the node under the root.
    #[serde(default)]
    pub parent: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub points: Vec<Point>,
    #[serde(default, rename = "edgePoints")]
    pub edge_points: Vec<Point>,
}

impl InsertNodeRequest {
    /// Validate the type and build the id and node point batch.
    pub fn prepare(&self) -> Result<(NodeId, Vec<Point>), String> {
        let node_type: NodeType = self.node_type.parse().map_err(|e: GraphError| e.to_string())?;
        let id = match self.id.as_deref() {
            Some("") | None => NodeId::generate(),
            Some(id) => NodeId::from(id),
        };

        let mut points = Vec::with_capacity(self.points.len() + 1);
        points.push(Point::text(point_type::NODE_TYPE, node_type.as_str()));
        points.extend(self.points.iter().cloned());
        Ok((id, points))
    }
}

/// `POST /nodes/{id}/points`. With `parent` the points go onto that edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsRequest {
    #[serde(default)]
    pub parent: Option<String>,
    pub points: Vec<Point>,
    /// Wait for the write to commit.
    #[serde(default = "default_ack")]
    pub ack: bool,
}

fn default_ack() -> bool {
    true
}

/// `POST /nodes/{id}/parents`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequest {
    #[serde(rename = "oldParent")]
    pub old_parent: String,
    #[serde(rename = "newParent")]
    pub new_parent: String,
}

/// `PUT /nodes/{id}/parents`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyRequest {
    #[serde(rename = "newParent")]
    pub new_parent: String,
}

/// Query of `GET /nodes/{id}` and `DELETE /nodes/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParentQuery {
    #[serde(default)]
    pub parent: String,
}
