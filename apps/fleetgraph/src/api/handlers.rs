//! # API Endpoint Handlers
//!
//! Every handler forwards onto the bus through [`BusClient`], except edge
//! moves and copies which run through the service under the write lock.
//!
//! [`BusClient`]: crate::client::BusClient

use super::{
    AppState,
    types::{
        AckResponse, CopyRequest, ErrorResponse, HealthResponse, InsertNodeRequest, MoveRequest,
        ParentQuery, PointsRequest, StatusResponse,
    },
};
use crate::bus::BusError;
use crate::error::AppError;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use fleetgraph_core::wire::{ChildrenRequest, Notification};
use fleetgraph_core::{GraphError, NodeId, Point, point_type};

/// Map an error onto an HTTP status.
fn status_of(e: &AppError) -> StatusCode {
    match e {
        AppError::Graph(GraphError::NotFound(_)) => StatusCode::NOT_FOUND,
        AppError::Graph(GraphError::Validation(_)) => StatusCode::BAD_REQUEST,
        AppError::Remote(msg) if msg.starts_with("not found") => StatusCode::NOT_FOUND,
        AppError::Remote(msg) if msg.starts_with("validation") => StatusCode::BAD_REQUEST,
        AppError::Bus(BusError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        AppError::Bus(BusError::NoResponders(_)) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn ack(result: Result<(), AppError>) -> Response {
    match result {
        Ok(()) => (StatusCode::OK, Json(AckResponse::ok())).into_response(),
        Err(e) => (status_of(&e), Json(AckResponse::error(e.to_string()))).into_response(),
    }
}

fn read_error(e: &AppError) -> Response {
    (status_of(e), Json(ErrorResponse { error: e.to_string() })).into_response()
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

pub async fn status_handler(State(state): State<AppState>) -> Response {
    match state.service.status().await {
        Ok((counts, root)) => (StatusCode::OK, Json(StatusResponse::new(counts, root))).into_response(),
        Err(e) => read_error(&e),
    }
}

// =============================================================================
// READS
// =============================================================================

/// `GET /nodes/{id}?parent=<p>`
pub async fn get_node_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ParentQuery>,
) -> Response {
    match state.service.client().get_node(&NodeId::from(id.as_str()), &query.parent).await {
        Ok(node) => (StatusCode::OK, Json(node)).into_response(),
        Err(e) => read_error(&e),
    }
}

/// `GET /nodes/{id}/children?type=<t>&includeDel=<b>&recursive=<b>`
pub async fn children_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(request): Query<ChildrenRequest>,
) -> Response {
    match state
        .service
        .client()
        .get_children(&NodeId::from(id.as_str()), &request)
        .await
    {
        Ok(nodes) => (StatusCode::OK, Json(nodes)).into_response(),
        Err(e) => read_error(&e),
    }
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// `POST /nodes`: create the edge first, then the node points.
pub async fn insert_node_handler(
    State(state): State<AppState>,
    Json(request): Json<InsertNodeRequest>,
) -> Response {
    let (id, points) = match request.prepare() {
        Ok(prepared) => prepared,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(AckResponse::error(e))).into_response(),
    };
    let client = state.service.client();
    let parent = NodeId::from(request.parent.as_str());

    let result = async {
        client.send_edge_points(&id, &parent, &request.edge_points, true).await?;
        client.send_node_points(&id, &points, true).await
    }
    .await;

    match result {
        Ok(()) => {
            tracing::info!(node_id = %id, parent = %parent, "node inserted");
            (StatusCode::CREATED, Json(AckResponse::created(&id))).into_response()
        }
        Err(e) => (status_of(&e), Json(AckResponse::error(e.to_string()))).into_response(),
    }
}

/// `DELETE /nodes/{id}?parent=<p>`: tombstone one parent edge.
pub async fn delete_node_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ParentQuery>,
) -> Response {
    let tombstone = [Point::flag(point_type::TOMBSTONE, true).at(Utc::now())];
    let id = NodeId::from(id.as_str());
    let parent = NodeId::from(query.parent.as_str());
    let result = state
        .service
        .client()
        .send_edge_points(&id, &parent, &tombstone, true)
        .await;
    ack(result)
}

/// `POST /nodes/{id}/points`
pub async fn points_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PointsRequest>,
) -> Response {
    if request.points.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(AckResponse::error("no points"))).into_response();
    }
    let client = state.service.client();
    let id = NodeId::from(id.as_str());
    let result = match request.parent.as_deref() {
        Some(parent) => {
            client
                .send_edge_points(&id, &NodeId::from(parent), &request.points, request.ack)
                .await
        }
        None => client.send_node_points(&id, &request.points, request.ack).await,
    };
    ack(result)
}

/// `POST /nodes/{id}/parents`: move.
pub async fn move_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MoveRequest>,
) -> Response {
    let result = state
        .service
        .move_edge(
            NodeId::from(id.as_str()),
            NodeId::from(request.old_parent.as_str()),
            NodeId::from(request.new_parent.as_str()),
        )
        .await;
    ack(result)
}

/// `PUT /nodes/{id}/parents`: copy.
pub async fn copy_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CopyRequest>,
) -> Response {
    let result = state
        .service
        .copy_edge(NodeId::from(id.as_str()), NodeId::from(request.new_parent.as_str()))
        .await;
    ack(result)
}

/// `POST /nodes/{id}/not`
pub async fn notification_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut notification): Json<Notification>,
) -> Response {
    if notification.id.is_empty() {
        notification.id = uuid::Uuid::new_v4().to_string();
    }
    let result = state
        .service
        .client()
        .send_notification(&NodeId::from(id.as_str()), &notification);
    ack(result)
}
