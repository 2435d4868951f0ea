//! # Bus Client
//!
//! Typed helpers over [`Bus`] for the node subjects the router serves.

use crate::bus::Bus;
use crate::error::AppError;
use fleetgraph_core::wire::{self, ChildrenRequest, NodeReply, NodesReply, Notification, Subject};
use fleetgraph_core::{NodeEdge, NodeId, Point};
use std::time::Duration;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct BusClient {
    bus: Bus,
    timeout: Duration,
}

impl BusClient {
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Send node points. With `ack` the call waits for the write to commit.
    pub async fn send_node_points(&self, id: &NodeId, points: &[Point], ack: bool) -> Result<(), AppError> {
        let subject = Subject::NodePoints(id.clone()).to_string();
        self.send_points(&subject, points, ack).await
    }

    /// Send edge points for the `(parent, id)` edge.
    pub async fn send_edge_points(
        &self,
        id: &NodeId,
        parent: &NodeId,
        points: &[Point],
        ack: bool,
    ) -> Result<(), AppError> {
        let subject = Subject::EdgePoints {
            id: id.clone(),
            parent: parent.clone(),
        }
        .to_string();
        self.send_points(&subject, points, ack).await
    }

    async fn send_points(&self, subject: &str, points: &[Point], ack: bool) -> Result<(), AppError> {
        let payload = wire::encode_points(points)?;
        if !ack {
            self.bus.publish(subject, payload)?;
            return Ok(());
        }

        let reply = self.bus.request(subject, payload, self.timeout).await?;
        if reply.is_empty() {
            Ok(())
        } else {
            Err(AppError::Remote(String::from_utf8_lossy(&reply).into_owned()))
        }
    }

    /// Describe a node through `parent` (empty for none, `skip` for no edge).
    pub async fn get_node(&self, id: &NodeId, parent: &str) -> Result<NodeEdge, AppError> {
        let subject = Subject::Describe(id.clone()).to_string();
        let reply = self
            .bus
            .request(&subject, parent.as_bytes().to_vec(), self.timeout)
            .await?;
        let reply: NodeReply = wire::decode(&reply)?;
        match reply.node {
            Some(node) if reply.error.is_empty() => Ok(node),
            _ => Err(AppError::Remote(reply.error)),
        }
    }

    pub async fn get_children(&self, id: &NodeId, request: &ChildrenRequest) -> Result<Vec<NodeEdge>, AppError> {
        let subject = Subject::Children(id.clone()).to_string();
        let reply = self
            .bus
            .request(&subject, wire::encode(request)?, self.timeout)
            .await?;
        let reply: NodesReply = wire::decode(&reply)?;
        if reply.error.is_empty() {
            Ok(reply.nodes)
        } else {
            Err(AppError::Remote(reply.error))
        }
    }

    /// Fire-and-forget notification fan-out.
    pub fn send_notification(&self, id: &NodeId, notification: &Notification) -> Result<(), AppError> {
        let subject = Subject::Notification(id.clone()).to_string();
        self.bus.publish(&subject, wire::encode(notification)?)?;
        Ok(())
    }
}
