//! # Message Router
//!
//! Subscribes to the node subjects and runs one handler task per inbound
//! message. Store work runs on the blocking pool; point writes take the
//! process-wide write lock and keep it through upstream propagation.
//!
//! Handler shape: decode, fail fast with an error reply, run the core
//! operation, reply if a reply subject was given.

use crate::bus::{Bus, BusMessage, Subscription};
use crate::error::AppError;
use crate::metrics::{HandlerMetrics, Metric};
use chrono::Utc;
use fleetgraph_core::primitives::ROOT_ALIAS;
use fleetgraph_core::wire::{self, ChildrenRequest, NodeReply, NodesReply, Subject, pattern};
use fleetgraph_core::{
    GraphError, GraphRead, Message, MessageService, NodeId, Notification, Point, PointIngestor,
    UpstreamPropagator, message_services, notification_messages,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

pub struct MessageRouter {
    bus: Bus,
    ingestor: Arc<PointIngestor>,
    propagator: Arc<UpstreamPropagator>,
    messenger: Arc<dyn MessageService>,
    metrics: HandlerMetrics,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("bus", &self.bus)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl MessageRouter {
    pub fn new(
        bus: Bus,
        ingestor: Arc<PointIngestor>,
        propagator: Arc<UpstreamPropagator>,
        messenger: Arc<dyn MessageService>,
        metrics: HandlerMetrics,
    ) -> Self {
        Self {
            bus,
            ingestor,
            propagator,
            messenger,
            metrics,
        }
    }

    /// Subscribe to every handled subject and start the dispatch loops.
    pub fn start(self: Arc<Self>) -> Result<Vec<JoinHandle<()>>, AppError> {
        let patterns = [
            pattern::NODE_POINTS,
            pattern::EDGE_POINTS,
            pattern::DESCRIBE,
            pattern::CHILDREN,
            pattern::NOTIFICATION,
            pattern::MESSAGE,
        ];

        let mut tasks = Vec::with_capacity(patterns.len());
        for p in patterns {
            let sub = self.bus.subscribe(p)?;
            tasks.push(tokio::spawn(Arc::clone(&self).dispatch(sub)));
        }
        tracing::info!(subscriptions = tasks.len(), "message router started");
        Ok(tasks)
    }

    async fn dispatch(self: Arc<Self>, mut sub: Subscription) {
        while let Some(msg) = sub.recv().await {
            tokio::spawn(Arc::clone(&self).handle(msg));
        }
        tracing::debug!(pattern = sub.pattern(), "subscription ended");
    }

    /// Handle one message.
    pub async fn handle(self: Arc<Self>, msg: BusMessage) {
        let subject = match Subject::parse(&msg.subject) {
            Ok(subject) => subject,
            Err(e) => {
                tracing::warn!(subject = %msg.subject, error = %e, "undecodable subject");
                self.bus.respond(&msg, wire::status_reply(&Err(e)));
                return;
            }
        };

        let start = Instant::now();
        match subject {
            Subject::NodePoints(id) => {
                self.handle_node_points(&msg, id).await;
                self.record(&self.metrics.node_points, start);
            }
            Subject::EdgePoints { id, parent } => {
                self.handle_edge_points(&msg, id, parent).await;
                self.record(&self.metrics.edge_points, start);
            }
            Subject::Describe(id) => {
                self.handle_describe(&msg, id).await;
                self.record(&self.metrics.describe, start);
            }
            Subject::Children(id) => {
                self.handle_children(&msg, id).await;
                self.record(&self.metrics.children, start);
            }
            Subject::Notification(id) => self.handle_notification(&msg, id).await,
            Subject::Message(id) => self.handle_message(&msg, id).await,
        }
    }

    /// Run store work on the blocking pool.
    async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&MessageRouter) -> Result<T, GraphError> + Send + 'static,
    {
        let this = Arc::clone(self);
        Ok(tokio::task::spawn_blocking(move || f(this.as_ref())).await??)
    }

    fn record(&self, metric: &Metric, start: Instant) {
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        if let Some(point) = metric.add_sample(elapsed_ms) {
            let subject = Subject::NodePoints(NodeId::new(ROOT_ALIAS)).to_string();
            let sent = wire::encode_points(&[point])
                .map_err(AppError::from)
                .and_then(|payload| self.bus.publish(&subject, payload).map_err(AppError::from));
            if let Err(e) = sent {
                tracing::warn!(error = %e, "failed to report handler metric");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Points
    // -------------------------------------------------------------------------

    async fn handle_node_points(self: &Arc<Self>, msg: &BusMessage, id: NodeId) {
        let points = match wire::decode_points(&msg.payload) {
            Ok(points) => stamp_now(points),
            Err(e) => {
                tracing::warn!(subject = %msg.subject, error = %e, "bad node points payload");
                self.bus.respond(msg, wire::status_reply(&Err(e)));
                return;
            }
        };

        let result = self
            .blocking(move |router| {
                let guard = router.ingestor.lock()?;
                router.ingestor.apply_node_points(&guard, &id, &points)?;
                let id = router.ingestor.store().read()?.resolve(&id)?;
                router.propagate(&guard, &id, &points);
                Ok(())
            })
            .await;
        self.reply_status(msg, result);
    }

    async fn handle_edge_points(self: &Arc<Self>, msg: &BusMessage, id: NodeId, parent: NodeId) {
        let points = match wire::decode_points(&msg.payload) {
            Ok(points) => stamp_now(points),
            Err(e) => {
                tracing::warn!(subject = %msg.subject, error = %e, "bad edge points payload");
                self.bus.respond(msg, wire::status_reply(&Err(e)));
                return;
            }
        };

        let result = self
            .blocking(move |router| {
                let guard = router.ingestor.lock()?;
                router.ingestor.apply_edge_points(&guard, &id, &parent, &points)?;
                let id = router.ingestor.store().read()?.resolve(&id)?;
                router.propagate(&guard, &id, &points);
                Ok(())
            })
            .await;
        self.reply_status(msg, result);
    }

    fn propagate(&self, guard: &fleetgraph_core::WriteGuard<'_>, id: &NodeId, points: &[Point]) {
        let report = self.propagator.propagate(guard, &self.ingestor, id, points);
        if report.failures > 0 {
            tracing::warn!(node_id = %id, failures = report.failures, "upstream propagation had failures");
        }
        tracing::debug!(
            node_id = %id,
            levels = report.levels,
            rules = report.rules,
            transitions = report.transitions,
            sink_writes = report.sink_writes,
            "points propagated"
        );
    }

    fn reply_status(&self, msg: &BusMessage, result: Result<(), AppError>) {
        let status = result.map_err(into_graph_error);
        if let Err(e) = &status {
            tracing::warn!(subject = %msg.subject, error = %e, "point write failed");
        }
        self.bus.respond(msg, wire::status_reply(&status));
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    async fn handle_describe(self: &Arc<Self>, msg: &BusMessage, id: NodeId) {
        let parent = String::from_utf8_lossy(&msg.payload).trim().to_string();
        let result = self
            .blocking(move |router| router.ingestor.store().node_edge(&id, &parent))
            .await;
        let reply = NodeReply::from(result.map_err(into_graph_error));
        self.respond_json(msg, &reply);
    }

    async fn handle_children(self: &Arc<Self>, msg: &BusMessage, id: NodeId) {
        let query = ChildrenRequest::from_payload(&msg.payload).and_then(|req| req.query());
        let result = match query {
            Ok(query) => self
                .blocking(move |router| router.ingestor.store().descendants(&id, &query))
                .await
                .map_err(into_graph_error),
            Err(e) => Err(e),
        };
        let reply = NodesReply::from(result);
        self.respond_json(msg, &reply);
    }

    fn respond_json<T: serde::Serialize>(&self, msg: &BusMessage, reply: &T) {
        match wire::encode(reply) {
            Ok(payload) => self.bus.respond(msg, payload),
            Err(e) => tracing::error!(subject = %msg.subject, error = %e, "failed to encode reply"),
        }
    }

    // -------------------------------------------------------------------------
    // Fan-out
    // -------------------------------------------------------------------------

    async fn handle_notification(self: &Arc<Self>, msg: &BusMessage, id: NodeId) {
        let notification: Notification = match wire::decode(&msg.payload) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(subject = %msg.subject, error = %e, "bad notification payload");
                self.bus.respond(msg, wire::status_reply(&Err(e)));
                return;
            }
        };

        let result = self
            .blocking(move |router| notification_messages(router.ingestor.store(), &id, &notification))
            .await;
        let messages = match result {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(subject = %msg.subject, error = %e, "notification fan-out failed");
                self.bus.respond(msg, wire::status_reply(&Err(into_graph_error(e))));
                return;
            }
        };

        for message in &messages {
            let subject = Subject::Message(NodeId::new(message.user_id.clone())).to_string();
            let sent = wire::encode(message)
                .map_err(AppError::from)
                .and_then(|payload| self.bus.publish(&subject, payload).map_err(AppError::from));
            if let Err(e) = sent {
                tracing::warn!(subject = %subject, error = %e, "failed to publish message");
            }
        }
        tracing::info!(subject = %msg.subject, messages = messages.len(), "notification fanned out");
        self.bus.respond(msg, Vec::new());
    }

    async fn handle_message(self: &Arc<Self>, msg: &BusMessage, id: NodeId) {
        let mut message: Message = match wire::decode(&msg.payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(subject = %msg.subject, error = %e, "bad message payload");
                self.bus.respond(msg, wire::status_reply(&Err(e)));
                return;
            }
        };
        if message.user_id.is_empty() {
            message.user_id = id.to_string();
        }

        let lookup = message.clone();
        let services = match self
            .blocking(move |router| message_services(router.ingestor.store(), &lookup))
            .await
        {
            Ok(services) => services,
            Err(e) => {
                tracing::warn!(subject = %msg.subject, error = %e, "message service lookup failed");
                self.bus.respond(msg, wire::status_reply(&Err(into_graph_error(e))));
                return;
            }
        };

        if services.is_empty() {
            tracing::warn!(user = %message.user_id, "no message service reachable");
        }
        for service in &services {
            if let Err(e) = self.messenger.send(service, &message) {
                tracing::warn!(service = %service.id, user = %message.user_id, error = %e, "message delivery failed");
            }
        }
        self.bus.respond(msg, Vec::new());
    }
}

/// Stamp unset times once so the store and the sinks see the same time.
fn stamp_now(mut points: Vec<Point>) -> Vec<Point> {
    let now = Utc::now();
    for p in &mut points {
        if p.time.is_none() {
            p.time = Some(now);
        }
    }
    points
}

fn into_graph_error(e: AppError) -> GraphError {
    match e {
        AppError::Graph(g) => g,
        other => GraphError::Internal(other.to_string()),
    }
}
