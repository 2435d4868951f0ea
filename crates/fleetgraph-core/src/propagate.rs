//! # Upstream Propagation
//!
//! After a point commit on node `N`, walk `N` and every ancestor. At each
//! level the immediate children are dispatched through the node type
//! behavior table: rules are evaluated, series-export sinks receive the
//! points. Every failure is logged and counted; none stops the walk.

use crate::graph::{DescendantQuery, GraphRead, descendants};
use crate::ingestor::PointIngestor;
use crate::primitives::MAX_TRAVERSAL_DEPTH;
use crate::rules::RuleEngine;
use crate::{Behavior, EffectError, GraphError, NodeEdge, NodeId, Point, WriteGuard, point_type};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// SINKS
// =============================================================================

/// Connection settings carried by a `db` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub id: NodeId,
    pub description: String,
    pub uri: String,
    pub bucket: String,
    pub org: String,
    pub auth_token: String,
}

impl SinkConfig {
    pub fn from_node(node: &NodeEdge) -> Self {
        let text = |t| node.points.text(t, "").unwrap_or_default().to_string();
        Self {
            id: node.id.clone(),
            description: node.description().to_string(),
            uri: text(point_type::URI),
            bucket: text(point_type::BUCKET),
            org: text(point_type::ORG),
            auth_token: text(point_type::AUTH_TOKEN),
        }
    }
}

/// A time-series export target.
pub trait PointSink: Send + Sync {
    fn write_points(&self, node_id: &NodeId, description: &str, points: &[Point]) -> Result<(), EffectError>;
}

/// Builds sinks from `db` node settings.
pub trait SinkFactory: Send + Sync {
    fn sink(&self, config: &SinkConfig) -> Result<Box<dyn PointSink>, EffectError>;
}

// =============================================================================
// PROPAGATOR
// =============================================================================

/// Counters for one propagation walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    pub levels: usize,
    pub rules: usize,
    pub transitions: usize,
    pub sink_writes: usize,
    pub failures: usize,
}

pub struct UpstreamPropagator {
    rules: RuleEngine,
    sinks: Arc<dyn SinkFactory>,
}

impl std::fmt::Debug for UpstreamPropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamPropagator")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl UpstreamPropagator {
    pub fn new(rules: RuleEngine, sinks: Arc<dyn SinkFactory>) -> Self {
        Self { rules, sinks }
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Run side effects for `points` just committed on `node_id`.
    ///
    /// Walks parent edges with an explicit `(node, level)` stack and a
    /// visited set, so an ancestor reachable over several paths is handled
    /// once and a cyclic edge cannot loop.
    pub fn propagate(
        &self,
        guard: &WriteGuard<'_>,
        ingestor: &PointIngestor,
        node_id: &NodeId,
        points: &[Point],
    ) -> PropagationReport {
        let now = Utc::now();
        let mut report = PropagationReport::default();
        let store = ingestor.store();

        let description = store
            .node(node_id)
            .map(|n| n.description().to_string())
            .unwrap_or_default();

        let mut stack = vec![(node_id.clone(), 0usize)];
        let mut visited = BTreeSet::new();

        while let Some((current, level)) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if level > MAX_TRAVERSAL_DEPTH {
                let err = GraphError::RecursionLimit {
                    start: node_id.to_string(),
                    depth: level,
                };
                tracing::warn!(node_id = %current, error = %err, "propagation branch stopped");
                report.failures += 1;
                continue;
            }

            report.levels += 1;
            self.process_level(guard, ingestor, &current, node_id, &description, points, now, &mut report);

            match store.read().and_then(|txn| txn.edges_up(&current, false)) {
                Ok(edges) => {
                    for edge in edges.into_iter().rev() {
                        if !edge.up.is_none() {
                            stack.push((edge.up, level + 1));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(node_id = %current, error = %e, "failed to read parent edges");
                    report.failures += 1;
                }
            }
        }

        report
    }

    fn process_level(
        &self,
        guard: &WriteGuard<'_>,
        ingestor: &PointIngestor,
        current: &NodeId,
        source: &NodeId,
        description: &str,
        points: &[Point],
        now: DateTime<Utc>,
        report: &mut PropagationReport,
    ) {
        let children = match ingestor
            .store()
            .read()
            .and_then(|txn| descendants(&txn, current, &DescendantQuery::children()))
        {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!(node_id = %current, error = %e, "failed to read children");
                report.failures += 1;
                return;
            }
        };

        for child in &children {
            match child.node_type.behavior() {
                Behavior::RuleEvaluation => {
                    report.rules += 1;
                    match self.rules.process(guard, ingestor, child, Some(source), points, now) {
                        Ok(outcome) => {
                            if outcome.changed {
                                report.transitions += 1;
                            }
                            report.failures += outcome.failed;
                        }
                        Err(e) => {
                            tracing::warn!(rule = %child.id, error = %e, "rule processing failed");
                            report.failures += 1;
                        }
                    }
                }
                Behavior::SeriesExport => {
                    let config = SinkConfig::from_node(child);
                    let written = self
                        .sinks
                        .sink(&config)
                        .and_then(|sink| sink.write_points(source, description, points));
                    match written {
                        Ok(()) => report.sink_writes += 1,
                        Err(e) => {
                            tracing::warn!(sink = %child.id, error = %e, "sink write failed");
                            report.failures += 1;
                        }
                    }
                }
                Behavior::Passive
                | Behavior::Container
                | Behavior::RulePart
                | Behavior::Recipient
                | Behavior::Delivery => {}
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::rules::{Action, ActionExecutor, Rule};
    use crate::storage::GraphStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        writes: Mutex<Vec<(String, NodeId)>>,
        fail_uri: String,
    }

    struct RecordingSink {
        uri: String,
        recorder: Arc<Recorder>,
    }

    impl PointSink for RecordingSink {
        fn write_points(&self, node_id: &NodeId, _d: &str, _p: &[Point]) -> Result<(), EffectError> {
            if self.uri == self.recorder.fail_uri {
                return Err(EffectError::new("sink down"));
            }
            self.recorder
                .writes
                .lock()
                .expect("lock")
                .push((self.uri.clone(), node_id.clone()));
            Ok(())
        }
    }

    struct Factory(Arc<Recorder>);

    impl SinkFactory for Factory {
        fn sink(&self, config: &SinkConfig) -> Result<Box<dyn PointSink>, EffectError> {
            Ok(Box::new(RecordingSink {
                uri: config.uri.clone(),
                recorder: Arc::clone(&self.0),
            }))
        }
    }

    struct NoActions;

    impl ActionExecutor for NoActions {
        fn execute(&self, _r: &Rule, _a: &Action, _s: Option<&NodeId>) -> Result<(), EffectError> {
            Ok(())
        }
    }

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    #[test]
    fn sinks_at_every_ancestor_level_receive_points_despite_failures() {
        let store = Arc::new(GraphStore::in_memory().expect("store"));
        let ingestor = PointIngestor::new(Arc::clone(&store));
        let recorder = Arc::new(Recorder {
            fail_uri: "http://broken".to_string(),
            ..Recorder::default()
        });
        let propagator = UpstreamPropagator::new(
            RuleEngine::new(Arc::new(NoActions)),
            Arc::new(Factory(Arc::clone(&recorder))),
        );

        let guard = ingestor.lock().expect("lock");
        ingestor.apply_node_points(&guard, &id("top"), &[]).expect("top");
        ingestor.apply_edge_points(&guard, &id("g"), &id("top"), &[]).expect("g");
        ingestor.apply_edge_points(&guard, &id("dev"), &id("g"), &[]).expect("dev");
        for (db, parent, uri) in [("db1", "g", "http://broken"), ("db2", "top", "http://ok")] {
            ingestor
                .apply_node_points(
                    &guard,
                    &id(db),
                    &[
                        Point::text(point_type::NODE_TYPE, "db"),
                        Point::text(point_type::URI, uri),
                    ],
                )
                .expect("db node");
            store.copy_edge(&guard, &id(db), &id(parent)).expect("link db");
        }

        let points = [Point::value("temp", 20.0)];
        ingestor.apply_node_points(&guard, &id("dev"), &points).expect("points");
        let report = propagator.propagate(&guard, &ingestor, &id("dev"), &points);

        assert_eq!(report.levels, 3);
        assert_eq!(report.sink_writes, 1);
        assert_eq!(report.failures, 1);
        let writes = recorder.writes.lock().expect("lock");
        assert_eq!(writes.as_slice(), &[("http://ok".to_string(), id("dev"))]);
    }
}
