//! # Rule Scheduler
//!
//! Wakes on a fixed interval and sends a synthetic `trigger` point to every
//! rule reachable from the root through group nodes. This drives
//! schedule conditions when no device points arrive.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use fleetgraph_core::primitives::MAX_TRAVERSAL_DEPTH;
use fleetgraph_core::{
    DescendantQuery, GraphError, NodeId, NodeType, Point, PointIngestor, RuleEngine,
    UpstreamPropagator, point_type,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default tick period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

/// Counts for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub rules: usize,
    pub transitions: usize,
    pub failures: usize,
}

#[derive(Debug)]
pub struct Scheduler {
    ingestor: Arc<PointIngestor>,
    propagator: Arc<UpstreamPropagator>,
    interval: Duration,
}

impl Scheduler {
    /// Ticks run through the propagator's rule engine.
    pub fn new(ingestor: Arc<PointIngestor>, propagator: Arc<UpstreamPropagator>, interval: Duration) -> Self {
        Self {
            ingestor,
            propagator,
            interval,
        }
    }

    /// Spawn the tick loop. Errors are logged; the loop keeps running.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let ingestor = Arc::clone(&self.ingestor);
                let propagator = Arc::clone(&self.propagator);
                let result = tokio::task::spawn_blocking(move || {
                    run_once(&ingestor, propagator.rules(), Utc::now())
                })
                .await
                .map_err(AppError::from)
                .and_then(|r| r.map_err(AppError::from));
                match result {
                    Ok(report) => tracing::trace!(
                        rules = report.rules,
                        transitions = report.transitions,
                        failures = report.failures,
                        "scheduler tick"
                    ),
                    Err(e) => tracing::warn!(error = %e, "scheduler tick failed"),
                }
            }
        })
    }
}

/// One pass over the rule-bearing subtrees under the write lock.
///
/// An empty store is a no-op.
pub fn run_once(
    ingestor: &PointIngestor,
    rules: &RuleEngine,
    now: DateTime<Utc>,
) -> Result<TickReport, GraphError> {
    let mut report = TickReport::default();
    let Some(root) = ingestor.store().root_id()? else {
        return Ok(report);
    };

    let guard = ingestor.lock()?;
    let trigger = [Point::value(point_type::TRIGGER, 1.0).at(now)];

    let mut visited: BTreeSet<NodeId> = BTreeSet::new();
    let mut stack = vec![(root, 0usize)];
    while let Some((id, depth)) = stack.pop() {
        if depth > MAX_TRAVERSAL_DEPTH {
            tracing::warn!(node_id = %id, depth, "scheduler walk hit the depth bound");
            report.failures += 1;
            continue;
        }
        if !visited.insert(id.clone()) {
            continue;
        }

        let children = match ingestor.store().descendants(&id, &DescendantQuery::children()) {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!(node_id = %id, error = %e, "scheduler could not list children");
                report.failures += 1;
                continue;
            }
        };

        for child in children {
            match child.node_type {
                NodeType::Rule => {
                    report.rules += 1;
                    match rules.process(&guard, ingestor, &child, None, &trigger, now) {
                        Ok(outcome) if outcome.changed => report.transitions += 1,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(rule = %child.id, error = %e, "scheduled rule failed");
                            report.failures += 1;
                        }
                    }
                }
                NodeType::Group => stack.push((child.id, depth + 1)),
                _ => {}
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fleetgraph_core::{Action, ActionExecutor, EffectError, GraphStore, Rule};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ActionExecutor for Recorder {
        fn execute(&self, _rule: &Rule, action: &Action, _source: Option<&NodeId>) -> Result<(), EffectError> {
            self.0.lock().expect("recorder").push(action.id.to_string());
            Ok(())
        }
    }

    fn put(ingestor: &PointIngestor, id: &str, parent: &str, node_type: NodeType, mut points: Vec<Point>) {
        let guard = ingestor.lock().expect("lock");
        points.push(Point::text(point_type::NODE_TYPE, node_type.as_str()));
        ingestor
            .apply_edge_points(&guard, &NodeId::from(id), &NodeId::from(parent), &[])
            .expect("edge points");
        ingestor
            .apply_node_points(&guard, &NodeId::from(id), &points)
            .expect("node points");
    }

    #[test]
    fn schedule_condition_fires_inside_window() {
        let store = Arc::new(GraphStore::in_memory().expect("store"));
        let ingestor = PointIngestor::new(store);
        let recorder = Arc::new(Recorder::default());
        let engine = RuleEngine::new(recorder.clone());

        put(&ingestor, "top", "none", NodeType::Device, vec![]);
        put(&ingestor, "site", "top", NodeType::Group, vec![]);
        put(&ingestor, "night", "site", NodeType::Rule, vec![]);
        put(
            &ingestor,
            "window",
            "night",
            NodeType::Condition,
            vec![
                Point::text(point_type::CONDITION_TYPE, "schedule"),
                Point::text(point_type::START, "22:00"),
                Point::text(point_type::END, "23:00"),
            ],
        );
        put(
            &ingestor,
            "lights",
            "night",
            NodeType::Action,
            vec![Point::text(point_type::ACTION, "notify")],
        );

        let before = Utc.with_ymd_and_hms(2024, 1, 7, 21, 0, 0).single().expect("time");
        let inside = Utc.with_ymd_and_hms(2024, 1, 7, 22, 30, 0).single().expect("time");

        let report = run_once(&ingestor, &engine, before).expect("tick");
        assert_eq!(report.rules, 1);
        assert_eq!(report.transitions, 0);

        let report = run_once(&ingestor, &engine, inside).expect("tick");
        assert_eq!(report.transitions, 1);
        assert_eq!(*recorder.0.lock().expect("recorder"), vec!["lights".to_string()]);

        let report = run_once(&ingestor, &engine, inside).expect("tick");
        assert_eq!(report.transitions, 0);
    }

    #[test]
    fn empty_store_is_a_no_op() {
        let store = Arc::new(GraphStore::in_memory().expect("store"));
        let ingestor = PointIngestor::new(store);
        let engine = RuleEngine::new(Arc::new(Recorder::default()));
        let report = run_once(&ingestor, &engine, Utc::now()).expect("tick");
        assert_eq!(report, TickReport::default());
    }
}
