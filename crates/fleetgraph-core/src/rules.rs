//! # Rule Engine
//!
//! A rule node owns condition, action and inactive-action children.
//!
//! State machine per rule: `inactive` (initial) and `active`. A rule is
//! active when it has at least one condition and every condition is active.
//! `inactive -> active` fires the actions once, `active -> inactive` fires
//! the inactive-actions once, anything else fires nothing. Condition and
//! rule state persist as `active` points on their nodes.

use crate::graph::{DescendantQuery, descendants};
use crate::ingestor::PointIngestor;
use crate::wire::Notification;
use crate::{
    EffectError, GraphError, NodeEdge, NodeId, NodeType, Point, Points, WriteGuard, point_type,
};
use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// MODEL
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Number,
    OnOff,
    Text,
}

impl ValueType {
    fn parse(s: &str) -> Result<Self, GraphError> {
        match s {
            "" | "number" => Ok(ValueType::Number),
            "onOff" => Ok(ValueType::OnOff),
            "text" => Ok(ValueType::Text),
            other => Err(GraphError::Validation(format!("unknown value type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Greater,
    Less,
    Equal,
    NotEqual,
}

impl Operator {
    fn parse(s: &str) -> Result<Self, GraphError> {
        match s {
            ">" => Ok(Operator::Greater),
            "<" => Ok(Operator::Less),
            "" | "=" => Ok(Operator::Equal),
            "!=" => Ok(Operator::NotEqual),
            other => Err(GraphError::Validation(format!("unknown operator: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionKind {
    /// Compares one incoming point against a constant.
    PointValue {
        node_id: Option<NodeId>,
        point_type: String,
        point_key: String,
        value_type: ValueType,
        operator: Operator,
        value: f64,
        text: String,
    },
    /// True inside a daily UTC window on selected weekdays.
    Schedule {
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
        /// Days from Sunday (0..=6). Empty means every day.
        weekdays: BTreeSet<u32>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub id: NodeId,
    pub kind: ConditionKind,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// Write a point onto a node.
    SetValue {
        node_id: Option<NodeId>,
        point_type: String,
        point_key: String,
        value_type: ValueType,
        value: f64,
        text: String,
    },
    /// Send a notification rooted at the rule.
    Notify,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub id: NodeId,
    pub kind: ActionKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: NodeId,
    pub description: String,
    pub active: bool,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub actions_inactive: Vec<Action>,
}

fn text_of(points: &Points, point_type: &str) -> String {
    points.text(point_type, "").unwrap_or_default().to_string()
}

fn optional_node(points: &Points) -> Option<NodeId> {
    points
        .text(point_type::NODE_ID, "")
        .filter(|s| !s.is_empty())
        .map(NodeId::from)
}

fn parse_time(points: &Points, point_type: &str) -> Result<Option<NaiveTime>, GraphError> {
    match points.text(point_type, "") {
        None | Some("") => Ok(None),
        Some(s) => NaiveTime::parse_from_str(s, "%H:%M")
            .map(Some)
            .map_err(|e| GraphError::Validation(format!("bad {point_type} time {s}: {e}"))),
    }
}

impl Condition {
    pub fn from_node(node: &NodeEdge) -> Result<Self, GraphError> {
        let p = &node.points;
        let kind = match p.text(point_type::CONDITION_TYPE, "").unwrap_or_default() {
            "" | "pointValue" => ConditionKind::PointValue {
                node_id: optional_node(p),
                point_type: text_of(p, point_type::POINT_TYPE),
                point_key: text_of(p, point_type::POINT_KEY),
                value_type: ValueType::parse(p.text(point_type::VALUE_TYPE, "").unwrap_or_default())?,
                operator: Operator::parse(p.text(point_type::OPERATOR, "").unwrap_or_default())?,
                value: p.value(point_type::VALUE, "").unwrap_or_default(),
                text: text_of(p, point_type::VALUE),
            },
            "schedule" => ConditionKind::Schedule {
                start: parse_time(p, point_type::START)?,
                end: parse_time(p, point_type::END)?,
                weekdays: p
                    .of_type(point_type::WEEKDAY)
                    .filter(|w| w.value != 0.0)
                    .filter_map(|w| w.key.parse::<u32>().ok())
                    .filter(|d| *d < 7)
                    .collect(),
            },
            other => {
                return Err(GraphError::Validation(format!(
                    "condition {}: unknown condition type {other}",
                    node.id
                )));
            }
        };

        Ok(Self {
            id: node.id.clone(),
            kind,
            active: p.value_bool(point_type::ACTIVE, ""),
        })
    }

    /// New state of this condition given the incoming points.
    ///
    /// A point-value condition with no relevant point keeps its state.
    pub fn evaluate(&self, source: Option<&NodeId>, points: &[Point], now: DateTime<Utc>) -> bool {
        match &self.kind {
            ConditionKind::PointValue {
                node_id,
                point_type,
                point_key,
                value_type,
                operator,
                value,
                text,
            } => {
                if node_id.as_ref().is_some_and(|want| Some(want) != source) {
                    return self.active;
                }
                let mut active = self.active;
                for p in points {
                    if p.point_type != *point_type || (!point_key.is_empty() && p.key != *point_key) {
                        continue;
                    }
                    active = compare(*value_type, *operator, p, *value, text);
                }
                active
            }
            ConditionKind::Schedule {
                start,
                end,
                weekdays,
            } => {
                let day = now.weekday().num_days_from_sunday();
                if !weekdays.is_empty() && !weekdays.contains(&day) {
                    return false;
                }
                in_window(now.time(), *start, *end)
            }
        }
    }
}

fn compare(value_type: ValueType, operator: Operator, p: &Point, value: f64, text: &str) -> bool {
    match value_type {
        ValueType::Number => match operator {
            Operator::Greater => p.value > value,
            Operator::Less => p.value < value,
            Operator::Equal => p.value == value,
            Operator::NotEqual => p.value != value,
        },
        ValueType::OnOff => {
            let on = p.value != 0.0;
            let want = value != 0.0;
            match operator {
                Operator::Equal => on == want,
                Operator::NotEqual => on != want,
                Operator::Greater | Operator::Less => false,
            }
        }
        ValueType::Text => match operator {
            Operator::Equal => p.text == text,
            Operator::NotEqual => p.text != text,
            Operator::Greater | Operator::Less => false,
        },
    }
}

fn in_window(now: NaiveTime, start: Option<NaiveTime>, end: Option<NaiveTime>) -> bool {
    let now = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now);
    match (start, end) {
        (None, None) => true,
        (Some(s), None) => now >= s,
        (None, Some(e)) => now < e,
        (Some(s), Some(e)) if s <= e => now >= s && now < e,
        // window wraps midnight
        (Some(s), Some(e)) => now >= s || now < e,
    }
}

impl Action {
    pub fn from_node(node: &NodeEdge) -> Result<Self, GraphError> {
        let p = &node.points;
        let kind = match p.text(point_type::ACTION, "").unwrap_or_default() {
            "" | "setValue" => ActionKind::SetValue {
                node_id: optional_node(p),
                point_type: text_of(p, point_type::POINT_TYPE),
                point_key: text_of(p, point_type::POINT_KEY),
                value_type: ValueType::parse(p.text(point_type::VALUE_TYPE, "").unwrap_or_default())?,
                value: p.value(point_type::VALUE, "").unwrap_or_default(),
                text: text_of(p, point_type::VALUE),
            },
            "notify" => ActionKind::Notify,
            other => {
                return Err(GraphError::Validation(format!(
                    "action {}: unknown action {other}",
                    node.id
                )));
            }
        };

        Ok(Self {
            id: node.id.clone(),
            kind,
            text: node.description().to_string(),
        })
    }

    /// Target node and point of a `setValue` action.
    ///
    /// Without an explicit `nodeID` the point goes to the node that
    /// triggered the rule.
    pub fn set_value(&self, source: Option<&NodeId>, now: DateTime<Utc>) -> Result<(NodeId, Point), EffectError> {
        let ActionKind::SetValue {
            node_id,
            point_type,
            point_key,
            value_type,
            value,
            text,
        } = &self.kind
        else {
            return Err(EffectError::new(format!("action {} is not a setValue action", self.id)));
        };

        let target = node_id
            .clone()
            .or_else(|| source.cloned())
            .ok_or_else(|| EffectError::new(format!("action {} has no target node", self.id)))?;
        if point_type.is_empty() {
            return Err(EffectError::new(format!("action {} has no point type", self.id)));
        }

        let point = match value_type {
            ValueType::Text => Point::text(point_type.clone(), text.clone()),
            ValueType::Number | ValueType::OnOff => Point::value(point_type.clone(), *value),
        };
        Ok((target, point.with_key(point_key.clone()).at(now)))
    }

    /// Notification for a `notify` action of `rule`.
    pub fn notification(&self, rule: &Rule, source: Option<&NodeId>) -> Notification {
        let message = if self.text.is_empty() {
            format!("rule {} fired", rule.description)
        } else {
            self.text.clone()
        };
        Notification {
            id: uuid::Uuid::new_v4().to_string(),
            parent: rule.id.to_string(),
            source_node: source.map(ToString::to_string).unwrap_or_default(),
            subject: rule.description.clone(),
            message,
        }
    }
}

impl Rule {
    pub fn from_parts(
        rule: &NodeEdge,
        conditions: &[NodeEdge],
        actions: &[NodeEdge],
        actions_inactive: &[NodeEdge],
    ) -> Result<Self, GraphError> {
        Ok(Self {
            id: rule.id.clone(),
            description: rule.description().to_string(),
            active: rule.points.value_bool(point_type::ACTIVE, ""),
            conditions: conditions.iter().map(Condition::from_node).collect::<Result<_, _>>()?,
            actions: actions.iter().map(Action::from_node).collect::<Result<_, _>>()?,
            actions_inactive: actions_inactive
                .iter()
                .map(Action::from_node)
                .collect::<Result<_, _>>()?,
        })
    }
}

// =============================================================================
// EVALUATION
// =============================================================================

/// Result of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub active: bool,
    pub changed: bool,
    /// Conditions whose state flipped, with their new state.
    pub condition_changes: Vec<(NodeId, bool)>,
}

/// Evaluate every condition of `rule` against the incoming points.
pub fn evaluate(rule: &Rule, source: Option<&NodeId>, points: &[Point], now: DateTime<Utc>) -> Evaluation {
    let mut condition_changes = Vec::new();
    let mut all_active = !rule.conditions.is_empty();

    for condition in &rule.conditions {
        let active = condition.evaluate(source, points, now);
        if active != condition.active {
            condition_changes.push((condition.id.clone(), active));
        }
        all_active &= active;
    }

    Evaluation {
        active: all_active,
        changed: all_active != rule.active,
        condition_changes,
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Runs fired actions. Implementations deliver them outside the core.
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, rule: &Rule, action: &Action, source: Option<&NodeId>) -> Result<(), EffectError>;
}

/// What happened when a rule was processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    pub active: bool,
    pub changed: bool,
    pub fired: usize,
    pub failed: usize,
}

/// Evaluates rules and fires their actions on transitions.
pub struct RuleEngine {
    executor: Arc<dyn ActionExecutor>,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine").finish_non_exhaustive()
    }
}

impl RuleEngine {
    pub fn new(executor: Arc<dyn ActionExecutor>) -> Self {
        Self { executor }
    }

    /// Load a rule with its children and evaluate it.
    pub fn load(ingestor: &PointIngestor, rule_node: &NodeEdge) -> Result<Rule, GraphError> {
        let txn = ingestor.store().read()?;
        let of = |t| DescendantQuery::children().of_type(t);
        let conditions = descendants(&txn, &rule_node.id, &of(NodeType::Condition))?;
        let actions = descendants(&txn, &rule_node.id, &of(NodeType::Action))?;
        let inactive = descendants(&txn, &rule_node.id, &of(NodeType::ActionInactive))?;
        Rule::from_parts(rule_node, &conditions, &actions, &inactive)
    }

    /// Process `points` (from `source`, if any) against one rule.
    ///
    /// Persists condition and rule state through the ingestor under the
    /// caller's guard, then fires actions on a transition. Action failures
    /// are logged and counted, never returned.
    pub fn process(
        &self,
        guard: &WriteGuard<'_>,
        ingestor: &PointIngestor,
        rule_node: &NodeEdge,
        source: Option<&NodeId>,
        points: &[Point],
        now: DateTime<Utc>,
    ) -> Result<RuleOutcome, GraphError> {
        let rule = Self::load(ingestor, rule_node)?;
        let eval = evaluate(&rule, source, points, now);

        for (condition_id, active) in &eval.condition_changes {
            let state = [Point::flag(point_type::ACTIVE, *active).at(now)];
            if let Err(e) = ingestor.apply_node_points(guard, condition_id, &state) {
                tracing::warn!(condition = %condition_id, error = %e, "failed to persist condition state");
            }
        }

        let mut outcome = RuleOutcome {
            active: eval.active,
            changed: eval.changed,
            ..RuleOutcome::default()
        };
        if !eval.changed {
            return Ok(outcome);
        }

        let state = [Point::flag(point_type::ACTIVE, eval.active).at(now)];
        ingestor.apply_node_points(guard, &rule.id, &state)?;
        tracing::info!(rule = %rule.id, active = eval.active, "rule transition");

        let to_fire = if eval.active { &rule.actions } else { &rule.actions_inactive };
        for action in to_fire {
            match self.executor.execute(&rule, action, source) {
                Ok(()) => outcome.fired += 1,
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(rule = %rule.id, action = %action.id, error = %e, "rule action failed");
                }
            }
        }

        Ok(outcome)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn condition(points: Vec<Point>) -> Condition {
        let ne = NodeEdge {
            id: NodeId::from("c"),
            node_type: NodeType::Condition,
            parent: NodeId::from("r"),
            points: points.into(),
            edge_points: Points::new(),
            hash: crate::SubtreeHash::default(),
        };
        Condition::from_node(&ne).expect("condition")
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        // 2024-01-07 is a Sunday
        Utc.with_ymd_and_hms(2024, 1, 7, h, m, 0).single().expect("time")
    }

    #[test]
    fn point_value_condition_compares_numbers() {
        let c = condition(vec![
            Point::text(point_type::CONDITION_TYPE, "pointValue"),
            Point::text(point_type::POINT_TYPE, "temp"),
            Point::text(point_type::OPERATOR, ">"),
            Point::value(point_type::VALUE, 30.0),
        ]);
        assert!(c.evaluate(None, &[Point::value("temp", 31.0)], at(0, 0)));
        assert!(!c.evaluate(None, &[Point::value("temp", 29.0)], at(0, 0)));
        // unrelated point keeps the stored state
        assert!(!c.evaluate(None, &[Point::value("humidity", 99.0)], at(0, 0)));
    }

    #[test]
    fn source_filter_ignores_other_nodes() {
        let c = condition(vec![
            Point::text(point_type::NODE_ID, "sensor"),
            Point::text(point_type::POINT_TYPE, "temp"),
            Point::text(point_type::OPERATOR, ">"),
            Point::value(point_type::VALUE, 30.0),
        ]);
        let hot = [Point::value("temp", 50.0)];
        assert!(!c.evaluate(Some(&NodeId::from("other")), &hot, at(0, 0)));
        assert!(c.evaluate(Some(&NodeId::from("sensor")), &hot, at(0, 0)));
    }

    #[test]
    fn schedule_window_and_weekdays() {
        let c = condition(vec![
            Point::text(point_type::CONDITION_TYPE, "schedule"),
            Point::text(point_type::START, "22:00"),
            Point::text(point_type::END, "06:00"),
        ]);
        assert!(c.evaluate(None, &[], at(23, 0)));
        assert!(c.evaluate(None, &[], at(5, 59)));
        assert!(!c.evaluate(None, &[], at(12, 0)));

        let weekdays_only = condition(vec![
            Point::text(point_type::CONDITION_TYPE, "schedule"),
            Point::value(point_type::WEEKDAY, 1.0).with_key("1"),
            Point::value(point_type::WEEKDAY, 1.0).with_key("5"),
        ]);
        // Sunday
        assert!(!weekdays_only.evaluate(None, &[], at(12, 0)));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let ne = NodeEdge {
            id: NodeId::from("c"),
            node_type: NodeType::Condition,
            parent: NodeId::from("r"),
            points: vec![Point::text(point_type::OPERATOR, ">=")].into(),
            edge_points: Points::new(),
            hash: crate::SubtreeHash::default(),
        };
        assert!(matches!(Condition::from_node(&ne), Err(GraphError::Validation(_))));
    }

    #[test]
    fn rule_without_conditions_never_activates() {
        let rule = Rule {
            id: NodeId::from("r"),
            description: String::new(),
            active: false,
            conditions: Vec::new(),
            actions: Vec::new(),
            actions_inactive: Vec::new(),
        };
        let eval = evaluate(&rule, None, &[Point::value("temp", 1.0)], at(0, 0));
        assert!(!eval.active);
        assert!(!eval.changed);
    }

    #[test]
    fn set_value_falls_back_to_source() {
        let action = Action {
            id: NodeId::from("act"),
            kind: ActionKind::SetValue {
                node_id: None,
                point_type: "fan".to_string(),
                point_key: String::new(),
                value_type: ValueType::OnOff,
                value: 1.0,
                text: String::new(),
            },
            text: String::new(),
        };
        let (target, point) = action
            .set_value(Some(&NodeId::from("dev")), at(0, 0))
            .expect("set value");
        assert_eq!(target, NodeId::from("dev"));
        assert_eq!(point.point_type, "fan");
        assert_eq!(point.value, 1.0);
        assert!(action.set_value(None, at(0, 0)).is_err());
    }
}
