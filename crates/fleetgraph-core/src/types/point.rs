//! # Points
//!
//! A point is the atomic state fact carried by nodes and edges.
//! The pair `(type, key)` is the merge key inside a point set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// =============================================================================
// RESERVED POINT TYPES
// =============================================================================

/// Point type names understood by the core.
pub mod point_type {
    /// Sets the node's type discriminator instead of being stored.
    pub const NODE_TYPE: &str = "nodeType";
    /// Marks an edge as logically deleted (0/1).
    pub const TOMBSTONE: &str = "tombstone";
    /// Synthetic pulse delivered to rules by the scheduler.
    pub const TRIGGER: &str = "trigger";
    /// Persisted active/inactive state of rules and conditions.
    pub const ACTIVE: &str = "active";
    pub const DESCRIPTION: &str = "description";

    // users
    pub const FIRST_NAME: &str = "firstName";
    pub const LAST_NAME: &str = "lastName";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";

    // message services
    pub const SERVICE: &str = "service";
    pub const SID: &str = "sid";
    pub const AUTH_TOKEN: &str = "authToken";
    pub const FROM: &str = "from";

    // time-series sinks
    pub const URI: &str = "uri";
    pub const BUCKET: &str = "bucket";
    pub const ORG: &str = "org";

    // conditions
    pub const CONDITION_TYPE: &str = "conditionType";
    pub const NODE_ID: &str = "nodeID";
    pub const POINT_TYPE: &str = "pointType";
    pub const POINT_KEY: &str = "pointKey";
    pub const VALUE_TYPE: &str = "valueType";
    pub const OPERATOR: &str = "operator";
    pub const VALUE: &str = "value";
    pub const START: &str = "start";
    pub const END: &str = "end";
    pub const WEEKDAY: &str = "weekday";

    // actions
    pub const ACTION: &str = "action";

    // handler metrics reported onto the root node
    pub const METRIC_BUS_NODE_POINT: &str = "metricBusNodePoint";
    pub const METRIC_BUS_EDGE_POINT: &str = "metricBusEdgePoint";
    pub const METRIC_BUS_NODE: &str = "metricBusNode";
    pub const METRIC_BUS_NODE_CHILDREN: &str = "metricBusNodeChildren";
}

// =============================================================================
// POINT
// =============================================================================

/// A timestamped, keyed state fact.
///
/// `time` is `None` only on the way in; the ingestor stamps unset times with
/// the ingestion time before merging, so stored points always carry one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
    #[serde(rename = "type")]
    pub point_type: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
}

impl Point {
    /// Numeric point with an empty key.
    pub fn value(point_type: impl Into<String>, value: f64) -> Self {
        Self {
            point_type: point_type.into(),
            value,
            ..Self::default()
        }
    }

    /// Text point with an empty key.
    pub fn text(point_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            point_type: point_type.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    /// Boolean point encoded as 0/1.
    pub fn flag(point_type: impl Into<String>, on: bool) -> Self {
        Self::value(point_type, bool_to_value(on))
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    #[must_use]
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Whether this point shares the `(type, key)` merge key with `other`.
    pub fn same_key(&self, other: &Point) -> bool {
        self.point_type == other.point_type && self.key == other.key
    }

    fn order(&self, other: &Self) -> Ordering {
        self.point_type
            .cmp(&other.point_type)
            .then_with(|| self.key.cmp(&other.key))
            .then_with(|| self.time.cmp(&other.time))
    }
}

/// Encode a boolean as a point value.
pub fn bool_to_value(on: bool) -> f64 {
    if on { 1.0 } else { 0.0 }
}

// =============================================================================
// POINTS
// =============================================================================

/// A point set with `(type, key)` upsert semantics.
///
/// Kept sorted by `(type, key)` so that two sets with the same content
/// serialize to the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Points(Vec<Point>);

impl Points {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a point: replace the point with the same merge key, or insert.
    pub fn process_point(&mut self, point: Point) {
        match self.0.iter_mut().find(|p| p.same_key(&point)) {
            Some(existing) => *existing = point,
            None => self.0.push(point),
        }
        self.0.sort_by(Point::order);
    }

    pub fn find(&self, point_type: &str, key: &str) -> Option<&Point> {
        self.0
            .iter()
            .find(|p| p.point_type == point_type && p.key == key)
    }

    pub fn value(&self, point_type: &str, key: &str) -> Option<f64> {
        self.find(point_type, key).map(|p| p.value)
    }

    pub fn text(&self, point_type: &str, key: &str) -> Option<&str> {
        self.find(point_type, key).map(|p| p.text.as_str())
    }

    /// Non-zero value reads as `true`; a missing point reads as `false`.
    pub fn value_bool(&self, point_type: &str, key: &str) -> bool {
        self.value(point_type, key).is_some_and(|v| v != 0.0)
    }

    /// All points of one type, in key order.
    pub fn of_type<'a>(&'a self, point_type: &'a str) -> impl Iterator<Item = &'a Point> + 'a {
        self.0.iter().filter(move |p| p.point_type == point_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Point> for Points {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        let mut points = Points::new();
        for p in iter {
            points.process_point(p);
        }
        points
    }
}

impl From<Vec<Point>> for Points {
    fn from(points: Vec<Point>) -> Self {
        points.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a Points {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// =============================================================================
// TESTS
// =============================================================================
