//! # Handler Metrics
//!
//! Latency samples averaged over a report period. When the period has
//! elapsed the next sample yields one point `{type, value: avg, min, max}`
//! for the caller to publish onto the root node.

use chrono::Utc;
use fleetgraph_core::{Point, point_type};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Window {
    last_report: Instant,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self {
            last_report: now,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

/// An averaging metric for one point type.
#[derive(Debug)]
pub struct Metric {
    point_type: &'static str,
    report_period: Duration,
    window: Mutex<Window>,
}

impl Metric {
    pub fn new(point_type: &'static str, report_period: Duration) -> Self {
        Self {
            point_type,
            report_period,
            window: Mutex::new(Window::new(Instant::now())),
        }
    }

    /// Record a sample; returns the averaged point when a report is due.
    pub fn add_sample(&self, sample: f64) -> Option<Point> {
        self.add_sample_at(sample, Instant::now())
    }

    fn add_sample_at(&self, sample: f64, now: Instant) -> Option<Point> {
        let mut w = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        w.count += 1;
        w.sum += sample;
        w.min = w.min.min(sample);
        w.max = w.max.max(sample);

        if now.duration_since(w.last_report) <= self.report_period {
            return None;
        }

        let point = Point {
            min: w.min,
            max: w.max,
            ..Point::value(self.point_type, w.sum / w.count as f64)
        }
        .at(Utc::now());
        *w = Window::new(now);
        Some(point)
    }
}

/// The per-handler metrics of the router.
#[derive(Debug)]
pub struct HandlerMetrics {
    pub node_points: Metric,
    pub edge_points: Metric,
    pub describe: Metric,
    pub children: Metric,
}

impl HandlerMetrics {
    pub fn new(report_period: Duration) -> Self {
        Self {
            node_points: Metric::new(point_type::METRIC_BUS_NODE_POINT, report_period),
            edge_points: Metric::new(point_type::METRIC_BUS_EDGE_POINT, report_period),
            describe: Metric::new(point_type::METRIC_BUS_NODE, report_period),
            children: Metric::new(point_type::METRIC_BUS_NODE_CHILDREN, report_period),
        }
    }
}
