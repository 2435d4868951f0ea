//! # Side-Effect Adapters
//!
//! Implementations of the core's outbound traits:
//!
//! - [`BusActionExecutor`]: rule actions become bus publishes
//! - [`LogSinkFactory`]: series-export sinks render line protocol to the log
//! - [`LogMessageService`]: message delivery is logged

use crate::bus::Bus;
use chrono::Utc;
use fleetgraph_core::wire::{self, Subject};
use fleetgraph_core::{
    Action, ActionExecutor, ActionKind, EffectError, Message, MessageService, MsgServiceConfig,
    NodeId, Point, PointSink, Rule, SinkConfig, SinkFactory,
};

// =============================================================================
// RULE ACTIONS
// =============================================================================

/// Publishes fired actions: `setValue` onto `node.<target>.points`,
/// `notify` onto `node.<rule>.not`.
#[derive(Debug, Clone)]
pub struct BusActionExecutor {
    bus: Bus,
}

impl BusActionExecutor {
    pub fn new(bus: Bus) -> Self {
        Self { bus }
    }

    fn publish(&self, subject: &Subject, payload: Vec<u8>) -> Result<(), EffectError> {
        let subject = subject.to_string();
        match self.bus.publish(&subject, payload) {
            Ok(0) => Err(EffectError::new(format!("no subscriber for {subject}"))),
            Ok(_) => Ok(()),
            Err(e) => Err(EffectError::new(e.to_string())),
        }
    }
}

impl ActionExecutor for BusActionExecutor {
    fn execute(&self, rule: &Rule, action: &Action, source: Option<&NodeId>) -> Result<(), EffectError> {
        match &action.kind {
            ActionKind::SetValue { .. } => {
                let (target, point) = action.set_value(source, Utc::now())?;
                let payload = wire::encode_points(&[point]).map_err(|e| EffectError::new(e.to_string()))?;
                tracing::debug!(rule = %rule.id, action = %action.id, target = %target, "set value");
                self.publish(&Subject::NodePoints(target), payload)
            }
            ActionKind::Notify => {
                let notification = action.notification(rule, source);
                let payload = wire::encode(&notification).map_err(|e| EffectError::new(e.to_string()))?;
                tracing::debug!(rule = %rule.id, action = %action.id, "notify");
                self.publish(&Subject::Notification(rule.id.clone()), payload)
            }
        }
    }
}

// =============================================================================
// SINKS
// =============================================================================

/// Builds [`LogSink`]s. A sink node without a URI is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSinkFactory;

impl SinkFactory for LogSinkFactory {
    fn sink(&self, config: &SinkConfig) -> Result<Box<dyn PointSink>, EffectError> {
        if config.uri.is_empty() {
            return Err(EffectError::new(format!("sink {} has no uri", config.id)));
        }
        Ok(Box::new(LogSink {
            config: config.clone(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct LogSink {
    config: SinkConfig,
}

impl PointSink for LogSink {
    fn write_points(&self, node_id: &NodeId, description: &str, points: &[Point]) -> Result<(), EffectError> {
        for point in points {
            let line = line_protocol(node_id, description, point);
            tracing::info!(
                sink = %self.config.id,
                uri = %self.config.uri,
                bucket = %self.config.bucket,
                org = %self.config.org,
                line = %line,
                "series point"
            );
        }
        Ok(())
    }
}

/// `points,node=<id>,description=<desc> <type>[.<key>]=<value> <ns>`
pub fn line_protocol(node_id: &NodeId, description: &str, point: &Point) -> String {
    let field = if point.key.is_empty() {
        escape(&point.point_type)
    } else {
        format!("{}.{}", escape(&point.point_type), escape(&point.key))
    };
    let nanos = point
        .time
        .and_then(|t| t.timestamp_nanos_opt())
        .unwrap_or_default();

    let mut line = format!("points,node={}", escape(node_id.as_str()));
    if !description.is_empty() {
        line.push_str(&format!(",description={}", escape(description)));
    }
    line.push_str(&format!(" {field}={} {nanos}", point.value));
    line
}

fn escape(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ").replace('=', "\\=")
}

// =============================================================================
// MESSAGE DELIVERY
// =============================================================================

/// Logs each message instead of contacting the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMessageService;

impl MessageService for LogMessageService {
    fn send(&self, service: &MsgServiceConfig, message: &Message) -> Result<(), EffectError> {
        if message.email.is_empty() && message.phone.is_empty() {
            return Err(EffectError::new(format!("message {} has no address", message.id)));
        }
        tracing::info!(
            service = %service.id,
            provider = %service.service,
            from = %service.from,
            user = %message.user_id,
            email = %message.email,
            phone = %message.phone,
            subject = %message.subject,
            "message delivered"
        );
        Ok(())
    }
}
