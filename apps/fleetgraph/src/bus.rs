//! # In-Process Subject Bus
//!
//! Publish/subscribe over dot-separated subjects with request/reply.
//!
//! - `*` in a pattern matches exactly one token, `>` matches one or more
//!   trailing tokens
//! - Every subscription owns a bounded queue; a full queue drops the
//!   message for that subscriber and logs a slow consumer
//! - `request` publishes with a private `_INBOX.<uuid>` reply subject and
//!   waits for the first reply up to a timeout

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default per-subscription queue length.
pub const DEFAULT_CAPACITY: usize = 1024;

const INBOX_PREFIX: &str = "_INBOX";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("no responders for {0}")]
    NoResponders(String),
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("subscription closed")]
    Closed,
    #[error("invalid subject: {0}")]
    InvalidSubject(String),
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Vec<u8>,
}

struct Subscriber {
    id: u64,
    pattern: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
}

struct BusInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl BusInner {
    fn remove(&self, id: u64) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|s| s.id != id);
    }
}

/// Cheaply cloneable handle to a shared bus.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("capacity", &self.inner.capacity)
            .finish_non_exhaustive()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Subscribe to a subject pattern.
    pub fn subscribe(&self, pattern: &str) -> Result<Subscription, BusError> {
        let tokens = tokenize(pattern)?;
        if tokens
            .iter()
            .position(|t| t == ">")
            .is_some_and(|pos| pos + 1 != tokens.len())
        {
            return Err(BusError::InvalidSubject(pattern.to_string()));
        }

        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                pattern: tokens,
                tx,
            });

        Ok(Subscription {
            id,
            pattern: pattern.to_string(),
            rx,
            bus: Arc::clone(&self.inner),
        })
    }

    /// Publish without a reply subject. Returns how many subscribers got it.
    pub fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<usize, BusError> {
        self.deliver(subject, None, payload)
    }

    /// Publish with a reply subject.
    pub fn publish_request(&self, subject: &str, reply: &str, payload: Vec<u8>) -> Result<usize, BusError> {
        self.deliver(subject, Some(reply.to_string()), payload)
    }

    /// Answer a message if it asked for a reply.
    pub fn respond(&self, message: &BusMessage, payload: Vec<u8>) {
        if let Some(reply) = &message.reply {
            if let Err(e) = self.publish(reply, payload) {
                tracing::warn!(subject = %message.subject, error = %e, "failed to send reply");
            }
        }
    }

    /// Publish and wait for the first reply.
    pub async fn request(&self, subject: &str, payload: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, BusError> {
        let inbox = format!("{INBOX_PREFIX}.{}", uuid::Uuid::new_v4().simple());
        let mut sub = self.subscribe(&inbox)?;

        if self.publish_request(subject, &inbox, payload)? == 0 {
            return Err(BusError::NoResponders(subject.to_string()));
        }

        match tokio::time::timeout(timeout, sub.recv()).await {
            Ok(Some(msg)) => Ok(msg.payload),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout(subject.to_string())),
        }
    }

    fn deliver(&self, subject: &str, reply: Option<String>, payload: Vec<u8>) -> Result<usize, BusError> {
        let tokens = tokenize(subject)?;
        if tokens.iter().any(|t| t == "*" || t == ">") {
            return Err(BusError::InvalidSubject(subject.to_string()));
        }

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let subs = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for sub in subs.iter().filter(|s| matches(&s.pattern, &tokens)) {
                let msg = BusMessage {
                    subject: subject.to_string(),
                    reply: reply.clone(),
                    payload: payload.clone(),
                };
                match sub.tx.try_send(msg) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(subject, subscription = sub.id, "slow consumer, message dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(sub.id),
                }
            }
        }
        for id in closed {
            self.inner.remove(id);
        }

        Ok(delivered)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    pattern: String,
    rx: mpsc::Receiver<BusMessage>,
    bus: Arc<BusInner>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next message, or `None` once the sending side is removed.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove(self.id);
    }
}

fn tokenize(subject: &str) -> Result<Vec<String>, BusError> {
    let tokens: Vec<String> = subject.split('.').map(str::to_string).collect();
    if tokens.iter().any(String::is_empty) {
        return Err(BusError::InvalidSubject(subject.to_string()));
    }
    Ok(tokens)
}

fn matches(pattern: &[String], subject: &[String]) -> bool {
    let mut i = 0;
    for p in pattern {
        if p == ">" {
            return subject.len() > i;
        }
        match subject.get(i) {
            Some(s) if p == "*" || p == s => i += 1,
            _ => return false,
        }
    }
    i == subject.len()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        tokenize(s).expect("tokens")
    }

    #[test]
    fn wildcard_matching() {
        assert!(matches(&toks("node.*.points"), &toks("node.a.points")));
        assert!(!matches(&toks("node.*.points"), &toks("node.a.b.points")));
        assert!(matches(&toks("node.*.*.points"), &toks("node.a.b.points")));
        assert!(matches(&toks("node.*"), &toks("node.a")));
        assert!(!matches(&toks("node.*"), &toks("node.a.children")));
        assert!(matches(&toks("node.>"), &toks("node.a.children")));
        assert!(!matches(&toks("node.>"), &toks("node")));
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscribers() {
        let bus = Bus::new(8);
        let mut points = bus.subscribe("node.*.points").expect("sub");
        let mut all = bus.subscribe("node.>").expect("sub");

        assert_eq!(bus.publish("node.a.points", b"x".to_vec()).expect("publish"), 2);
        assert_eq!(points.recv().await.expect("msg").subject, "node.a.points");
        assert_eq!(all.recv().await.expect("msg").payload, b"x");
    }

    #[tokio::test]
    async fn request_reply_and_no_responders() {
        let bus = Bus::new(8);
        let err = bus
            .request("node.a", Vec::new(), Duration::from_millis(50))
            .await
            .expect_err("nobody listening");
        assert_eq!(err, BusError::NoResponders("node.a".into()));

        let mut sub = bus.subscribe("node.*").expect("sub");
        let responder = bus.clone();
        tokio::spawn(async move {
            let msg = sub.recv().await.expect("msg");
            responder.respond(&msg, b"pong".to_vec());
        });
        let reply = bus
            .request("node.a", b"ping".to_vec(), Duration::from_secs(1))
            .await
            .expect("reply");
        assert_eq!(reply, b"pong");
    }

    #[tokio::test]
    async fn request_times_out_without_reply() {
        let bus = Bus::new(8);
        let _silent = bus.subscribe("node.*").expect("sub");
        let err = bus
            .request("node.a", Vec::new(), Duration::from_millis(20))
            .await
            .expect_err("timeout");
        assert!(matches!(err, BusError::Timeout(_)));
    }

    #[test]
    fn full_queue_drops_and_dropped_subscription_unsubscribes() {
        let bus = Bus::new(1);
        let sub = bus.subscribe("a.b").expect("sub");
        assert_eq!(bus.publish("a.b", Vec::new()).expect("first"), 1);
        assert_eq!(bus.publish("a.b", Vec::new()).expect("second"), 0);
        drop(sub);
        assert_eq!(bus.subscription_count(), 0);
        assert!(bus.publish("a.*", Vec::new()).is_err());
    }
}
