//! # fleetgraph-core
//!
//! The versioned state graph for a fleet of IoT nodes - THE LOGIC.
//!
//! Nodes carry typed points and hang off one or more parents. Every edge
//! carries a subtree hash so a remote replica can find diverging branches
//! by comparing hashes from the root down.
//!
//! ## Architectural Constraints
//!
//! - Synchronous: no async runtime and no network access
//! - Single writer: every mutation takes a [`WriteGuard`]
//! - Transactional: a mutation and its hash chain commit together
//! - Deterministic: children are ordered by edge id, points by `(type, key)`
//!
//! Side effects (rule actions, sinks, message delivery) leave the core
//! through the [`ActionExecutor`], [`SinkFactory`] and [`MessageService`]
//! traits.

// =============================================================================
// MODULES
// =============================================================================

pub mod backup;
pub mod fanout;
pub mod graph;
pub mod hash;
pub mod ingestor;
pub mod lock;
pub mod primitives;
pub mod propagate;
pub mod rules;
pub mod storage;
pub mod types;
pub mod wire;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{
    Behavior, Edge, EdgeId, EffectError, GraphError, Meta, Node, NodeEdge, NodeId, NodeType,
    Point, Points, SubtreeHash, bool_to_value, point_type,
};

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use backup::{Backup, dump, read_backup, restore, write_dump};
pub use fanout::{MessageService, MsgServiceConfig, User, message_services, notification_messages};
pub use graph::{DescendantQuery, GraphRead, GraphWrite};
pub use ingestor::PointIngestor;
pub use lock::{WriteGuard, WriteLock};
pub use propagate::{PointSink, PropagationReport, SinkConfig, SinkFactory, UpstreamPropagator};
pub use rules::{Action, ActionExecutor, ActionKind, Rule, RuleEngine, RuleOutcome};
pub use storage::{GraphCounts, GraphStore};
pub use wire::{ChildrenRequest, Message, NodeReply, NodesReply, Notification, Subject};
