//! # Notification Fan-out
//!
//! Resolves who receives a notification and which delivery services carry
//! a message. Delivery itself happens outside the core through
//! [`MessageService`].

use crate::graph::{DescendantQuery, GraphRead, descendants};
use crate::primitives::MAX_TRAVERSAL_DEPTH;
use crate::storage::GraphStore;
use crate::wire::{Message, Notification};
use crate::{EffectError, GraphError, NodeEdge, NodeId, NodeType, point_type};
use std::collections::BTreeSet;

/// Contact details of a `user` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: NodeId,
    pub parent: NodeId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

impl User {
    pub fn from_node(node: &NodeEdge) -> Self {
        let text = |t| node.points.text(t, "").unwrap_or_default().to_string();
        Self {
            id: node.id.clone(),
            parent: node.parent.clone(),
            first_name: text(point_type::FIRST_NAME),
            last_name: text(point_type::LAST_NAME),
            email: text(point_type::EMAIL),
            phone: text(point_type::PHONE),
        }
    }

    pub fn is_reachable(&self) -> bool {
        !self.email.is_empty() || !self.phone.is_empty()
    }
}

/// Settings of a `msgService` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgServiceConfig {
    pub id: NodeId,
    pub service: String,
    pub sid: String,
    pub auth_token: String,
    pub from: String,
}

impl MsgServiceConfig {
    pub fn from_node(node: &NodeEdge) -> Self {
        let text = |t| node.points.text(t, "").unwrap_or_default().to_string();
        Self {
            id: node.id.clone(),
            service: text(point_type::SERVICE),
            sid: text(point_type::SID),
            auth_token: text(point_type::AUTH_TOKEN),
            from: text(point_type::FROM),
        }
    }
}

/// Delivers one message through one service.
pub trait MessageService: Send + Sync {
    fn send(&self, service: &MsgServiceConfig, message: &Message) -> Result<(), EffectError>;
}

/// Live children of type `node_type` at `start` and every ancestor level,
/// nearest level first, de-duplicated by id.
pub fn collect_upward(
    store: &GraphStore,
    start: &NodeId,
    node_type: NodeType,
) -> Result<Vec<NodeEdge>, GraphError> {
    let txn = store.read()?;
    let query = DescendantQuery::children().of_type(node_type);

    let mut found = Vec::new();
    let mut seen = BTreeSet::new();
    let mut visited = BTreeSet::new();
    let mut stack = vec![(start.clone(), 0usize)];

    while let Some((current, level)) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        if level > MAX_TRAVERSAL_DEPTH {
            tracing::warn!(start = %start, node_id = %current, "fan-out walk hit depth limit");
            continue;
        }
        for node in descendants(&txn, &current, &query)? {
            if seen.insert(node.id.clone()) {
                found.push(node);
            }
        }
        for edge in txn.edges_up(&current, false)?.into_iter().rev() {
            if !edge.up.is_none() {
                stack.push((edge.up, level + 1));
            }
        }
    }

    Ok(found)
}

/// Per-user messages for a notification addressed to `node_id`.
///
/// A user node only messages itself; any other node messages every user
/// found at its level and above. Users without email or phone are skipped.
pub fn notification_messages(
    store: &GraphStore,
    node_id: &NodeId,
    notification: &Notification,
) -> Result<Vec<Message>, GraphError> {
    let node = store.node(node_id)?;

    let users: Vec<User> = if node.node_type == NodeType::User {
        let parent = if notification.parent.is_empty() {
            NodeId::none()
        } else {
            NodeId::new(notification.parent.clone())
        };
        vec![User::from_node(&NodeEdge {
            parent,
            ..node.detached(crate::SubtreeHash::default())
        })]
    } else {
        collect_upward(store, &node.id, NodeType::User)?
            .iter()
            .map(User::from_node)
            .collect()
    };

    Ok(users
        .into_iter()
        .filter(User::is_reachable)
        .map(|user| Message {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.id.to_string(),
            parent_id: user.parent.to_string(),
            notification_id: notification.id.clone(),
            email: user.email,
            phone: user.phone,
            subject: notification.subject.clone(),
            message: notification.message.clone(),
        })
        .collect())
}

/// Delivery services for a message, starting at the user's message parent.
pub fn message_services(store: &GraphStore, message: &Message) -> Result<Vec<MsgServiceConfig>, GraphError> {
    let start = if message.parent_id.is_empty() || message.parent_id == crate::primitives::NO_PARENT {
        NodeId::new(message.user_id.clone())
    } else {
        NodeId::new(message.parent_id.clone())
    };

    Ok(collect_upward(store, &start, NodeType::MsgService)?
        .iter()
        .map(MsgServiceConfig::from_node)
        .collect())
}
