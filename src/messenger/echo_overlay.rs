use chrono::{DateTime, Utc};

use crate::messenger::{
    conversation_id::ConversationId, conversations::Message,
    message_streaming::ConversationSnapshot,
};

/// A locally sent message not yet confirmed by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub local_id: String,
    pub sender: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedMessage {
    Confirmed(Message),
    Pending(PendingMessage),
}

impl RenderedMessage {
    pub fn sender(&self) -> &str {
        match self {
            RenderedMessage::Confirmed(m) => &m.sender,
            RenderedMessage::Pending(p) => &p.sender,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            RenderedMessage::Confirmed(m) => &m.body,
            RenderedMessage::Pending(p) => &p.body,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RenderedMessage::Pending(_))
    }
}

/// Presentation overlay for one conversation: the last authoritative snapshot plus
/// optimistic local echoes.
///
/// Every accepted snapshot replaces the view wholesale and drops all pending echoes;
/// nothing is merged field by field.
#[derive(Debug)]
pub struct EchoOverlay {
    conversation_id: ConversationId,
    base: Option<ConversationSnapshot>,
    pending: Vec<PendingMessage>,
}

impl EchoOverlay {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            base: None,
            pending: Vec::new(),
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Records an optimistic send and returns its local id.
    pub fn push_pending(&mut self, sender: &str, body: &str) -> String {
        let local_id = format!("local-{}", uuid::Uuid::new_v4());
        self.pending.push(PendingMessage {
            local_id: local_id.clone(),
            sender: sender.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
        });
        local_id
    }

    /// Drops a pending echo, e.g. after the send failed.
    pub fn discard_pending(&mut self, local_id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.local_id != local_id);
        self.pending.len() != before
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn version(&self) -> Option<i64> {
        self.base.as_ref().map(|b| b.version)
    }

    /// Confirmed messages in log order, then pending echoes in send order.
    pub fn render(&self) -> Vec<RenderedMessage> {
        let confirmed = self
            .base
            .iter()
            .flat_map(|b| b.messages.iter().cloned().map(RenderedMessage::Confirmed));
        let pending = self.pending.iter().cloned().map(RenderedMessage::Pending);
        confirmed.chain(pending).collect()
    }

    /// Replaces the view with `snapshot`. Snapshots of other conversations and
    /// snapshots not newer than the current base are ignored.
    pub fn reconcile(&mut self, snapshot: ConversationSnapshot) -> bool {
        if snapshot.conversation_id != self.conversation_id {
            return false;
        }
        if let Some(base) = &self.base
            && !snapshot.is_newer_than(base)
        {
            return false;
        }
        self.base = Some(snapshot);
        self.pending.clear();
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn id() -> ConversationId {
        ConversationId::from_external("alice_bob")
    }

    fn snapshot(version: i64, bodies: &[&str]) -> ConversationSnapshot {
        ConversationSnapshot {
            version,
            messages: bodies
                .iter()
                .enumerate()
                .map(|(i, body)| Message {
                    message_id: format!("m{}", i),
                    sender: "alice".to_string(),
                    body: body.to_string(),
                    timestamp: Utc::now(),
                    edited: false,
                    reactions: BTreeMap::new(),
                    read: BTreeMap::new(),
                })
                .collect(),
            ..ConversationSnapshot::empty(id())
        }
    }

    #[test]
    fn test_pending_rendered_after_confirmed() {
        let mut overlay = EchoOverlay::new(id());
        assert!(overlay.reconcile(snapshot(2, &["Hi"])));
        overlay.push_pending("alice", "sending...");

        let rendered = overlay.render();
        assert_eq!(rendered.len(), 2);
        assert!(!rendered[0].is_pending());
        assert!(rendered[1].is_pending());
        assert_eq!(rendered[1].body(), "sending...");
        assert_eq!(rendered[1].sender(), "alice");
    }

    #[test]
    fn test_reconcile_replaces_wholesale() {
        let mut overlay = EchoOverlay::new(id());
        overlay.push_pending("alice", "one");
        overlay.push_pending("alice", "two");

        assert!(overlay.reconcile(snapshot(3, &["one"])));
        assert_eq!(overlay.pending_count(), 0);
        let bodies: Vec<String> = overlay.render().iter().map(|m| m.body().to_string()).collect();
        assert_eq!(bodies, vec!["one"]);
        assert_eq!(overlay.version(), Some(3));
    }

    #[test]
    fn test_reconcile_ignores_stale_and_foreign_snapshots() {
        let mut overlay = EchoOverlay::new(id());
        overlay.reconcile(snapshot(5, &["a", "b"]));
        overlay.push_pending("alice", "c");

        assert!(!overlay.reconcile(snapshot(4, &["a"])));
        assert!(!overlay.reconcile(snapshot(5, &["a"])));
        let foreign = ConversationSnapshot {
            version: 9,
            ..ConversationSnapshot::empty(ConversationId::from_external("x_y"))
        };
        assert!(!overlay.reconcile(foreign));

        assert_eq!(overlay.pending_count(), 1);
        assert_eq!(overlay.render().len(), 3);
    }

    #[test]
    fn test_discard_pending() {
        let mut overlay = EchoOverlay::new(id());
        let local = overlay.push_pending("alice", "oops");
        assert!(local.starts_with("local-"));
        assert!(overlay.discard_pending(&local));
        assert!(!overlay.discard_pending(&local));
        assert!(overlay.render().is_empty());
    }
}
