//! Types for the message streaming feature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::messenger::{
    conversation_id::ConversationId,
    conversations::{Conversation, Message},
};

/// The complete message list of a conversation at one committed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub conversation_id: ConversationId,
    /// 0 when the conversation does not exist yet
    pub version: i64,
    pub last_updated: Option<DateTime<Utc>>,
    pub messages: Vec<Message>,
}

impl ConversationSnapshot {
    /// Snapshot of a conversation that has not been created.
    pub fn empty(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            version: 0,
            last_updated: None,
            messages: Vec::new(),
        }
    }

    pub fn is_newer_than(&self, other: &ConversationSnapshot) -> bool {
        self.version > other.version
    }
}

impl From<&Conversation> for ConversationSnapshot {
    fn from(conversation: &Conversation) -> Self {
        Self {
            conversation_id: conversation.id.clone(),
            version: conversation.version,
            last_updated: Some(conversation.last_updated),
            messages: conversation.messages.clone(),
        }
    }
}

/// Result of subscribing to a conversation.
///
/// The receiver is registered before `initial` is read, so every commit after the
/// initial snapshot shows up on `updates`. Snapshots on `updates` that are not newer
/// than `initial` can be skipped.
pub struct ConversationSubscription {
    pub initial: ConversationSnapshot,
    pub updates: broadcast::Receiver<ConversationSnapshot>,
}
