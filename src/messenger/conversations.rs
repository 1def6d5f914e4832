use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messenger::{
    Messenger,
    conversation_id::ConversationId,
    error::{MessengerError, Result},
};

/// A single entry of a conversation's message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    pub sender: String,
    /// Older documents call this field `message`
    #[serde(alias = "message")]
    pub body: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    /// user id -> emoji, at most one reaction per user
    #[serde(default)]
    pub reactions: BTreeMap<String, String>,
    #[serde(default)]
    pub read: BTreeMap<String, bool>,
}

impl Message {
    pub fn is_read_by(&self, user_id: &str) -> bool {
        self.read.get(user_id).copied().unwrap_or(false)
    }

    /// Whether this message counts as unread for `user_id`. Own messages never do.
    pub fn is_unread_for(&self, user_id: &str) -> bool {
        self.sender != user_id && !self.is_read_by(user_id)
    }
}

/// A conversation document: a fixed participant set and an append-only message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<String>,
    pub is_group: bool,
    pub last_updated: DateTime<Utc>,
    pub messages: Vec<Message>,
    /// Incremented by every committed write; not part of the persisted record
    #[serde(skip)]
    pub version: i64,
}

impl Conversation {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.message_id == message_id)
    }

    pub(crate) fn message_mut(&mut self, message_id: &str) -> Result<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.message_id == message_id)
            .ok_or(MessengerError::MessageNotFound)
    }

    /// Participants other than `user_id`.
    pub fn other_participants<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a str> {
        self.participants
            .iter()
            .map(String::as_str)
            .filter(move |p| *p != user_id)
    }

    pub fn unread_messages<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a Message> {
        self.messages.iter().filter(move |m| m.is_unread_for(user_id))
    }

    /// The externally visible JSON record of this conversation.
    pub fn to_record_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Sorts and de-duplicates a participant list into its stored form.
    pub(crate) fn normalize_participants<S: AsRef<str>>(participants: &[S]) -> Vec<String> {
        let mut normalized: Vec<String> = participants
            .iter()
            .map(|p| p.as_ref().to_string())
            .collect();
        normalized.sort();
        normalized.dedup();
        normalized
    }
}

impl Messenger {
    /// Loads a conversation, through the conversation cache when it is enabled.
    pub async fn get_conversation(&self, conversation_id: &ConversationId) -> Result<Conversation> {
        if let Some(cached) = self.conversation_cache.get(conversation_id) {
            return Ok(cached);
        }
        let conversation = Conversation::find_by_id(conversation_id, &self.database).await?;
        self.conversation_cache.insert(&conversation);
        Ok(conversation)
    }

    /// All conversations `user_id` takes part in, most recently updated first.
    pub async fn conversations_for_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        Conversation::find_by_participant(user_id, &self.database).await
    }

    /// Creates a group conversation under an externally assigned id. Idempotent.
    pub async fn create_group_conversation(
        &self,
        conversation_id: &ConversationId,
        participants: &[String],
    ) -> Result<Conversation> {
        let normalized = Conversation::normalize_participants(participants);
        if normalized.len() <= 2 {
            return Err(MessengerError::InvalidParticipants(format!(
                "a group conversation needs more than 2 distinct participants, got {}",
                normalized.len()
            )));
        }
        if normalized.iter().any(|p| p.is_empty()) {
            return Err(MessengerError::InvalidParticipants(
                "participant ids must not be empty".to_string(),
            ));
        }

        let (conversation, created) =
            Conversation::create_if_absent(conversation_id, &normalized, &self.database).await?;
        if created {
            tracing::info!(
                target: "messenger::conversations",
                "Created group conversation {} with {} participants",
                conversation.id,
                conversation.participants.len()
            );
            self.publish(&conversation);
            self.feed.announce_created(&conversation);
        }
        Ok(conversation)
    }

    /// Deletes every conversation and resets the caches.
    pub async fn delete_all_data(&self) -> Result<()> {
        self.database.delete_all_data().await?;
        self.conversation_cache.clear();
        self.streams.reset_versions();
        tracing::warn!(target: "messenger::conversations", "All conversation data deleted");
        Ok(())
    }
}
