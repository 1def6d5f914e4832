use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::messenger::{
    Messenger,
    conversation_id::ConversationId,
    conversations::{Conversation, Message},
    database::conversations::UpdateOutcome,
    directory::ParticipantDirectory,
    emoji_utils,
    error::{MessengerError, Result},
};

/// What a reaction toggle did to the reacting user's entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ReactionChange {
    Added { emoji: String },
    Replaced { previous: String, current: String },
    Removed { emoji: String },
}

fn validate_body(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(MessengerError::EmptyBody);
    }
    Ok(())
}

fn ensure_participant(conversation: &Conversation, user_id: &str) -> Result<()> {
    if conversation.has_participant(user_id) {
        Ok(())
    } else {
        Err(MessengerError::Forbidden(format!(
            "{} is not a participant of {}",
            user_id, conversation.id
        )))
    }
}

pub(crate) fn new_message(sender: &str, body: &str) -> Message {
    Message {
        message_id: uuid::Uuid::new_v4().to_string(),
        sender: sender.to_string(),
        body: body.to_string(),
        timestamp: Utc::now(),
        edited: false,
        reactions: BTreeMap::new(),
        read: BTreeMap::from([(sender.to_string(), true)]),
    }
}

/// Appends a new message from `sender`.
pub(crate) fn append_message(
    conversation: &mut Conversation,
    sender: &str,
    body: &str,
) -> Result<Message> {
    ensure_participant(conversation, sender)?;
    let message = new_message(sender, body);
    conversation.messages.push(message.clone());
    Ok(message)
}

/// Replaces the body of a message. Only its sender may edit; `edited` is set even when
/// the text does not change. The new body must already be validated.
pub(crate) fn apply_edit(
    conversation: &mut Conversation,
    user_id: &str,
    message_id: &str,
    new_body: &str,
) -> Result<Message> {
    let message = conversation.message_mut(message_id)?;
    if message.sender != user_id {
        return Err(MessengerError::Forbidden(format!(
            "{} cannot edit a message sent by {}",
            user_id, message.sender
        )));
    }

    message.body = new_body.to_string();
    message.edited = true;
    Ok(message.clone())
}

/// Toggles `user_id`'s reaction: the same emoji again removes it, a different one replaces it.
pub(crate) fn toggle_reaction(message: &mut Message, user_id: &str, emoji: &str) -> ReactionChange {
    match message.reactions.get(user_id) {
        Some(existing) if existing == emoji => {
            message.reactions.remove(user_id);
            ReactionChange::Removed {
                emoji: emoji.to_string(),
            }
        }
        Some(existing) => {
            let previous = existing.clone();
            message
                .reactions
                .insert(user_id.to_string(), emoji.to_string());
            ReactionChange::Replaced {
                previous,
                current: emoji.to_string(),
            }
        }
        None => {
            message
                .reactions
                .insert(user_id.to_string(), emoji.to_string());
            ReactionChange::Added {
                emoji: emoji.to_string(),
            }
        }
    }
}

/// Marks a message read for `user_id`. Returns false when nothing changes: the user
/// sent it, or already read it.
pub(crate) fn apply_read(message: &mut Message, user_id: &str) -> bool {
    if message.sender == user_id || message.is_read_by(user_id) {
        return false;
    }
    message.read.insert(user_id.to_string(), true);
    true
}

impl Messenger {
    /// Sends a message in the direct conversation between the given two participants,
    /// creating the conversation on first use.
    pub async fn send_message<S: AsRef<str>>(
        &self,
        sender: &str,
        participants: &[S],
        body: &str,
    ) -> Result<Message> {
        validate_body(body)?;
        let conversation_id = ConversationId::derive(participants)?;
        if !participants.iter().any(|p| p.as_ref() == sender) {
            return Err(MessengerError::Forbidden(format!(
                "{} cannot send on behalf of other users",
                sender
            )));
        }

        if self.config.require_shared_group {
            self.ensure_shared_group(participants).await?;
        }

        let normalized = Conversation::normalize_participants(participants);
        let (conversation, created) =
            Conversation::create_if_absent(&conversation_id, &normalized, &self.database).await?;
        if created {
            tracing::info!(
                target: "messenger::messages::send_message",
                "Started conversation {}",
                conversation_id
            );
            self.feed.announce_created(&conversation);
        }

        let (_, message) = self
            .update_with_retry(&conversation_id, "send_message", |conversation| {
                Ok((true, append_message(conversation, sender, body)?))
            })
            .await?;
        Ok(message)
    }

    /// Sends a message into an existing conversation, two-party or group.
    pub async fn send_to_conversation(
        &self,
        sender: &str,
        conversation_id: &ConversationId,
        body: &str,
    ) -> Result<Message> {
        validate_body(body)?;
        let (_, message) = self
            .update_with_retry(conversation_id, "send_to_conversation", |conversation| {
                Ok((true, append_message(conversation, sender, body)?))
            })
            .await?;
        Ok(message)
    }

    pub async fn edit_message(
        &self,
        user_id: &str,
        conversation_id: &ConversationId,
        message_id: &str,
        new_body: &str,
    ) -> Result<Message> {
        validate_body(new_body)?;
        let (_, message) = self
            .update_with_retry(conversation_id, "edit_message", |conversation| {
                Ok((true, apply_edit(conversation, user_id, message_id, new_body)?))
            })
            .await?;
        Ok(message)
    }

    /// Toggles `user_id`'s reaction on a message.
    pub async fn react_to_message(
        &self,
        user_id: &str,
        conversation_id: &ConversationId,
        message_id: &str,
        emoji: &str,
    ) -> Result<ReactionChange> {
        let emoji = emoji_utils::validate_and_normalize_reaction(emoji, self.config.normalize_emoji)?;
        let (_, change) = self
            .update_with_retry(conversation_id, "react_to_message", |conversation| {
                ensure_participant(conversation, user_id)?;
                let message = conversation.message_mut(message_id)?;
                Ok((true, toggle_reaction(message, user_id, &emoji)))
            })
            .await?;

        tracing::debug!(
            target: "messenger::messages::react_to_message",
            "Reaction by {} on {}: {:?}",
            user_id,
            message_id,
            change
        );
        Ok(change)
    }

    /// Marks one message read for `user_id`. Returns whether anything was written.
    pub async fn mark_read(
        &self,
        user_id: &str,
        conversation_id: &ConversationId,
        message_id: &str,
    ) -> Result<bool> {
        let (_, changed) = self
            .update_with_retry(conversation_id, "mark_read", |conversation| {
                ensure_participant(conversation, user_id)?;
                let message = conversation.message_mut(message_id)?;
                let changed = apply_read(message, user_id);
                Ok((changed, changed))
            })
            .await?;
        Ok(changed)
    }

    /// Marks a batch of messages read in one write. Unknown ids are skipped.
    /// Returns how many messages changed.
    pub async fn mark_conversation_read(
        &self,
        user_id: &str,
        conversation_id: &ConversationId,
        message_ids: &[String],
    ) -> Result<usize> {
        let (_, marked) = self
            .update_with_retry(conversation_id, "mark_conversation_read", |conversation| {
                ensure_participant(conversation, user_id)?;
                let marked = conversation
                    .messages
                    .iter_mut()
                    .filter(|m| message_ids.contains(&m.message_id))
                    .map(|m| apply_read(m, user_id))
                    .filter(|changed| *changed)
                    .count();
                Ok((marked > 0, marked))
            })
            .await?;
        Ok(marked)
    }

    /// Runs one read-modify-write against a conversation, retrying on version
    /// conflicts with backoff, and publishes the result when it commits.
    pub(crate) async fn update_with_retry<F, T>(
        &self,
        conversation_id: &ConversationId,
        operation: &'static str,
        mut mutate: F,
    ) -> Result<(Conversation, T)>
    where
        F: FnMut(&mut Conversation) -> Result<(bool, T)>,
    {
        let retry = &self.config.retry;
        let mut attempt = 1;
        loop {
            match Conversation::atomic_update(conversation_id, &self.database, &mut mutate).await {
                Ok((outcome, value)) => {
                    if let UpdateOutcome::Committed(conversation) = &outcome {
                        self.publish(conversation);
                    }
                    return Ok((outcome.into_conversation(), value));
                }
                Err(MessengerError::Conflict) if retry.should_retry(attempt) => {
                    let delay = retry.delay_for(attempt);
                    tracing::debug!(
                        target: "messenger::messages::update_with_retry",
                        "{} on {} conflicted (attempt {}), retrying in {:?}",
                        operation,
                        conversation_id,
                        attempt,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(MessengerError::Conflict) => {
                    tracing::warn!(
                        target: "messenger::messages::update_with_retry",
                        "{} on {} gave up after {} attempts",
                        operation,
                        conversation_id,
                        attempt
                    );
                    return Err(MessengerError::Busy { attempts: attempt });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Both participants must resolve in the directory and share a group.
    async fn ensure_shared_group<S: AsRef<str>>(&self, participants: &[S]) -> Result<()> {
        let mut group: Option<String> = None;
        for user_id in participants.iter().map(|p| p.as_ref()) {
            let participant = self
                .directory
                .lookup(user_id)
                .await?
                .ok_or_else(|| MessengerError::UnknownUser(user_id.to_string()))?;

            match (&group, participant.group_id) {
                (_, None) => {
                    return Err(MessengerError::Forbidden(format!(
                        "{} does not belong to a group",
                        user_id
                    )));
                }
                (None, Some(group_id)) => group = Some(group_id),
                (Some(expected), Some(group_id)) if *expected != group_id => {
                    return Err(MessengerError::Forbidden(
                        "participants do not share a group".to_string(),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
