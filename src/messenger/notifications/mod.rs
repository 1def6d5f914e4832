//! Per-user unread projections over the user's conversations.
//!
//! Conversations are bucketed by who the user is talking to: a student sees
//! instructor and peer conversations, instructors and admins see student,
//! instructor and peer conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod projector;
mod watcher;

pub use projector::NotificationProjector;
pub use watcher::NotificationWatcher;

use crate::messenger::{
    Messenger,
    conversation_id::ConversationId,
    conversations::Conversation,
    directory::{ParticipantDirectory, Role},
    error::Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Instructor,
    Student,
    Peer,
}

impl NotificationCategory {
    pub const ALL: [NotificationCategory; 3] = [
        NotificationCategory::Instructor,
        NotificationCategory::Student,
        NotificationCategory::Peer,
    ];

    /// Category of a conversation as seen by a viewer with `viewer_role`, given the
    /// roles of the other participants. Unknown users have no role; an unknown
    /// viewer is treated like a student.
    pub fn classify(
        viewer_role: Option<Role>,
        other_roles: impl IntoIterator<Item = Option<Role>>,
    ) -> Self {
        let others: Vec<Role> = other_roles.into_iter().flatten().collect();
        let any = |role: Role| others.contains(&role);

        match viewer_role {
            Some(Role::Instructor) | Some(Role::Admin) => {
                if any(Role::Student) {
                    NotificationCategory::Student
                } else if any(Role::Instructor) {
                    NotificationCategory::Instructor
                } else {
                    NotificationCategory::Peer
                }
            }
            Some(Role::Student) | None => {
                if any(Role::Instructor) {
                    NotificationCategory::Instructor
                } else {
                    NotificationCategory::Peer
                }
            }
        }
    }
}

/// One unread message, as listed in a notification panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadItem {
    pub conversation_id: ConversationId,
    pub message_id: String,
    pub sender: String,
    pub excerpt: String,
    pub timestamp: DateTime<Utc>,
}

/// Unread counts per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummary {
    pub instructor: usize,
    pub student: usize,
    pub peer: usize,
    pub total: usize,
}

impl NotificationSummary {
    pub fn count(&self, category: NotificationCategory) -> usize {
        match category {
            NotificationCategory::Instructor => self.instructor,
            NotificationCategory::Student => self.student,
            NotificationCategory::Peer => self.peer,
        }
    }
}

/// Resolves the category of `conversation` for `viewer_id` through the directory.
pub(crate) async fn classify_conversation(
    directory: &dyn ParticipantDirectory,
    viewer_id: &str,
    conversation: &Conversation,
) -> Result<NotificationCategory> {
    let viewer_role = directory.lookup(viewer_id).await?.map(|p| p.role);
    let mut other_roles = Vec::new();
    for other in conversation.other_participants(viewer_id) {
        other_roles.push(directory.lookup(other).await?.map(|p| p.role));
    }
    Ok(NotificationCategory::classify(viewer_role, other_roles))
}

/// Adds up per-conversation read counts, logging the conversations that failed.
fn sum_marked<'a>(
    user_id: &str,
    results: impl IntoIterator<Item = (&'a ConversationId, Result<usize>)>,
) -> usize {
    let mut marked = 0;
    for (conversation_id, result) in results {
        match result {
            Ok(count) => marked += count,
            Err(e) => tracing::warn!(
                target: "messenger::notifications::acknowledge_all",
                "Could not mark {} read for {}: {}",
                conversation_id,
                user_id,
                e
            ),
        }
    }
    marked
}

impl Messenger {
    /// One-shot projection of `user_id`'s unread state across all conversations.
    pub async fn project_notifications(&self, user_id: &str) -> Result<NotificationProjector> {
        let mut projector = NotificationProjector::new(user_id);
        for conversation in self.conversations_for_user(user_id).await? {
            let category =
                classify_conversation(&*self.directory, user_id, &conversation).await?;
            projector.apply_snapshot(category, (&conversation).into());
        }
        Ok(projector)
    }

    /// Live projection for `user_id`, updated on every committed write to any of the
    /// user's conversations. Conversations created later are picked up as they appear.
    pub async fn watch_notifications(&self, user_id: &str) -> Result<NotificationWatcher> {
        let watcher =
            NotificationWatcher::start(user_id, self.feed.clone(), self.directory.clone()).await?;
        tracing::debug!(
            target: "messenger::notifications::watch_notifications",
            "Watching {} conversations for {}",
            watcher.tracked_count(),
            user_id
        );
        Ok(watcher)
    }

    /// Marks one message read for `user_id`.
    pub async fn acknowledge(
        &self,
        user_id: &str,
        conversation_id: &ConversationId,
        message_id: &str,
    ) -> Result<bool> {
        self.mark_read(user_id, conversation_id, message_id).await
    }

    /// Marks everything currently unread for `user_id` as read, one atomic write per
    /// conversation, conversations in parallel. Messages that arrive after the scan are
    /// left unread. A conversation that fails is logged and skipped; its messages stay
    /// unread and the others are still marked. Returns the number of messages marked.
    pub async fn acknowledge_all(&self, user_id: &str) -> Result<usize> {
        let pending: Vec<(ConversationId, Vec<String>)> = self
            .conversations_for_user(user_id)
            .await?
            .into_iter()
            .map(|conversation| {
                let ids = conversation
                    .unread_messages(user_id)
                    .map(|m| m.message_id.clone())
                    .collect::<Vec<_>>();
                (conversation.id, ids)
            })
            .filter(|(_, ids)| !ids.is_empty())
            .collect();

        let results = futures::future::join_all(
            pending
                .iter()
                .map(|(id, ids)| self.mark_conversation_read(user_id, id, ids)),
        )
        .await;

        let marked = sum_marked(
            user_id,
            pending.iter().map(|(id, _)| id).zip(results),
        );

        tracing::info!(
            target: "messenger::notifications::acknowledge_all",
            "Marked {} messages read for {} across {} conversations",
            marked,
            user_id,
            pending.len()
        );
        Ok(marked)
    }
}
