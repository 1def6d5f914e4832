use std::collections::HashMap;

use super::{NotificationCategory, NotificationSummary, UnreadItem};
use crate::messenger::{
    conversation_id::ConversationId, message_streaming::ConversationSnapshot,
};

const EXCERPT_CHARS: usize = 80;

struct ProjectedConversation {
    category: NotificationCategory,
    snapshot: ConversationSnapshot,
}

/// Unread state of one user, derived from the latest snapshot of each conversation.
pub struct NotificationProjector {
    user_id: String,
    conversations: HashMap<ConversationId, ProjectedConversation>,
}

impl NotificationProjector {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            conversations: HashMap::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Replaces the conversation's state if `snapshot` is newer than what is held.
    /// Returns whether anything changed.
    pub fn apply_snapshot(
        &mut self,
        category: NotificationCategory,
        snapshot: ConversationSnapshot,
    ) -> bool {
        if let Some(current) = self.conversations.get(&snapshot.conversation_id)
            && !snapshot.is_newer_than(&current.snapshot)
        {
            return false;
        }
        self.conversations.insert(
            snapshot.conversation_id.clone(),
            ProjectedConversation { category, snapshot },
        );
        true
    }

    pub fn remove_conversation(&mut self, conversation_id: &ConversationId) -> bool {
        self.conversations.remove(conversation_id).is_some()
    }

    pub fn unread_count(&self, category: NotificationCategory) -> usize {
        self.in_category(category)
            .map(|c| {
                c.snapshot
                    .messages
                    .iter()
                    .filter(|m| m.is_unread_for(&self.user_id))
                    .count()
            })
            .sum()
    }

    /// Unread messages in `category`, newest first.
    pub fn unread_items(&self, category: NotificationCategory) -> Vec<UnreadItem> {
        let mut items: Vec<UnreadItem> = self
            .in_category(category)
            .flat_map(|c| {
                c.snapshot
                    .messages
                    .iter()
                    .filter(|m| m.is_unread_for(&self.user_id))
                    .map(|m| UnreadItem {
                        conversation_id: c.snapshot.conversation_id.clone(),
                        message_id: m.message_id.clone(),
                        sender: m.sender.clone(),
                        excerpt: excerpt(&m.body),
                        timestamp: m.timestamp,
                    })
            })
            .collect();
        items.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        items
    }

    pub fn total_unread(&self) -> usize {
        NotificationCategory::ALL
            .iter()
            .map(|category| self.unread_count(*category))
            .sum()
    }

    pub fn summary(&self) -> NotificationSummary {
        let instructor = self.unread_count(NotificationCategory::Instructor);
        let student = self.unread_count(NotificationCategory::Student);
        let peer = self.unread_count(NotificationCategory::Peer);
        NotificationSummary {
            instructor,
            student,
            peer,
            total: instructor + student + peer,
        }
    }

    fn in_category(
        &self,
        category: NotificationCategory,
    ) -> impl Iterator<Item = &ProjectedConversation> {
        self.conversations
            .values()
            .filter(move |c| c.category == category)
    }
}

fn excerpt(body: &str) -> String {
    let mut chars = body.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}
