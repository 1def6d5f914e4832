use dashmap::DashMap;

use crate::messenger::{conversation_id::ConversationId, conversations::Conversation};

/// Read-through cache of conversation documents, kept fresh by published snapshots.
///
/// Coherent only within one process: writes made by another process sharing the
/// database are not seen until the next local commit on that conversation.
#[derive(Debug)]
pub struct ConversationCache {
    enabled: bool,
    entries: DashMap<ConversationId, Conversation>,
}

impl ConversationCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, id: &ConversationId) -> Option<Conversation> {
        if !self.enabled {
            return None;
        }
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    /// Stores `conversation` unless a newer version is already cached.
    pub fn insert(&self, conversation: &Conversation) {
        if !self.enabled {
            return;
        }
        self.entries
            .entry(conversation.id.clone())
            .and_modify(|cached| {
                if conversation.version > cached.version {
                    *cached = conversation.clone();
                }
            })
            .or_insert_with(|| conversation.clone());
    }

    pub fn invalidate(&self, id: &ConversationId) {
        self.entries.remove(id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn conversation(version: i64) -> Conversation {
        Conversation {
            id: ConversationId::from_external("a_b"),
            participants: vec!["a".to_string(), "b".to_string()],
            is_group: false,
            last_updated: Utc::now(),
            messages: Vec::new(),
            version,
        }
    }

    #[test]
    fn test_keeps_newest_version() {
        let cache = ConversationCache::new(true);
        cache.insert(&conversation(2));
        cache.insert(&conversation(1));
        assert_eq!(cache.get(&ConversationId::from_external("a_b")).unwrap().version, 2);

        cache.insert(&conversation(5));
        assert_eq!(cache.get(&ConversationId::from_external("a_b")).unwrap().version, 5);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = ConversationCache::new(true);
        cache.insert(&conversation(1));
        cache.invalidate(&ConversationId::from_external("a_b"));
        assert!(cache.is_empty());

        cache.insert(&conversation(1));
        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let cache = ConversationCache::new(false);
        cache.insert(&conversation(1));
        assert!(cache.get(&ConversationId::from_external("a_b")).is_none());
        assert!(cache.is_empty());
        assert!(!cache.is_enabled());
    }
}
