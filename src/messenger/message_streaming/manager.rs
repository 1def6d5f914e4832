//! Message stream manager for per-conversation broadcast channels.
//!
//! Streams are created lazily on subscribe and removed once every receiver has
//! been dropped. The highest version emitted per stream is tracked so that a
//! publish that lost a race with a newer commit is dropped instead of going
//! out of order. A separate channel announces newly created conversations to
//! listeners that follow a user rather than a single conversation.

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::types::ConversationSnapshot;
use crate::messenger::{conversation_id::ConversationId, conversations::Conversation};

pub(crate) const DEFAULT_BUFFER_SIZE: usize = 100;

struct Stream {
    sender: broadcast::Sender<ConversationSnapshot>,
    last_version: i64,
}

pub(crate) struct MessageStreamManager {
    streams: DashMap<ConversationId, Stream>,
    created: broadcast::Sender<Conversation>,
    buffer_size: usize,
}

impl MessageStreamManager {
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            streams: DashMap::new(),
            created: broadcast::channel(buffer_size).0,
            buffer_size,
        }
    }

    pub fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> broadcast::Receiver<ConversationSnapshot> {
        self.streams
            .entry(conversation_id.clone())
            .or_insert_with(|| Stream {
                sender: broadcast::channel(self.buffer_size).0,
                last_version: 0,
            })
            .sender
            .subscribe()
    }

    /// Sends `snapshot` to the conversation's subscribers. Returns whether it went out.
    pub fn emit(&self, snapshot: ConversationSnapshot) -> bool {
        let conversation_id = snapshot.conversation_id.clone();
        let Some(mut stream) = self.streams.get_mut(&conversation_id) else {
            return false;
        };

        if snapshot.version <= stream.last_version {
            tracing::debug!(
                target: "messenger::message_streaming::manager",
                "Dropping stale snapshot v{} for {} (already at v{})",
                snapshot.version,
                conversation_id,
                stream.last_version
            );
            return false;
        }
        stream.last_version = snapshot.version;

        if stream.sender.send(snapshot).is_ok() {
            return true;
        }

        // Every receiver is gone
        drop(stream);
        self.streams
            .remove_if(&conversation_id, |_, s| s.sender.receiver_count() == 0);
        false
    }

    /// Forgets the emitted versions, for when the store has been wiped and versions
    /// start over.
    pub fn reset_versions(&self) {
        for mut stream in self.streams.iter_mut() {
            stream.last_version = 0;
        }
    }

    /// Receiver of every conversation created from now on.
    pub fn subscribe_created(&self) -> broadcast::Receiver<Conversation> {
        self.created.subscribe()
    }

    /// Tells creation listeners about a new conversation. Returns whether anyone listened.
    pub fn announce_created(&self, conversation: &Conversation) -> bool {
        self.created.send(conversation.clone()).is_ok()
    }

    #[cfg(test)]
    pub fn receiver_count(&self, conversation_id: &ConversationId) -> usize {
        self.streams
            .get(conversation_id)
            .map(|s| s.sender.receiver_count())
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn has_stream(&self, conversation_id: &ConversationId) -> bool {
        self.streams.contains_key(conversation_id)
    }
}

impl Default for MessageStreamManager {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}
