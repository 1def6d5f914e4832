use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use super::manager::MessageStreamManager;
use super::types::{ConversationSnapshot, ConversationSubscription};
use crate::messenger::{
    conversation_id::ConversationId,
    conversations::Conversation,
    database::Database,
    error::Result,
};

type SnapshotCallback = Box<dyn FnMut(ConversationSnapshot) + Send>;

/// Subscription entry point for live conversation snapshots.
#[derive(Clone)]
pub struct ConversationFeed {
    database: Arc<Database>,
    streams: Arc<MessageStreamManager>,
}

impl ConversationFeed {
    pub(crate) fn new(database: Arc<Database>, streams: Arc<MessageStreamManager>) -> Self {
        Self { database, streams }
    }

    /// Current snapshot read from storage; empty with version 0 if the conversation
    /// does not exist.
    pub async fn snapshot(&self, conversation_id: &ConversationId) -> Result<ConversationSnapshot> {
        Ok(self
            .load(conversation_id)
            .await?
            .map(|conversation| ConversationSnapshot::from(&conversation))
            .unwrap_or_else(|| ConversationSnapshot::empty(conversation_id.clone())))
    }

    pub(crate) async fn load(&self, conversation_id: &ConversationId) -> Result<Option<Conversation>> {
        Conversation::find_optional(conversation_id, &self.database).await
    }

    pub async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationSubscription> {
        // Register first so nothing committed after the read below is missed
        let updates = self.streams.subscribe(conversation_id);
        let initial = self.snapshot(conversation_id).await?;

        tracing::debug!(
            target: "messenger::message_streaming::subscribe",
            "Subscribed to {} at v{}",
            conversation_id,
            initial.version
        );
        Ok(ConversationSubscription { initial, updates })
    }

    /// Calls `on_snapshot` with the current snapshot and then with every newer one,
    /// in increasing version order, until the returned handle is unsubscribed or dropped.
    ///
    /// Must be called from within a Tokio runtime. The callback runs on the delivery
    /// task and must not call [`SubscriptionHandle::unsubscribe`] on its own handle.
    pub async fn subscribe_with<F>(
        &self,
        conversation_id: &ConversationId,
        on_snapshot: F,
    ) -> Result<SubscriptionHandle>
    where
        F: FnMut(ConversationSnapshot) + Send + 'static,
    {
        let ConversationSubscription {
            initial,
            mut updates,
        } = self.subscribe(conversation_id).await?;

        let callback: Arc<Mutex<Option<SnapshotCallback>>> =
            Arc::new(Mutex::new(Some(Box::new(on_snapshot))));

        let task = tokio::spawn({
            let feed = self.clone();
            let callback = callback.clone();
            let conversation_id = conversation_id.clone();
            async move {
                let mut last_delivered = None;
                if !deliver(&callback, initial, &mut last_delivered) {
                    return;
                }

                loop {
                    let snapshot = match updates.recv().await {
                        Ok(snapshot) => snapshot,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                target: "messenger::message_streaming::subscribe_with",
                                "Subscriber of {} lagged by {} snapshots, reloading",
                                conversation_id,
                                skipped
                            );
                            match feed.snapshot(&conversation_id).await {
                                Ok(snapshot) => snapshot,
                                Err(e) => {
                                    tracing::error!(
                                        target: "messenger::message_streaming::subscribe_with",
                                        "Failed to reload {}: {}",
                                        conversation_id,
                                        e
                                    );
                                    continue;
                                }
                            }
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if !deliver(&callback, snapshot, &mut last_delivered) {
                        break;
                    }
                }
            }
        });

        Ok(SubscriptionHandle {
            conversation_id: conversation_id.clone(),
            callback,
            task,
        })
    }

    pub(crate) fn publish(&self, conversation: &Conversation) {
        self.streams.emit(ConversationSnapshot::from(conversation));
    }

    /// Conversations `user_id` takes part in, read from storage.
    pub(crate) async fn conversations_for(&self, user_id: &str) -> Result<Vec<Conversation>> {
        Conversation::find_by_participant(user_id, &self.database).await
    }

    pub(crate) fn announce_created(&self, conversation: &Conversation) {
        if self.streams.announce_created(conversation) {
            tracing::debug!(
                target: "messenger::message_streaming::announce_created",
                "Announced new conversation {}",
                conversation.id
            );
        }
    }

    pub(crate) fn subscribe_created(&self) -> broadcast::Receiver<Conversation> {
        self.streams.subscribe_created()
    }
}

/// Hands `snapshot` to the callback if it is newer than the last delivery.
/// Returns false once the subscription has been cancelled.
fn deliver(
    callback: &Mutex<Option<SnapshotCallback>>,
    snapshot: ConversationSnapshot,
    last_delivered: &mut Option<i64>,
) -> bool {
    if let Some(last) = *last_delivered
        && snapshot.version <= last
    {
        return true;
    }

    let Ok(mut slot) = callback.lock() else {
        return false;
    };
    match slot.as_mut() {
        Some(on_snapshot) => {
            let version = snapshot.version;
            on_snapshot(snapshot);
            *last_delivered = Some(version);
            true
        }
        None => false,
    }
}

/// Keeps a callback subscription alive. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    conversation_id: ConversationId,
    callback: Arc<Mutex<Option<SnapshotCallback>>>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
            && self
                .callback
                .lock()
                .map(|slot| slot.is_some())
                .unwrap_or(false)
    }

    /// Stops deliveries. Waits for an in-flight callback to return; no callback runs
    /// after this returns. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        let removed = match self.callback.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        self.task.abort();

        if removed.is_some() {
            tracing::debug!(
                target: "messenger::message_streaming::unsubscribe",
                "Unsubscribed from {}",
                self.conversation_id
            );
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("conversation_id", &self.conversation_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::messenger::test_utils::*;

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn test_subscribe_to_missing_conversation() {
        let (messenger, _data_temp, _logs_temp) = create_mock_messenger().await;
        let id = ConversationId::derive(&["alice", "bob"]).unwrap();

        let mut subscription = messenger.subscribe(&id).await.unwrap();
        assert_eq!(subscription.initial.version, 0);
        assert!(subscription.initial.messages.is_empty());

        messenger
            .send_message("alice", &["alice", "bob"], "Hi")
            .await
            .unwrap();

        let update = subscription.updates.recv().await.unwrap();
        assert_eq!(update.messages.len(), 1);
        assert!(update.version > subscription.initial.version);
    }

    #[tokio::test]
    async fn test_callback_receives_increasing_versions() {
        let (messenger, _data_temp, _logs_temp) = create_mock_messenger().await;
        let id = ConversationId::derive(&["alice", "bob"]).unwrap();
        messenger
            .send_message("alice", &["alice", "bob"], "first")
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = messenger
            .subscribe_with(&id, {
                let seen = seen.clone();
                move |snapshot| seen.lock().unwrap().push((snapshot.version, snapshot.messages.len()))
            })
            .await
            .unwrap();

        for body in ["second", "third"] {
            messenger
                .send_message("bob", &["alice", "bob"], body)
                .await
                .unwrap();
        }

        wait_for(|| seen.lock().unwrap().last().map(|(_, n)| *n) == Some(3)).await;
        let versions: Vec<i64> = seen.lock().unwrap().iter().map(|(v, _)| *v).collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.lock().unwrap()[0].1, 1);
        assert!(handle.is_active());
    }

    #[tokio::test]
    async fn test_no_delivery_after_unsubscribe() {
        let (messenger, _data_temp, _logs_temp) = create_mock_messenger().await;
        let id = ConversationId::derive(&["alice", "bob"]).unwrap();

        let count = Arc::new(Mutex::new(0usize));
        let handle = messenger
            .subscribe_with(&id, {
                let count = count.clone();
                move |_| *count.lock().unwrap() += 1
            })
            .await
            .unwrap();

        wait_for(|| *count.lock().unwrap() == 1).await;
        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());

        messenger
            .send_message("alice", &["alice", "bob"], "after")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropping_handle_releases_stream() {
        let (messenger, _data_temp, _logs_temp) = create_mock_messenger().await;
        let id = ConversationId::derive(&["alice", "bob"]).unwrap();

        let handle = messenger.subscribe_with(&id, |_| {}).await.unwrap();
        drop(handle);

        // The aborted task drops its receiver; the next publish cleans the stream up
        tokio::time::sleep(Duration::from_millis(20)).await;
        messenger
            .send_message("alice", &["alice", "bob"], "Hi")
            .await
            .unwrap();
        assert_eq!(messenger.streams.receiver_count(&id), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lagging_subscriber_reloads_latest_snapshot() {
        let (messenger, _data_temp, _logs_temp) =
            create_mock_messenger_with(|config| config.with_stream_buffer_size(1)).await;
        let id = ConversationId::derive(&["alice", "bob"]).unwrap();
        messenger
            .send_message("alice", &["alice", "bob"], "first")
            .await
            .unwrap();
        let initial = messenger.feed().snapshot(&id).await.unwrap().version;

        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _handle = messenger
            .subscribe_with(&id, {
                let seen = seen.clone();
                let mut held = false;
                move |snapshot| {
                    // Hold the first delivery so the one-slot buffer overflows
                    if !held {
                        held = true;
                        let _ = release_rx.recv();
                    }
                    seen.lock().unwrap().push(snapshot.version);
                }
            })
            .await
            .unwrap();

        for body in ["two", "three", "four", "five"] {
            messenger
                .send_message("bob", &["alice", "bob"], body)
                .await
                .unwrap();
        }
        let latest = messenger.feed().snapshot(&id).await.unwrap();
        assert_eq!(latest.messages.len(), 5);
        release_tx.send(()).unwrap();

        wait_for(|| seen.lock().unwrap().last() == Some(&latest.version)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock().unwrap(), vec![initial, latest.version]);
    }
}
