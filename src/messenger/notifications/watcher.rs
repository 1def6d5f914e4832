use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{
    broadcast::{self, error::RecvError},
    watch,
};
use tokio::task::JoinHandle;

use super::{
    NotificationCategory, NotificationSummary, UnreadItem, classify_conversation,
    projector::NotificationProjector,
};
use crate::messenger::{
    conversation_id::ConversationId,
    conversations::Conversation,
    directory::ParticipantDirectory,
    error::{MessengerError, Result},
    message_streaming::{ConversationFeed, ConversationSnapshot, SubscriptionHandle},
};

/// State shared with the subscription callbacks.
struct Projection {
    projector: Mutex<NotificationProjector>,
    summary_tx: watch::Sender<NotificationSummary>,
}

impl Projection {
    fn apply(&self, category: NotificationCategory, snapshot: ConversationSnapshot) {
        let summary = {
            let Ok(mut projector) = self.projector.lock() else {
                return;
            };
            if !projector.apply_snapshot(category, snapshot) {
                return;
            }
            projector.summary()
        };
        self.summary_tx.send_if_modified(|current| {
            if *current == summary {
                false
            } else {
                *current = summary;
                true
            }
        });
    }
}

#[derive(Default)]
struct Subscriptions {
    stopped: bool,
    handles: HashMap<ConversationId, SubscriptionHandle>,
}

/// Everything the watcher shares with its discovery task.
struct WatcherState {
    user_id: String,
    feed: ConversationFeed,
    directory: Arc<dyn ParticipantDirectory>,
    projection: Arc<Projection>,
    subscriptions: Mutex<Subscriptions>,
}

impl WatcherState {
    async fn track_loaded(&self, conversation: &Conversation) -> Result<()> {
        if !conversation.has_participant(&self.user_id) {
            return Err(MessengerError::Forbidden(format!(
                "{} is not a participant of {}",
                self.user_id, conversation.id
            )));
        }
        if self.is_tracking(&conversation.id) {
            return Ok(());
        }

        let category =
            classify_conversation(self.directory.as_ref(), &self.user_id, conversation).await?;
        let projection = self.projection.clone();
        let handle = self
            .feed
            .subscribe_with(&conversation.id, move |snapshot| {
                projection.apply(category, snapshot)
            })
            .await?;

        let mut subscriptions = self.lock_subscriptions();
        if !subscriptions.stopped {
            // A concurrent track of the same conversation keeps the first handle
            subscriptions
                .handles
                .entry(conversation.id.clone())
                .or_insert(handle);
        }
        Ok(())
    }

    fn is_tracking(&self, conversation_id: &ConversationId) -> bool {
        self.lock_subscriptions().handles.contains_key(conversation_id)
    }

    async fn track_all(&self) -> Result<()> {
        for conversation in self.feed.conversations_for(&self.user_id).await? {
            self.track_loaded(&conversation).await?;
        }
        Ok(())
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, Subscriptions> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Follows conversations created after the watcher started.
async fn follow_new_conversations(
    state: Arc<WatcherState>,
    mut created: broadcast::Receiver<Conversation>,
) {
    loop {
        let result = match created.recv().await {
            Ok(conversation) if conversation.has_participant(&state.user_id) => {
                state.track_loaded(&conversation).await
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    target: "messenger::notifications::watcher",
                    "Missed {} conversation announcements for {}, rescanning",
                    skipped,
                    state.user_id
                );
                state.track_all().await
            }
            Err(RecvError::Closed) => break,
        };

        if let Err(e) = result {
            tracing::error!(
                target: "messenger::notifications::watcher",
                "Failed to follow a new conversation for {}: {}",
                state.user_id,
                e
            );
        }
    }
}

/// Live unread projection for one user.
///
/// Holds a snapshot subscription per conversation of the user, including ones
/// created after the watcher started, and republishes the [`NotificationSummary`]
/// on a watch channel whenever it changes. Stops on [`NotificationWatcher::stop`]
/// or drop; a stopped watcher stays stopped.
pub struct NotificationWatcher {
    state: Arc<WatcherState>,
    discovery: JoinHandle<()>,
}

impl NotificationWatcher {
    /// Subscribes to every current conversation of `user_id` and starts following
    /// new ones.
    pub(crate) async fn start(
        user_id: &str,
        feed: ConversationFeed,
        directory: Arc<dyn ParticipantDirectory>,
    ) -> Result<Self> {
        let (summary_tx, _) = watch::channel(NotificationSummary::default());
        let state = Arc::new(WatcherState {
            user_id: user_id.to_string(),
            feed,
            directory,
            projection: Arc::new(Projection {
                projector: Mutex::new(NotificationProjector::new(user_id)),
                summary_tx,
            }),
            subscriptions: Mutex::new(Subscriptions::default()),
        });

        // Listen before scanning so a conversation created in between is not missed
        let created = state.feed.subscribe_created();
        state.track_all().await?;
        let discovery = tokio::spawn(follow_new_conversations(state.clone(), created));

        Ok(Self { state, discovery })
    }

    pub fn user_id(&self) -> &str {
        &self.state.user_id
    }

    /// Starts following a conversation right away instead of waiting for its announcement.
    pub async fn track_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        let conversation = self
            .state
            .feed
            .load(conversation_id)
            .await?
            .ok_or(MessengerError::ConversationNotFound)?;
        self.state.track_loaded(&conversation).await
    }

    pub fn is_tracking(&self, conversation_id: &ConversationId) -> bool {
        self.state.is_tracking(conversation_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.state.lock_subscriptions().handles.len()
    }

    /// Latest summary.
    pub fn summary(&self) -> NotificationSummary {
        *self.state.projection.summary_tx.borrow()
    }

    /// A receiver that is notified whenever the summary changes.
    pub fn subscribe(&self) -> watch::Receiver<NotificationSummary> {
        self.state.projection.summary_tx.subscribe()
    }

    pub fn unread_items(&self, category: NotificationCategory) -> Vec<UnreadItem> {
        self.state
            .projection
            .projector
            .lock()
            .map(|projector| projector.unread_items(category))
            .unwrap_or_default()
    }

    /// Unsubscribes from every conversation. The last summary stays readable.
    pub fn stop(&self) {
        self.discovery.abort();
        let handles: Vec<SubscriptionHandle> = {
            let mut subscriptions = self.state.lock_subscriptions();
            subscriptions.stopped = true;
            subscriptions.handles.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.unsubscribe();
        }
        if !handles.is_empty() {
            tracing::debug!(
                target: "messenger::notifications::watcher",
                "Stopped watching {} conversations for {}",
                handles.len(),
                self.state.user_id
            );
        }
    }
}

impl Drop for NotificationWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
