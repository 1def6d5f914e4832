use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

pub mod cache;
pub mod conversation_id;
pub mod conversations;
pub mod database;
pub mod directory;
pub mod echo_overlay;
pub mod emoji_utils;
pub mod error;
pub mod message_streaming;
pub mod messages;
pub mod notifications;

use crate::init_tracing;
use crate::types::RetryConfig;

use cache::ConversationCache;
use conversation_id::ConversationId;
use conversations::Conversation;
use database::Database;
use directory::{CachedDirectory, ParticipantDirectory};
use error::{MessengerError, Result};
use message_streaming::{
    ConversationFeed, ConversationSubscription, MessageStreamManager, SubscriptionHandle,
};

#[derive(Clone, Debug)]
pub struct MessengerConfig {
    /// Directory for application data
    pub data_dir: PathBuf,

    /// Directory for application logs
    pub logs_dir: PathBuf,

    /// Backoff for optimistic-concurrency conflicts
    pub retry: RetryConfig,

    /// Strip skin tones and variation selectors from reactions
    pub normalize_emoji: bool,

    /// Only allow two-party conversations between users of the same group
    pub require_shared_group: bool,

    pub enable_conversation_cache: bool,

    /// Per-conversation broadcast buffer; slower subscribers reload from storage
    pub stream_buffer_size: usize,
}

impl MessengerConfig {
    pub fn new(data_dir: &Path, logs_dir: &Path) -> Self {
        let env_suffix = if cfg!(debug_assertions) {
            "dev"
        } else {
            "release"
        };

        Self {
            data_dir: data_dir.join(env_suffix),
            logs_dir: logs_dir.join(env_suffix),
            retry: RetryConfig::default(),
            normalize_emoji: false,
            require_shared_group: false,
            enable_conversation_cache: true,
            stream_buffer_size: message_streaming::DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_normalize_emoji(mut self, normalize_emoji: bool) -> Self {
        self.normalize_emoji = normalize_emoji;
        self
    }

    pub fn with_require_shared_group(mut self, require_shared_group: bool) -> Self {
        self.require_shared_group = require_shared_group;
        self
    }

    pub fn with_conversation_cache(mut self, enabled: bool) -> Self {
        self.enable_conversation_cache = enabled;
        self
    }

    pub fn with_stream_buffer_size(mut self, stream_buffer_size: usize) -> Self {
        self.stream_buffer_size = stream_buffer_size;
        self
    }
}

/// Entry point of the messaging core.
///
/// Owns the conversation store, the live snapshot streams, the caches and the
/// participant directory. All mutations go through the methods defined in
/// [`messages`]; every committed write is published to subscribers and the
/// conversation cache.
pub struct Messenger {
    pub config: MessengerConfig,
    database: Arc<Database>,
    streams: Arc<MessageStreamManager>,
    feed: ConversationFeed,
    conversation_cache: ConversationCache,
    directory: Arc<CachedDirectory>,
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("config", &self.config)
            .field("database", &"<REDACTED>")
            .field("directory", &self.directory)
            .finish()
    }
}

impl Messenger {
    /// Sets up directories and logging, opens the database (running migrations) and
    /// wires the stream manager, caches and directory together.
    ///
    /// # Arguments
    ///
    /// * `config` - A [`MessengerConfig`] specifying directories and behaviour.
    /// * `directory` - Lookup of participants' roles and groups.
    pub async fn initialize(
        config: MessengerConfig,
        directory: Arc<dyn ParticipantDirectory>,
    ) -> Result<Self> {
        let data_dir = &config.data_dir;
        let logs_dir = &config.logs_dir;

        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))
            .map_err(MessengerError::from)?;
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))
            .map_err(MessengerError::from)?;

        init_tracing(logs_dir);

        tracing::debug!(target: "messenger::initialize", "Logging initialized in directory: {:?}", logs_dir);

        let database = Arc::new(Database::new(data_dir.join("messenger.sqlite")).await?);
        let messenger = Self::from_parts(config, database, directory);

        tracing::info!(target: "messenger::initialize", "Messenger initialized");
        Ok(messenger)
    }

    fn from_parts(
        config: MessengerConfig,
        database: Arc<Database>,
        directory: Arc<dyn ParticipantDirectory>,
    ) -> Self {
        let streams = Arc::new(MessageStreamManager::new(config.stream_buffer_size));
        let feed = ConversationFeed::new(database.clone(), streams.clone());
        let conversation_cache = ConversationCache::new(config.enable_conversation_cache);

        Self {
            config,
            database,
            streams,
            feed,
            conversation_cache,
            directory: Arc::new(CachedDirectory::new(directory)),
        }
    }

    /// The subscription feed, cloneable into tasks.
    pub fn feed(&self) -> ConversationFeed {
        self.feed.clone()
    }

    /// The directory as seen by the messenger, with its read-through cache.
    pub fn directory(&self) -> &CachedDirectory {
        &self.directory
    }

    pub async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<ConversationSubscription> {
        self.feed.subscribe(conversation_id).await
    }

    pub async fn subscribe_with<F>(
        &self,
        conversation_id: &ConversationId,
        on_snapshot: F,
    ) -> Result<SubscriptionHandle>
    where
        F: FnMut(message_streaming::ConversationSnapshot) + Send + 'static,
    {
        self.feed.subscribe_with(conversation_id, on_snapshot).await
    }

    /// Pushes a committed conversation to the cache and to live subscribers.
    pub(crate) fn publish(&self, conversation: &Conversation) {
        self.conversation_cache.insert(conversation);
        self.feed.publish(conversation);
    }
}
