pub use crate::messenger::cache::ConversationCache;
pub use crate::messenger::conversation_id::{CONVERSATION_ID_SEPARATOR, ConversationId};
pub use crate::messenger::conversations::{Conversation, Message};
pub use crate::messenger::directory::{
    CachedDirectory, InMemoryDirectory, Participant, ParticipantDirectory, Role,
};
pub use crate::messenger::echo_overlay::{EchoOverlay, PendingMessage, RenderedMessage};
pub use crate::messenger::error::{MessengerError, Result};
pub use crate::messenger::message_streaming::{
    ConversationFeed, ConversationSnapshot, ConversationSubscription, SubscriptionHandle,
};
pub use crate::messenger::messages::ReactionChange;
pub use crate::messenger::notifications::{
    NotificationCategory, NotificationProjector, NotificationSummary, NotificationWatcher,
    UnreadItem,
};
pub use crate::messenger::{Messenger, MessengerConfig};
pub use crate::types::RetryConfig;

use std::sync::{Mutex, OnceLock};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

mod messenger;
mod types;

static TRACING_GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the global tracing subscriber: stdout plus a daily rolling file in `logs_dir`.
///
/// Safe to call more than once; only the first call has any effect. When the
/// file appender cannot be created the subscriber falls back to stdout only.
pub fn init_tracing(logs_dir: &std::path::Path) {
    TRACING_INIT.get_or_init(|| {
        let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
        let mut guards = vec![stdout_guard];

        let stdout_layer = Layer::new()
            .with_writer(non_blocking_stdout)
            .with_ansi(true)
            .with_target(true);

        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("messenger")
            .filename_suffix("log")
            .build(logs_dir);

        let file_layer = match file_appender {
            Ok(appender) => {
                let (non_blocking_file, file_guard) = tracing_appender::non_blocking(appender);
                guards.push(file_guard);
                Some(
                    Layer::new()
                        .with_writer(non_blocking_file)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!("Failed to create log file appender in {:?}: {}", logs_dir, e);
                None
            }
        };

        TRACING_GUARDS.set(Mutex::new(guards)).ok();

        // try_init so an embedding application's subscriber is left in place
        let _ = Registry::default()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(stdout_layer)
            .with(file_layer)
            .try_init();
    });
}
