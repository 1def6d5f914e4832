//! Message Streaming Module
//!
//! Live snapshots of conversations. After every committed write the full message
//! list is pushed to subscribers, either as a broadcast receiver or through a
//! callback driven by a delivery task.

mod feed;
mod manager;
mod types;

pub use feed::{ConversationFeed, SubscriptionHandle};
pub(crate) use manager::{DEFAULT_BUFFER_SIZE, MessageStreamManager};
pub use types::{ConversationSnapshot, ConversationSubscription};
