use super::error::{FeedError, SubscriptionError, TransportError};
use super::types::Message;

/// Notification sent from the feed to the display layer.
///
/// Every payload is ascending by `(created_at, id)` and already deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    InitialBatch(Vec<Message>),
    Appended(Vec<Message>),
    Prepended(Vec<Message>),
    /// Backfill failed; the cursor is unchanged and the trigger may re-arm.
    LoadFailed(TransportError),
    /// The initial page could not be loaded, the session is over.
    OpenFailed(FeedError),
    SubscriptionLost(SubscriptionError),
}
