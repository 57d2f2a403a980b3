use tokio::sync::mpsc;

use crate::common::{FeedError, FeedEvent, Message, SubscriptionError, TransportError};

/// Receiver of feed notifications. Payloads are computed deltas, so an
/// implementation never needs access to the store.
pub trait DisplaySink: Send + Sync {
    fn on_initial_batch(&self, messages: Vec<Message>);
    fn on_append(&self, messages: Vec<Message>);
    fn on_prepend(&self, messages: Vec<Message>);
    /// Recoverable backfill failure.
    fn on_load_error(&self, reason: TransportError);
    /// The feed could not start.
    fn on_open_failed(&self, reason: FeedError);
    fn on_subscription_lost(&self, reason: SubscriptionError);
}

/// Forwards every notification as a `FeedEvent` over a channel, the way the
/// UI thread consumes network events.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<FeedEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FeedEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn emit(&self, event: FeedEvent) {
        if let Err(err) = self.sender.send(event) {
            log::warn!("Display sink receiver dropped; discarding {:?}", err.0);
        }
    }
}

impl DisplaySink for ChannelSink {
    fn on_initial_batch(&self, messages: Vec<Message>) {
        self.emit(FeedEvent::InitialBatch(messages));
    }

    fn on_append(&self, messages: Vec<Message>) {
        self.emit(FeedEvent::Appended(messages));
    }

    fn on_prepend(&self, messages: Vec<Message>) {
        self.emit(FeedEvent::Prepended(messages));
    }

    fn on_load_error(&self, reason: TransportError) {
        self.emit(FeedEvent::LoadFailed(reason));
    }

    fn on_open_failed(&self, reason: FeedError) {
        self.emit(FeedEvent::OpenFailed(reason));
    }

    fn on_subscription_lost(&self, reason: SubscriptionError) {
        self.emit(FeedEvent::SubscriptionLost(reason));
    }
}
