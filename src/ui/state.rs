use crate::common::{FeedEvent, Message};

/// Local mirror of the feed kept by the terminal UI.
///
/// It only ever applies the deltas carried by `FeedEvent`s; the ordering and
/// dedup work already happened in the feed.
#[derive(Debug, Default)]
pub struct AppState {
    pub messages: Vec<Message>,
    pub status: String,
    /// Whether a backfill request may be sent (the "scroll near top" trigger).
    pub backfill_armed: bool,
    pub live: bool,
    pub closed: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            status: "Loading messages...".to_string(),
            ..Self::default()
        }
    }

    /// Applies one notification and returns the messages that became visible.
    pub fn apply(&mut self, event: FeedEvent) -> Vec<Message> {
        match event {
            FeedEvent::InitialBatch(messages) => {
                self.messages = messages.clone();
                self.backfill_armed = true;
                self.live = true;
                self.status = if messages.is_empty() {
                    "No messages yet. Send one to start chatting!".to_string()
                } else {
                    format!("Loaded {} messages", messages.len())
                };
                messages
            }
            FeedEvent::Appended(messages) => {
                self.messages.extend(messages.iter().cloned());
                self.messages.sort_by_key(Message::key);
                messages
            }
            FeedEvent::Prepended(messages) => {
                self.backfill_armed = true;
                // Empty when the page only held messages already shown, or
                // when the log ran out; `/more` reports exhaustion itself.
                self.status = if messages.is_empty() {
                    "No new older messages".to_string()
                } else {
                    format!("Loaded {} older messages", messages.len())
                };
                let mut merged = messages.clone();
                merged.append(&mut self.messages);
                merged.sort_by_key(Message::key);
                self.messages = merged;
                messages
            }
            FeedEvent::LoadFailed(reason) => {
                self.backfill_armed = true;
                self.status = format!("Error loading more messages: {reason}");
                Vec::new()
            }
            FeedEvent::OpenFailed(reason) => {
                self.closed = true;
                self.backfill_armed = false;
                self.status = format!("Error loading messages: {reason}");
                Vec::new()
            }
            FeedEvent::SubscriptionLost(reason) => {
                self.live = false;
                self.status = format!("Live updates stopped: {reason}");
                Vec::new()
            }
        }
    }

    /// Disarms the backfill trigger; returns whether it was armed.
    pub fn take_backfill_trigger(&mut self) -> bool {
        std::mem::replace(&mut self.backfill_armed, false)
    }
}
