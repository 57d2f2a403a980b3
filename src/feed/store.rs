use std::collections::HashSet;
use std::ops::{Bound, RangeBounds};

use crate::common::{Message, MessageId, MessageKey};

/// Ordered, duplicate-free message sequence.
///
/// Entries are ascending by `(created_at, id)` and never removed. Membership
/// is tracked in a separate id set so duplicate checks do not search.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `message` at its sorted position. Returns `false` and leaves
    /// the store untouched when the id is already present.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.seen.contains(&message.id) {
            return false;
        }
        let key = message.key();
        let index = self.messages.partition_point(|held| held.key() < key);
        self.seen.insert(message.id.clone());
        self.messages.insert(index, message);
        true
    }

    /// Applies `insert` to each message and returns the ones that were new,
    /// in their input order.
    pub fn insert_batch(&mut self, messages: impl IntoIterator<Item = Message>) -> Vec<Message> {
        let mut inserted = Vec::new();
        for message in messages {
            if self.seen.contains(&message.id) {
                continue;
            }
            let copy = message.clone();
            if self.insert(message) {
                inserted.push(copy);
            }
        }
        inserted
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    /// Messages whose key falls inside `range`.
    pub fn range<R: RangeBounds<MessageKey>>(&self, range: R) -> &[Message] {
        let start = match range.start_bound() {
            Bound::Included(key) => self.messages.partition_point(|m| &m.key() < key),
            Bound::Excluded(key) => self.messages.partition_point(|m| &m.key() <= key),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(key) => self.messages.partition_point(|m| &m.key() <= key),
            Bound::Excluded(key) => self.messages.partition_point(|m| &m.key() < key),
            Bound::Unbounded => self.messages.len(),
        };
        if start >= end {
            return &[];
        }
        &self.messages[start..end]
    }
}
