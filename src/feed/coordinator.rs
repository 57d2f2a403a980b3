use std::fmt;
use std::sync::Arc;

use crate::common::{Boundary, Cursor, FeedError, Message, Page, SubscriptionError, TransportError};

use super::sink::DisplaySink;
use super::store::MessageStore;

pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Uninitialized,
    Loading,
    Ready,
    LoadingMore,
    Closed,
}

impl FeedState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::LoadingMore => "loading-more",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Session parameters fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    page_size: usize,
}

impl FeedConfig {
    pub fn new(page_size: usize) -> Result<Self, FeedError> {
        if page_size == 0 {
            return Err(FeedError::InvalidConfig("page_size must be at least 1".to_string()));
        }
        Ok(Self { page_size })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Initial,
    Backfill,
}

/// A page fetch the driver must perform and hand back via `apply_page`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub generation: u64,
    pub kind: FetchKind,
    pub boundary: Boundary,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStatus {
    pub state: FeedState,
    pub cursor: Cursor,
    pub history_exhausted: bool,
    pub len: usize,
}

/// Merges backward pages and live batches into one `MessageStore`.
///
/// The coordinator performs no I/O. It hands out `FetchRequest`s and
/// expects every mutation to arrive through `&mut self`, so whoever owns it
/// serializes the two sources. A fetch result is applied only when its
/// generation is the current one; `close` bumps the generation, which turns
/// any late result into a no-op.
pub struct FeedCoordinator {
    config: FeedConfig,
    store: MessageStore,
    cursor: Cursor,
    state: FeedState,
    generation: u64,
    /// Live batches that arrived before the initial page.
    pending_live: Vec<Message>,
    sink: Arc<dyn DisplaySink>,
}

impl FeedCoordinator {
    pub fn new(config: FeedConfig, sink: Arc<dyn DisplaySink>) -> Self {
        Self {
            config,
            store: MessageStore::new(),
            cursor: Cursor::Unset,
            state: FeedState::Uninitialized,
            generation: 0,
            pending_live: Vec::new(),
            sink,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn history_exhausted(&self) -> bool {
        self.cursor.is_exhausted()
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn status(&self) -> FeedStatus {
        FeedStatus {
            state: self.state,
            cursor: self.cursor.clone(),
            history_exhausted: self.history_exhausted(),
            len: self.store.len(),
        }
    }

    /// Starts the session and returns the request for the newest page.
    pub fn open(&mut self) -> Result<FetchRequest, FeedError> {
        if self.state != FeedState::Uninitialized {
            return Err(FeedError::InvalidState(self.state.name()));
        }
        self.state = FeedState::Loading;
        log::info!("Opening feed with page size {}", self.config.page_size);
        Ok(self.next_request(FetchKind::Initial, Boundary::Latest))
    }

    /// Requests the next older page, or `None` when the feed is busy, not
    /// ready, or out of history.
    pub fn load_more(&mut self) -> Option<FetchRequest> {
        if self.state != FeedState::Ready {
            log::debug!("Ignoring load_more while {}", self.state);
            return None;
        }
        if self.history_exhausted() {
            log::debug!("Ignoring load_more: history exhausted");
            return None;
        }
        let boundary = self.cursor.boundary()?;
        self.state = FeedState::LoadingMore;
        Some(self.next_request(FetchKind::Backfill, boundary))
    }

    /// Applies a finished fetch. Returns `false` when the result was stale
    /// and discarded.
    pub fn apply_page(&mut self, request: &FetchRequest, result: Result<Page, TransportError>) -> bool {
        let expected = match request.kind {
            FetchKind::Initial => FeedState::Loading,
            FetchKind::Backfill => FeedState::LoadingMore,
        };
        if request.generation != self.generation || self.state != expected {
            log::debug!(
                "Discarding stale {:?} page (generation {}, current {}, state {})",
                request.kind,
                request.generation,
                self.generation,
                self.state
            );
            return false;
        }

        match (request.kind, result) {
            (FetchKind::Initial, Ok(page)) => self.apply_initial_page(page),
            (FetchKind::Initial, Err(err)) => {
                log::error!("Initial page failed, closing feed: {err}");
                self.state = FeedState::Closed;
                self.pending_live.clear();
                self.sink.on_open_failed(FeedError::Transport(err));
            }
            (FetchKind::Backfill, Ok(page)) => self.apply_backfill_page(page),
            (FetchKind::Backfill, Err(err)) => {
                log::warn!("Backfill failed, cursor kept at {:?}: {err}", self.cursor);
                self.state = FeedState::Ready;
                self.sink.on_load_error(err);
            }
        }
        true
    }

    /// Inserts a live batch and reports the genuinely new messages. Returns
    /// how many were new.
    pub fn on_live_batch(&mut self, added: Vec<Message>) -> usize {
        match self.state {
            FeedState::Uninitialized | FeedState::Closed => {
                log::debug!("Dropping live batch of {} while {}", added.len(), self.state);
                0
            }
            FeedState::Loading => {
                self.pending_live.extend(added);
                0
            }
            FeedState::Ready | FeedState::LoadingMore => {
                let mut inserted = self.store.insert_batch(added);
                if inserted.is_empty() {
                    return 0;
                }
                inserted.sort_by_key(Message::key);
                let count = inserted.len();
                log::debug!("Live batch appended {count} messages");
                self.sink.on_append(inserted);
                count
            }
        }
    }

    pub fn on_subscription_error(&mut self, error: SubscriptionError) {
        if self.state == FeedState::Closed {
            return;
        }
        log::warn!("Live subscription lost: {error}");
        self.sink.on_subscription_lost(error);
    }

    /// Ends the session. Any fetch still in flight becomes stale.
    pub fn close(&mut self) {
        if self.state == FeedState::Closed {
            return;
        }
        log::info!("Closing feed with {} messages loaded", self.store.len());
        self.state = FeedState::Closed;
        self.generation += 1;
        self.pending_live.clear();
    }

    fn next_request(&mut self, kind: FetchKind, boundary: Boundary) -> FetchRequest {
        self.generation += 1;
        FetchRequest {
            generation: self.generation,
            kind,
            boundary,
            limit: self.config.page_size,
        }
    }

    fn apply_initial_page(&mut self, page: Page) {
        let short = page.messages.len() < self.config.page_size || !page.has_more;
        let mut inserted = self.store.insert_batch(page.messages);
        inserted.sort_by_key(Message::key);
        self.cursor = if short {
            Cursor::Exhausted
        } else {
            self.oldest_cursor()
        };
        self.state = FeedState::Ready;
        log::info!(
            "Initial page loaded: {} messages, history exhausted: {}",
            inserted.len(),
            self.history_exhausted()
        );
        self.sink.on_initial_batch(inserted);

        let buffered = std::mem::take(&mut self.pending_live);
        if !buffered.is_empty() {
            self.on_live_batch(buffered);
        }
    }

    fn apply_backfill_page(&mut self, page: Page) {
        let last = page.messages.is_empty() || !page.has_more;
        let mut inserted = self.store.insert_batch(page.messages);
        inserted.sort_by_key(Message::key);
        self.cursor = if last {
            Cursor::Exhausted
        } else {
            self.oldest_cursor()
        };
        self.state = FeedState::Ready;
        log::debug!(
            "Backfill prepended {} messages, history exhausted: {}",
            inserted.len(),
            self.history_exhausted()
        );
        self.sink.on_prepend(inserted);
    }

    fn oldest_cursor(&self) -> Cursor {
        self.store
            .oldest()
            .map(|oldest| Cursor::Before(oldest.key()))
            .unwrap_or(Cursor::Unset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FeedEvent, MessageBody, MessageId, MessageKey};
    use crate::feed::sink::ChannelSink;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn msg(id: &str, created_at: i64) -> Message {
        Message {
            id: MessageId::new(id),
            sender_id: "u1".to_string(),
            sender_display_name: "alice".to_string(),
            body: MessageBody::Text(id.to_string()),
            created_at,
        }
    }

    fn page(messages: Vec<Message>, has_more: bool) -> Page {
        Page { messages, has_more }
    }

    fn coordinator(page_size: usize) -> (FeedCoordinator, UnboundedReceiver<FeedEvent>) {
        let (sink, events) = ChannelSink::new();
        let config = FeedConfig::new(page_size).expect("valid page size");
        (FeedCoordinator::new(config, Arc::new(sink)), events)
    }

    fn drain(events: &mut UnboundedReceiver<FeedEvent>) -> Vec<FeedEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn ids(store: &MessageStore) -> Vec<&str> {
        store.iter().map(|m| m.id.as_str()).collect()
    }

    /// Opens a coordinator whose initial page holds `messages` with more history.
    fn ready(page_size: usize, messages: Vec<Message>) -> (FeedCoordinator, UnboundedReceiver<FeedEvent>) {
        let (mut feed, mut events) = coordinator(page_size);
        let request = feed.open().expect("open");
        assert!(feed.apply_page(&request, Ok(page(messages, true))));
        drain(&mut events);
        (feed, events)
    }

    #[test]
    fn rejects_zero_page_size() {
        assert!(matches!(FeedConfig::new(0), Err(FeedError::InvalidConfig(_))));
    }

    #[test]
    fn open_requests_latest_page() {
        let (mut feed, _events) = coordinator(20);
        let request = feed.open().expect("open");
        assert_eq!(request.kind, FetchKind::Initial);
        assert_eq!(request.boundary, Boundary::Latest);
        assert_eq!(request.limit, 20);
        assert_eq!(feed.state(), FeedState::Loading);
        assert!(matches!(feed.open(), Err(FeedError::InvalidState(_))));
    }

    #[test]
    fn initial_batch_then_append() {
        let (mut feed, mut events) = coordinator(2);
        let request = feed.open().expect("open");
        feed.apply_page(&request, Ok(page(vec![msg("m1", 1), msg("m2", 2)], true)));
        feed.on_live_batch(vec![msg("m3", 3)]);

        assert_eq!(
            drain(&mut events),
            vec![
                FeedEvent::InitialBatch(vec![msg("m1", 1), msg("m2", 2)]),
                FeedEvent::Appended(vec![msg("m3", 3)]),
            ]
        );
        assert_eq!(ids(feed.store()), vec!["m1", "m2", "m3"]);
        assert_eq!(
            feed.cursor(),
            &Cursor::Before(MessageKey {
                created_at: 1,
                id: MessageId::new("m1")
            })
        );
    }

    #[test]
    fn short_initial_page_exhausts_history() {
        let (mut feed, mut events) = coordinator(5);
        let request = feed.open().expect("open");
        feed.apply_page(&request, Ok(page(vec![msg("m1", 1)], true)));
        assert!(feed.history_exhausted());
        assert_eq!(feed.state(), FeedState::Ready);
        assert!(feed.load_more().is_none());
        assert_eq!(drain(&mut events), vec![FeedEvent::InitialBatch(vec![msg("m1", 1)])]);
    }

    #[test]
    fn empty_initial_page_leaves_nothing_to_backfill() {
        let (mut feed, mut events) = coordinator(5);
        let request = feed.open().expect("open");
        feed.apply_page(&request, Ok(Page::default()));
        assert!(feed.history_exhausted());
        assert!(feed.store().is_empty());
        assert_eq!(drain(&mut events), vec![FeedEvent::InitialBatch(Vec::new())]);
    }

    #[test]
    fn live_batches_during_initial_load_follow_initial_batch() {
        let (mut feed, mut events) = coordinator(2);
        let request = feed.open().expect("open");
        feed.on_live_batch(vec![msg("m2", 2), msg("m3", 3)]);
        assert!(drain(&mut events).is_empty());

        feed.apply_page(&request, Ok(page(vec![msg("m1", 1), msg("m2", 2)], true)));
        assert_eq!(
            drain(&mut events),
            vec![
                FeedEvent::InitialBatch(vec![msg("m1", 1), msg("m2", 2)]),
                FeedEvent::Appended(vec![msg("m3", 3)]),
            ]
        );
    }

    #[test]
    fn backfill_prepends_in_order() {
        let (mut feed, mut events) = ready(2, vec![msg("m5", 5), msg("m6", 6)]);
        let request = feed.load_more().expect("backfill request");
        assert_eq!(request.kind, FetchKind::Backfill);
        assert_eq!(
            request.boundary,
            Boundary::Before(MessageKey {
                created_at: 5,
                id: MessageId::new("m5")
            })
        );
        assert_eq!(feed.state(), FeedState::LoadingMore);

        feed.apply_page(&request, Ok(page(vec![msg("m3", 3), msg("m4", 4)], true)));
        assert_eq!(
            drain(&mut events),
            vec![FeedEvent::Prepended(vec![msg("m3", 3), msg("m4", 4)])]
        );
        assert_eq!(ids(feed.store()), vec!["m3", "m4", "m5", "m6"]);
        assert_eq!(feed.state(), FeedState::Ready);
        assert_eq!(feed.cursor().boundary().map(|_| ()), Some(()));
    }

    #[test]
    fn load_more_does_not_double_fire() {
        let (mut feed, _events) = ready(2, vec![msg("m5", 5), msg("m6", 6)]);
        assert!(feed.load_more().is_some());
        assert!(feed.load_more().is_none());
    }

    #[test]
    fn exhaustion_stops_backfill() {
        let (mut feed, mut events) = ready(2, vec![msg("m5", 5), msg("m6", 6)]);
        let request = feed.load_more().expect("backfill request");
        feed.apply_page(&request, Ok(page(vec![msg("m4", 4)], false)));
        assert!(feed.history_exhausted());
        assert!(feed.load_more().is_none());
        assert_eq!(drain(&mut events), vec![FeedEvent::Prepended(vec![msg("m4", 4)])]);

        let (mut feed, _events) = ready(2, vec![msg("m5", 5), msg("m6", 6)]);
        let request = feed.load_more().expect("backfill request");
        feed.apply_page(&request, Ok(page(Vec::new(), true)));
        assert!(feed.history_exhausted());
        assert!(feed.load_more().is_none());
    }

    #[test]
    fn backfill_failure_keeps_cursor_and_allows_retry() {
        let (mut feed, mut events) = ready(2, vec![msg("m5", 5), msg("m6", 6)]);
        let cursor = feed.cursor().clone();
        let request = feed.load_more().expect("backfill request");
        let err = TransportError::Unavailable("offline".to_string());
        feed.apply_page(&request, Err(err.clone()));

        assert_eq!(feed.state(), FeedState::Ready);
        assert_eq!(feed.cursor(), &cursor);
        assert!(!feed.history_exhausted());
        assert_eq!(drain(&mut events), vec![FeedEvent::LoadFailed(err)]);

        let retry = feed.load_more().expect("retry request");
        assert_eq!(retry.boundary, request.boundary);
    }

    #[test]
    fn initial_failure_closes_feed() {
        let (mut feed, mut events) = coordinator(2);
        let request = feed.open().expect("open");
        let err = TransportError::Unavailable("offline".to_string());
        feed.apply_page(&request, Err(err.clone()));
        assert_eq!(feed.state(), FeedState::Closed);
        assert_eq!(
            drain(&mut events),
            vec![FeedEvent::OpenFailed(FeedError::Transport(err))]
        );
        assert_eq!(feed.on_live_batch(vec![msg("m1", 1)]), 0);
    }

    #[test]
    fn race_between_backfill_and_live_reports_once() {
        let (mut feed, mut events) = ready(2, vec![msg("m5", 5), msg("m6", 6)]);
        let request = feed.load_more().expect("backfill request");

        assert_eq!(feed.on_live_batch(vec![msg("m4", 4)]), 1);
        feed.apply_page(&request, Ok(page(vec![msg("m3", 3), msg("m4", 4)], true)));

        assert_eq!(
            drain(&mut events),
            vec![
                FeedEvent::Appended(vec![msg("m4", 4)]),
                FeedEvent::Prepended(vec![msg("m3", 3)]),
            ]
        );
        assert_eq!(ids(feed.store()), vec!["m3", "m4", "m5", "m6"]);
    }

    #[test]
    fn redelivered_live_batch_is_silent() {
        let (mut feed, mut events) = ready(2, vec![msg("m5", 5), msg("m6", 6)]);
        assert_eq!(feed.on_live_batch(vec![msg("m6", 6)]), 0);
        assert!(drain(&mut events).is_empty());
        assert_eq!(feed.store().len(), 2);
    }

    #[test]
    fn close_discards_in_flight_page() {
        let (mut feed, mut events) = ready(2, vec![msg("m5", 5), msg("m6", 6)]);
        let request = feed.load_more().expect("backfill request");
        feed.close();

        assert!(!feed.apply_page(&request, Ok(page(vec![msg("m3", 3), msg("m4", 4)], true))));
        assert_eq!(ids(feed.store()), vec!["m5", "m6"]);
        assert_eq!(feed.on_live_batch(vec![msg("m7", 7)]), 0);
        feed.on_subscription_error(SubscriptionError::Closed);
        assert!(drain(&mut events).is_empty());
        assert_eq!(feed.state(), FeedState::Closed);
    }

    #[test]
    fn subscription_loss_is_reported() {
        let (mut feed, mut events) = ready(2, vec![msg("m5", 5), msg("m6", 6)]);
        feed.on_subscription_error(SubscriptionError::Lagged(3));
        assert_eq!(
            drain(&mut events),
            vec![FeedEvent::SubscriptionLost(SubscriptionError::Lagged(3))]
        );
        assert_eq!(feed.state(), FeedState::Ready);
    }
}
