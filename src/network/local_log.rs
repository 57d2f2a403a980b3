use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Result as SqlResult;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::common::{Boundary, Message, MessageBody, MessageId, Page, SubscriptionError, TransportError};
use crate::feed::{
    BatchCallback, DeliveryGate, ErrorCallback, LiveSubscription, MessageAppender, PageFetcher,
    SubscriptionHandle,
};
use crate::storage::{MessageLogDb, ensure_parent_dir};

pub const DEFAULT_LIVE_BUFFER: usize = 256;

/// Transport over a local SQLite message log.
///
/// Appends are written to the log and then pushed to every live subscriber
/// through a broadcast channel. Blocking database work runs on tokio's
/// blocking pool.
#[derive(Clone)]
pub struct LocalLogTransport {
    db: Arc<Mutex<MessageLogDb>>,
    live: broadcast::Sender<Vec<Message>>,
    replay_tail: usize,
}

impl LocalLogTransport {
    pub fn open<P: AsRef<Path>>(path: P, live_buffer: usize) -> Result<Self, TransportError> {
        ensure_parent_dir(&path).map_err(|err| TransportError::Storage(err.to_string()))?;
        let db = MessageLogDb::open(&path)?;
        log::info!("Opened message log at {}", path.as_ref().display());
        Ok(Self::from_db(db, live_buffer))
    }

    pub fn in_memory(live_buffer: usize) -> Result<Self, TransportError> {
        Ok(Self::from_db(MessageLogDb::in_memory()?, live_buffer))
    }

    fn from_db(db: MessageLogDb, live_buffer: usize) -> Self {
        let (live, _) = broadcast::channel(live_buffer.max(1));
        Self {
            db: Arc::new(Mutex::new(db)),
            live,
            replay_tail: 0,
        }
    }

    /// New subscriptions first receive the newest `count` messages again.
    pub fn with_replay_tail(mut self, count: usize) -> Self {
        self.replay_tail = count;
        self
    }

    /// Writes messages that already carry log-assigned ids and publishes the
    /// new ones as a single live batch. Returns how many were new.
    pub async fn ingest(&self, messages: Vec<Message>) -> Result<usize, TransportError> {
        let mut inserted = self
            .with_db(move |db| {
                let mut inserted = Vec::new();
                for message in messages {
                    if db.append(&message)? {
                        inserted.push(message);
                    }
                }
                Ok(inserted)
            })
            .await?;
        inserted.sort_by_key(Message::key);
        let count = inserted.len();
        self.publish(inserted);
        Ok(count)
    }

    pub async fn message_count(&self) -> Result<usize, TransportError> {
        self.with_db(|db| db.message_count()).await
    }

    fn publish(&self, batch: Vec<Message>) {
        if batch.is_empty() {
            return;
        }
        let size = batch.len();
        match self.live.send(batch) {
            Ok(receivers) => log::debug!("Published live batch of {size} to {receivers} subscribers"),
            Err(_) => log::debug!("No live subscribers for batch of {size}"),
        }
    }

    async fn with_db<T, F>(&self, work: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&MessageLogDb) -> SqlResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().unwrap_or_else(PoisonError::into_inner);
            work(&guard).map_err(TransportError::from)
        })
        .await
        .map_err(|err| TransportError::Unavailable(err.to_string()))?
    }
}

#[async_trait]
impl PageFetcher for LocalLogTransport {
    async fn fetch_older_than(&self, boundary: &Boundary, limit: usize) -> Result<Page, TransportError> {
        let boundary = boundary.clone();
        self.with_db(move |db| db.fetch_older_than(&boundary, limit)).await
    }
}

#[async_trait]
impl MessageAppender for LocalLogTransport {
    async fn append_message(
        &self,
        sender_id: &str,
        sender_display_name: &str,
        body: MessageBody,
    ) -> Result<MessageId, TransportError> {
        let message = Message {
            id: MessageId::new(Uuid::new_v4().to_string()),
            sender_id: sender_id.to_string(),
            sender_display_name: sender_display_name.to_string(),
            body,
            created_at: Utc::now().timestamp_millis(),
        };
        let id = message.id.clone();
        log::info!("Appending message {id} from {sender_display_name}");

        let stored = message.clone();
        self.with_db(move |db| db.append(&stored)).await?;
        self.publish(vec![message]);
        Ok(id)
    }
}

impl LiveSubscription for LocalLogTransport {
    fn subscribe(&self, on_batch: BatchCallback, on_error: ErrorCallback) -> Result<SubscriptionHandle, TransportError> {
        let runtime = Handle::try_current().map_err(|err| TransportError::Unavailable(err.to_string()))?;
        let gate = DeliveryGate::new(on_batch, on_error);
        // Subscribe before reading the tail so nothing appended in between is missed.
        let mut receiver = self.live.subscribe();
        let replay_tail = self.replay_tail;
        let db = Arc::clone(&self.db);
        let task_gate = gate.clone();

        let task = runtime.spawn(async move {
            if replay_tail > 0 {
                let tail = tokio::task::spawn_blocking(move || {
                    let guard = db.lock().unwrap_or_else(PoisonError::into_inner);
                    guard.tail(replay_tail)
                })
                .await;
                match tail {
                    Ok(Ok(tail)) if !tail.is_empty() => {
                        if !task_gate.deliver(tail) {
                            return;
                        }
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => {
                        task_gate.fail(SubscriptionError::Dropped(err.to_string()));
                        return;
                    }
                    Err(err) => {
                        task_gate.fail(SubscriptionError::Dropped(err.to_string()));
                        return;
                    }
                }
            }

            loop {
                match receiver.recv().await {
                    Ok(batch) => {
                        if !task_gate.deliver(batch) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Live subscriber lagged by {skipped} batches");
                        task_gate.fail(SubscriptionError::Lagged(skipped));
                        break;
                    }
                    Err(RecvError::Closed) => {
                        task_gate.fail(SubscriptionError::Closed);
                        break;
                    }
                }
            }
        });

        Ok(SubscriptionHandle::new(gate, Some(task)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn msg(id: &str, created_at: i64) -> Message {
        Message {
            id: MessageId::new(id),
            sender_id: "u1".to_string(),
            sender_display_name: "alice".to_string(),
            body: MessageBody::Text(id.to_string()),
            created_at,
        }
    }

    fn channel_callbacks() -> (BatchCallback, ErrorCallback, mpsc::UnboundedReceiver<Result<Vec<Message>, SubscriptionError>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let errors = sender.clone();
        (
            Box::new(move |batch: Vec<Message>| {
                let _ = sender.send(Ok(batch));
            }),
            Box::new(move |err: SubscriptionError| {
                let _ = errors.send(Err(err));
            }),
            receiver,
        )
    }

    async fn next(
        receiver: &mut mpsc::UnboundedReceiver<Result<Vec<Message>, SubscriptionError>>,
    ) -> Result<Vec<Message>, SubscriptionError> {
        timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("delivery in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn appended_message_reaches_subscriber() {
        let transport = LocalLogTransport::in_memory(DEFAULT_LIVE_BUFFER).unwrap();
        let (on_batch, on_error, mut deliveries) = channel_callbacks();
        let handle = transport.subscribe(on_batch, on_error).unwrap();

        let id = transport
            .append_message("u1", "alice", MessageBody::Text("hi".to_string()))
            .await
            .unwrap();

        let batch = next(&mut deliveries).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(transport.message_count().await.unwrap(), 1);
        handle.cancel();
    }

    #[tokio::test]
    async fn replay_tail_redelivers_newest_messages() {
        let transport = LocalLogTransport::in_memory(DEFAULT_LIVE_BUFFER)
            .unwrap()
            .with_replay_tail(2);
        transport
            .ingest(vec![msg("m1", 1), msg("m2", 2), msg("m3", 3)])
            .await
            .unwrap();

        let (on_batch, on_error, mut deliveries) = channel_callbacks();
        let _handle = transport.subscribe(on_batch, on_error).unwrap();
        let replayed = next(&mut deliveries).await.unwrap();
        assert_eq!(replayed, vec![msg("m2", 2), msg("m3", 3)]);
    }

    #[tokio::test]
    async fn cancelled_subscription_receives_nothing() {
        let transport = LocalLogTransport::in_memory(DEFAULT_LIVE_BUFFER).unwrap();
        let (on_batch, on_error, mut deliveries) = channel_callbacks();
        let handle = transport.subscribe(on_batch, on_error).unwrap();
        handle.cancel();

        transport.ingest(vec![msg("m1", 1)]).await.unwrap();
        assert!(timeout(Duration::from_millis(100), deliveries.recv()).await.map_or(true, |next| next.is_none()));
    }

    #[tokio::test]
    async fn lagging_subscriber_gets_error() {
        let transport = LocalLogTransport::in_memory(1).unwrap();
        let (on_batch, on_error, mut deliveries) = channel_callbacks();
        let _handle = transport.subscribe(on_batch, on_error).unwrap();

        // Publish directly so the subscriber task cannot keep up.
        for i in 0..8 {
            transport.publish(vec![msg(&format!("m{i}"), i)]);
        }

        let mut saw_lag = false;
        while let Ok(Some(delivery)) = timeout(Duration::from_millis(500), deliveries.recv()).await {
            if let Err(SubscriptionError::Lagged(_)) = delivery {
                saw_lag = true;
                break;
            }
        }
        assert!(saw_lag);
    }

    #[tokio::test]
    async fn fetches_pages_through_blocking_pool() {
        let transport = LocalLogTransport::in_memory(DEFAULT_LIVE_BUFFER).unwrap();
        transport
            .ingest((1..=5).map(|i| msg(&format!("m{i}"), i)).collect())
            .await
            .unwrap();

        let page = transport.fetch_older_than(&Boundary::Latest, 2).await.unwrap();
        assert_eq!(page.messages, vec![msg("m4", 4), msg("m5", 5)]);
        assert!(page.has_more);

        let page = transport
            .fetch_older_than(&Boundary::Before(msg("m4", 4).key()), 10)
            .await
            .unwrap();
        assert_eq!(page.messages.len(), 3);
        assert!(!page.has_more);
    }
}
