use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::{FeedCommand, FeedError, Message, Page, SubscriptionError, TransportError};

use super::coordinator::{FeedConfig, FeedCoordinator, FeedState, FeedStatus, FetchRequest};
use super::fetcher::PageFetcher;
use super::sink::DisplaySink;
use super::subscription::{LiveSubscription, SubscriptionHandle};

const COMMAND_BUFFER: usize = 100;

type PendingFetch = BoxFuture<'static, (FetchRequest, Result<Page, TransportError>)>;

/// What the subscription callbacks push into the session loop. Failures
/// carry the generation of the subscription that raised them.
#[derive(Debug)]
enum LiveSignal {
    Batch(Vec<Message>),
    Failed(u64, SubscriptionError),
}

/// Event loop that owns a `FeedCoordinator`.
///
/// Commands, live batches and finished fetches are all handled in this one
/// task, one at a time, which is what keeps the store consistent.
pub struct FeedSession {
    coordinator: FeedCoordinator,
    fetcher: Arc<dyn PageFetcher>,
    subscriber: Arc<dyn LiveSubscription>,
    subscription: Option<SubscriptionHandle>,
    subscription_generation: u64,
    command_receiver: mpsc::Receiver<FeedCommand>,
    live_sender: mpsc::UnboundedSender<LiveSignal>,
    live_receiver: mpsc::UnboundedReceiver<LiveSignal>,
    fetches: FuturesUnordered<PendingFetch>,
}

impl FeedSession {
    /// Opens a feed on the current tokio runtime: requests the newest page,
    /// subscribes to live batches and returns the handle used to drive it.
    pub fn open(
        config: FeedConfig,
        fetcher: Arc<dyn PageFetcher>,
        subscriber: Arc<dyn LiveSubscription>,
        sink: Arc<dyn DisplaySink>,
    ) -> Result<FeedHandle, FeedError> {
        let mut coordinator = FeedCoordinator::new(config, sink);
        let initial = coordinator.open()?;

        let (command_sender, command_receiver) = mpsc::channel(COMMAND_BUFFER);
        let (live_sender, live_receiver) = mpsc::unbounded_channel();
        let session = Self {
            coordinator,
            fetcher,
            subscriber,
            subscription: None,
            subscription_generation: 0,
            command_receiver,
            live_sender,
            live_receiver,
            fetches: FuturesUnordered::new(),
        };

        let task = tokio::spawn(session.run(initial));
        Ok(FeedHandle {
            commands: command_sender,
            task,
        })
    }

    async fn run(mut self, initial: FetchRequest) {
        self.start_fetch(initial);
        self.subscribe();
        log::info!("Feed session loop started");

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Some(signal) = self.live_receiver.recv() => {
                    self.handle_live_signal(signal);
                }
                Some((request, result)) = self.fetches.next(), if !self.fetches.is_empty() => {
                    self.coordinator.apply_page(&request, result);
                    if self.coordinator.state() == FeedState::Closed {
                        break;
                    }
                }
            }
        }

        self.shutdown();
        log::info!("Feed session loop stopped");
    }

    /// Returns `false` when the session should stop.
    fn handle_command(&mut self, command: FeedCommand) -> bool {
        match command {
            FeedCommand::LoadMore => {
                if let Some(request) = self.coordinator.load_more() {
                    self.start_fetch(request);
                }
            }
            FeedCommand::Resubscribe => {
                if self.subscription.as_ref().is_some_and(SubscriptionHandle::is_active) {
                    log::debug!("Live subscription still active; ignoring resubscribe");
                } else {
                    self.subscribe();
                }
            }
            FeedCommand::Snapshot(reply) => {
                let _ = reply.send(self.coordinator.store().as_slice().to_vec());
            }
            FeedCommand::Status(reply) => {
                let _ = reply.send(self.coordinator.status());
            }
            FeedCommand::Close(ack) => {
                self.shutdown();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn handle_live_signal(&mut self, signal: LiveSignal) {
        match signal {
            LiveSignal::Batch(batch) => {
                self.coordinator.on_live_batch(batch);
            }
            LiveSignal::Failed(generation, err) => {
                if generation != self.subscription_generation {
                    log::debug!(
                        "Ignoring failure of replaced subscription {generation} (current {}): {err}",
                        self.subscription_generation
                    );
                    return;
                }
                if let Some(handle) = self.subscription.take() {
                    handle.cancel();
                }
                self.coordinator.on_subscription_error(err);
            }
        }
    }

    fn start_fetch(&mut self, request: FetchRequest) {
        let fetcher = Arc::clone(&self.fetcher);
        log::debug!("Fetching {:?} page before {:?}", request.kind, request.boundary);
        self.fetches.push(
            async move {
                let result = fetcher.fetch_older_than(&request.boundary, request.limit).await;
                (request, result)
            }
            .boxed(),
        );
    }

    fn subscribe(&mut self) {
        self.subscription_generation += 1;
        let generation = self.subscription_generation;
        let batches = self.live_sender.clone();
        let failures = self.live_sender.clone();
        let result = self.subscriber.subscribe(
            Box::new(move |batch: Vec<Message>| {
                if batches.send(LiveSignal::Batch(batch)).is_err() {
                    log::debug!("Feed session gone; dropping live batch");
                }
            }),
            Box::new(move |err: SubscriptionError| {
                if failures.send(LiveSignal::Failed(generation, err)).is_err() {
                    log::debug!("Feed session gone; dropping subscription error");
                }
            }),
        );

        match result {
            Ok(handle) => {
                log::info!("Live subscription {generation} established");
                self.subscription = Some(handle);
            }
            Err(err) => {
                log::warn!("Failed to subscribe to live messages: {err}");
                self.coordinator
                    .on_subscription_error(SubscriptionError::Dropped(err.to_string()));
            }
        }
    }

    /// Cancels the subscription before anything else so no callback can run
    /// once this returns, then drops in-flight fetches.
    fn shutdown(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.cancel();
        }
        self.coordinator.close();
        self.fetches.clear();
    }
}

/// Caller side of a running `FeedSession`. None of these calls waits on the
/// network; results reach the display sink.
#[derive(Debug)]
pub struct FeedHandle {
    commands: mpsc::Sender<FeedCommand>,
    task: JoinHandle<()>,
}

impl FeedHandle {
    /// Triggers backfill. Ignored by the session while a page is loading or
    /// once history is exhausted.
    pub async fn load_more(&self) -> Result<(), FeedError> {
        self.send(FeedCommand::LoadMore).await
    }

    pub async fn resubscribe(&self) -> Result<(), FeedError> {
        self.send(FeedCommand::Resubscribe).await
    }

    /// Copy of the store in display order.
    pub async fn snapshot(&self) -> Result<Vec<Message>, FeedError> {
        let (reply, response) = oneshot::channel();
        self.send(FeedCommand::Snapshot(reply)).await?;
        response.await.map_err(|_| FeedError::SessionClosed)
    }

    pub async fn status(&self) -> Result<FeedStatus, FeedError> {
        let (reply, response) = oneshot::channel();
        self.send(FeedCommand::Status(reply)).await?;
        response.await.map_err(|_| FeedError::SessionClosed)
    }

    /// Cancels the live subscription and stops the session. Returns after the
    /// subscription is cancelled; a session that already stopped is fine.
    pub async fn close(self) -> Result<(), FeedError> {
        let (ack, acked) = oneshot::channel();
        if self.commands.send(FeedCommand::Close(ack)).await.is_ok() {
            let _ = acked.await;
        }
        if let Err(err) = self.task.await {
            log::error!("Feed session task failed: {err}");
        }
        Ok(())
    }

    async fn send(&self, command: FeedCommand) -> Result<(), FeedError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| FeedError::SessionClosed)
    }
}
