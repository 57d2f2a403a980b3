use tokio::sync::oneshot;

use super::types::Message;
use crate::feed::FeedStatus;

/// Request sent from a `FeedHandle` into the session loop.
#[derive(Debug)]
pub enum FeedCommand {
    /// Fetch the next older page if the feed is idle and not exhausted.
    LoadMore,
    /// Re-invoke `subscribe` after the live source was lost.
    Resubscribe,
    Snapshot(oneshot::Sender<Vec<Message>>),
    Status(oneshot::Sender<FeedStatus>),
    /// Cancel the subscription and stop; acknowledged once cancelled.
    Close(oneshot::Sender<()>),
}
