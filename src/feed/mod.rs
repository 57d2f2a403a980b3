pub mod coordinator;
pub mod fetcher;
pub mod session;
pub mod sink;
pub mod store;
pub mod subscription;

pub use coordinator::{FeedConfig, FeedCoordinator, FeedState, FeedStatus, FetchKind, FetchRequest};
pub use fetcher::PageFetcher;
pub use session::{FeedHandle, FeedSession};
pub use sink::{ChannelSink, DisplaySink};
pub use store::MessageStore;
pub use subscription::{
    BatchCallback, DeliveryGate, ErrorCallback, LiveSubscription, MessageAppender, SubscriptionHandle,
};
