pub mod commands;
pub mod error;
pub mod events;
pub mod types;

pub use commands::FeedCommand;
pub use error::{FeedError, SubscriptionError, TransportError};
pub use events::FeedEvent;
pub use types::{Boundary, Cursor, FileReference, Message, MessageBody, MessageId, MessageKey, Page};
