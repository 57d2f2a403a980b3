use async_trait::async_trait;

use crate::common::{Boundary, Page, TransportError};

/// Backward pagination over the backing log.
///
/// Implementations return at most `limit` messages strictly older than
/// `boundary` (ties broken by id), ascending within the page. They never
/// retry; a failed request surfaces as `TransportError` and the caller
/// decides what happens next.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_older_than(&self, boundary: &Boundary, limit: usize) -> Result<Page, TransportError>;
}
