pub mod local_log;

pub use local_log::{DEFAULT_LIVE_BUFFER, LocalLogTransport};
