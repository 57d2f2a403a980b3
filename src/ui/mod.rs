pub mod app;
pub mod render;
pub mod state;

pub use app::{Identity, InputCommand, TerminalApp};
pub use render::format_message;
pub use state::AppState;
