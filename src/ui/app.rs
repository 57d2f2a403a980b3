use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::common::{FeedError, FeedEvent, FileReference, MessageBody};
use crate::feed::{FeedHandle, MessageAppender};

use super::render::format_message;
use super::state::AppState;

/// Who the local user is when sending.
#[derive(Debug, Clone)]
pub struct Identity {
    pub sender_id: String,
    pub display_name: String,
}

/// A line typed into the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Send(MessageBody),
    LoadMore,
    Quit,
    Ignore,
}

impl InputCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Ignore;
        }
        match line {
            "/more" => return Self::LoadMore,
            "/quit" | "/exit" => return Self::Quit,
            _ => {}
        }
        if let Some(rest) = line.strip_prefix("/file ") {
            let mut parts = rest.split_whitespace();
            return match (parts.next(), parts.next()) {
                (Some(name), Some(path)) => Self::Send(MessageBody::FileReference(FileReference {
                    name: name.to_string(),
                    path: path.to_string(),
                })),
                _ => Self::Ignore,
            };
        }
        Self::Send(MessageBody::Text(line.to_string()))
    }
}

/// Line-oriented chat client: prints feed deltas as they arrive and turns
/// stdin lines into sends and backfill requests.
pub struct TerminalApp {
    state: AppState,
    feed: FeedHandle,
    appender: Arc<dyn MessageAppender>,
    event_receiver: mpsc::UnboundedReceiver<FeedEvent>,
    identity: Identity,
    storage_bucket: String,
}

impl TerminalApp {
    pub fn new(
        feed: FeedHandle,
        appender: Arc<dyn MessageAppender>,
        event_receiver: mpsc::UnboundedReceiver<FeedEvent>,
        identity: Identity,
        storage_bucket: String,
    ) -> Self {
        Self {
            state: AppState::new(),
            feed,
            appender,
            event_receiver,
            identity,
            storage_bucket,
        }
    }

    pub async fn run(mut self) -> Result<(), FeedError> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{}", self.state.status);

        loop {
            tokio::select! {
                event = self.event_receiver.recv() => {
                    match event {
                        Some(event) => self.handle_feed_event(event),
                        None => break,
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if !self.handle_input(&line).await? {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            log::warn!("Failed to read stdin: {err}");
                            break;
                        }
                    }
                }
            }
            if self.state.closed {
                break;
            }
        }

        self.feed.close().await
    }

    fn handle_feed_event(&mut self, event: FeedEvent) {
        let prepended = matches!(event, FeedEvent::Prepended(_));
        let shown = self.state.apply(event);
        if prepended {
            println!("--- {} ---", self.state.status);
        }
        for message in &shown {
            println!("{}", format_message(message, &self.storage_bucket));
        }
        if shown.is_empty() || prepended {
            println!("* {}", self.state.status);
        }
    }

    /// Returns `false` when the user asked to quit.
    async fn handle_input(&mut self, line: &str) -> Result<bool, FeedError> {
        match InputCommand::parse(line) {
            InputCommand::Send(body) => self.send_message(body).await,
            InputCommand::LoadMore => {
                if self.feed.status().await?.history_exhausted {
                    println!("* No more messages");
                } else if self.state.take_backfill_trigger() {
                    self.feed.load_more().await?;
                    println!("* Loading older messages...");
                } else {
                    println!("* Still loading");
                }
            }
            InputCommand::Quit => return Ok(false),
            InputCommand::Ignore => {}
        }
        Ok(true)
    }

    async fn send_message(&mut self, body: MessageBody) {
        // The message shows up once the live subscription delivers it back.
        if let Err(err) = self
            .appender
            .append_message(&self.identity.sender_id, &self.identity.display_name, body)
            .await
        {
            log::warn!("Failed to send message: {err}");
            println!("* Failed to send message: {err}");
        }
    }
}
