use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::sync::mpsc;

use rust_feed_chat::common::{FeedEvent, MessageBody};
use rust_feed_chat::config::{self, AppConfig};
use rust_feed_chat::feed::{ChannelSink, FeedHandle, FeedSession, MessageAppender};
use rust_feed_chat::network::LocalLogTransport;
use rust_feed_chat::ui::{Identity, TerminalApp, format_message};

#[derive(Parser)]
#[command(
    name = "rust_feed_chat",
    version,
    about = "Chat client with an ordered live + history message feed"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow the chat: print recent history, stream new messages, send stdin lines
    Tail {
        /// Display name to send as (overrides config)
        #[arg(long = "as", value_name = "NAME")]
        display_name: Option<String>,
    },
    /// Append a single message
    Send {
        text: String,
        #[arg(long = "as", value_name = "NAME")]
        display_name: Option<String>,
    },
    /// Print the newest page plus N older pages
    History {
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Append demo messages to the log
    Seed {
        #[arg(long, default_value_t = 50)]
        count: usize,
    },
    /// Write the effective configuration to the config path
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);

    match cli.command {
        Command::Tail { display_name } => run_tail(app_config, display_name).await,
        Command::Send { text, display_name } => {
            let transport = open_transport(&app_config)?;
            let identity = identity(&app_config, display_name);
            let id = transport
                .append_message(&identity.sender_id, &identity.display_name, MessageBody::from_wire(&text))
                .await?;
            println!("Sent message {id}");
            Ok(())
        }
        Command::History { pages } => run_history(app_config, pages).await,
        Command::Seed { count } => {
            let transport = open_transport(&app_config)?;
            for i in 1..=count {
                transport
                    .append_message("seed", "seed-bot", MessageBody::Text(format!("Demo message #{i}")))
                    .await?;
            }
            log::info!("Seeded {count} messages into {}", app_config.database_path);
            println!("Log now holds {} messages", transport.message_count().await?);
            Ok(())
        }
        Command::InitConfig => {
            config::save_config(&cli.config, &app_config)?;
            println!("Wrote {}", cli.config);
            Ok(())
        }
    }
}

fn open_transport(app_config: &AppConfig) -> Result<LocalLogTransport, Box<dyn Error>> {
    let transport = LocalLogTransport::open(&app_config.database_path, app_config.live_buffer)?
        .with_replay_tail(app_config.replay_tail);
    Ok(transport)
}

fn identity(app_config: &AppConfig, display_name: Option<String>) -> Identity {
    Identity {
        sender_id: app_config.sender_id.clone(),
        display_name: display_name.unwrap_or_else(|| app_config.display_name.clone()),
    }
}

fn open_feed(
    app_config: &AppConfig,
    transport: &Arc<LocalLogTransport>,
) -> Result<(FeedHandle, mpsc::UnboundedReceiver<FeedEvent>), Box<dyn Error>> {
    let (sink, events) = ChannelSink::new();
    let feed = FeedSession::open(
        app_config.feed_config()?,
        transport.clone(),
        transport.clone(),
        Arc::new(sink),
    )?;
    Ok((feed, events))
}

async fn run_tail(app_config: AppConfig, display_name: Option<String>) -> Result<(), Box<dyn Error>> {
    let transport = Arc::new(open_transport(&app_config)?);
    let (feed, events) = open_feed(&app_config, &transport)?;
    let identity = identity(&app_config, display_name);
    log::info!("Chatting as {} ({})", identity.display_name, identity.sender_id);

    let app = TerminalApp::new(feed, transport, events, identity, app_config.storage_bucket.clone());
    app.run().await?;
    Ok(())
}

async fn run_history(app_config: AppConfig, pages: usize) -> Result<(), Box<dyn Error>> {
    let transport = Arc::new(open_transport(&app_config)?);
    let (feed, mut events) = open_feed(&app_config, &transport)?;

    // Wait for the initial page before asking for older ones.
    loop {
        match events.recv().await {
            Some(FeedEvent::InitialBatch(_)) => break,
            Some(FeedEvent::OpenFailed(err)) => return Err(err.into()),
            Some(_) => {}
            None => return Ok(()),
        }
    }

    'pages: for _ in 0..pages {
        if feed.status().await?.history_exhausted {
            break;
        }
        feed.load_more().await?;
        loop {
            match events.recv().await {
                Some(FeedEvent::Prepended(_)) => break,
                Some(FeedEvent::LoadFailed(err)) => {
                    log::warn!("Stopping history early: {err}");
                    break 'pages;
                }
                Some(_) => {}
                None => break 'pages,
            }
        }
    }

    for message in feed.snapshot().await? {
        println!("{}", format_message(&message, &app_config.storage_bucket));
    }
    feed.close().await?;
    Ok(())
}
