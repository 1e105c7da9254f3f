use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use crossterm::terminal;
use crossterm::tty::IsTty;
use streamchat_core::profile::{image_data_uri, load_profile_image, store_profile_image};
use streamchat_core::{
    ChatClient, Config, Conversation, LocalStore, TransportEvent, TurnState, ERROR_MESSAGE,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod app;
mod handler;
mod reply;
mod tui;
mod ui;

use app::App;
use reply::ReplyWriter;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "streamchat", version)]
#[command(about = "Chat with a remote assistant endpoint, streaming its replies")]
struct Cli {
    /// Chat endpoint URL (overrides STREAMCHAT_ENDPOINT and the config file)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Log at info level instead of warn
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the reply as it streams
    Ask {
        /// Your message
        message: String,
    },
    /// Manage the avatar shown next to your messages
    Avatar {
        #[command(subcommand)]
        action: AvatarAction,
    },
}

#[derive(Subcommand)]
enum AvatarAction {
    /// Use an image file (png, jpg, gif, webp, svg, bmp; max 5MB)
    Set { path: PathBuf },
    /// Remove the saved avatar
    Clear,
    /// Print whether an avatar is saved
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|_| Config::new());

    let endpoint = cli.endpoint.clone().unwrap_or_else(|| config.endpoint());
    let client = ChatClient::new(&endpoint).with_idle_timeout(config.stream_timeout());

    match cli.command {
        None => {
            // Keep the guard alive so buffered log lines are flushed on exit
            let _guard = init_file_logging(cli.debug)?;
            run_tui(config, client).await
        }
        Some(Commands::Ask { message }) => {
            init_stderr_logging(cli.debug);
            ask(&config, &client, &message).await
        }
        Some(Commands::Avatar { action }) => avatar(action),
    }
}

fn env_filter(debug: bool) -> EnvFilter {
    let default_filter = if debug {
        "streamchat_core=info,streamchat=info"
    } else {
        "streamchat_core=warn,streamchat=warn"
    };
    // use RUST_LOG env var, defaulting based on debug flag.
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

fn init_file_logging(debug: bool) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = Config::config_dir()?;
    std::fs::create_dir_all(&log_dir)?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("streamchat-tui.log"))?;

    // Wrap file in non-blocking writer.
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_filter(env_filter(debug));
    let _ = tracing_subscriber::registry().with(file_layer).try_init();
    Ok(guard)
}

fn init_stderr_logging(debug: bool) {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter(debug));
    let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
}

async fn run_tui(config: Config, client: ChatClient) -> Result<()> {
    let profile_image = Config::storage_path()
        .and_then(|path| Ok(LocalStore::open(path)?))
        .ok()
        .and_then(|store| load_profile_image(&store));

    let conversation = Conversation::new(config.prefix());
    let mut app = App::new(conversation, client, profile_image);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();

    let result = async {
        loop {
            terminal.draw(|frame| ui::render(&mut app, frame))?;

            tokio::select! {
                event = events.next() => match event {
                    Some(event) => handler::handle_event(&mut app, event)?,
                    None => break,
                },
                event = next_transport_event(&mut app.turn_rx) => match event {
                    Some(event) => app.on_transport(event),
                    None => app.on_transport_closed(),
                },
            }

            if app.should_quit {
                break;
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    result
}

/// Next event of the in-flight turn; pends forever when there is none.
async fn next_transport_event(
    rx: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn ask(config: &Config, client: &ChatClient, message: &str) -> Result<()> {
    let mut conversation = Conversation::new(config.prefix());
    let request = conversation.submit(message)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.spawn_turn(request, tx);

    let stdout = io::stdout();
    let mut writer = if stdout.is_tty() {
        let width = terminal::size().map(|(cols, _)| cols).unwrap_or(80);
        ReplyWriter::live(stdout, width)
    } else {
        ReplyWriter::buffered(stdout)
    };

    let state = reply::stream_reply(&mut conversation, &mut rx, &mut writer).await?;
    if state == TurnState::Failed {
        bail!(ERROR_MESSAGE)
    }
    Ok(())
}

fn avatar(action: AvatarAction) -> Result<()> {
    let mut store = LocalStore::open(Config::storage_path()?)?;
    match action {
        AvatarAction::Set { path } => {
            let uri = image_data_uri(&path)?;
            store_profile_image(&mut store, Some(uri))?;
            println!("Avatar saved from {}", path.display());
        }
        AvatarAction::Clear => {
            store_profile_image(&mut store, None)?;
            println!("Avatar removed");
        }
        AvatarAction::Show => match load_profile_image(&store) {
            Some(uri) => {
                let mime = uri
                    .strip_prefix("data:")
                    .and_then(|rest| rest.split(';').next())
                    .unwrap_or("unknown");
                println!("Avatar set ({}, {} bytes encoded)", mime, uri.len());
            }
            None => println!("No avatar set"),
        },
    }
    Ok(())
}
