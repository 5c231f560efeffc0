//! `lanchat`: chat with other devices on the local network.
//!
//! Without `--join` this device hosts on port 12345; with it, it joins the
//! host at that address. Lines typed on stdin are sent as messages;
//! commands start with `/`.
//!
//! ```bash
//! # Host
//! cargo run --bin lanchat -- --name alice
//!
//! # Join from another device
//! cargo run --bin lanchat -- --name bob --join 192.168.1.5
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use lanchat::config::{CliArgs, LanchatConfig};
use lanchat::files::DirFileStore;
use lanchat::reconcile::FeedEvent;
use lanchat::store::{InMemoryStore, LocalId, Message, MessageKind, MessageStore};
use lanchat::transport::TransportError;
use lanchat::ChatNode;

type Node = ChatNode<InMemoryStore, DirFileStore>;

const HELP: &str = "commands: /like N, /edit N TEXT, /delete N, /image PATH [CAPTION], /doc PATH, /list, /peers, /quit";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match LanchatConfig::load_for_startup(&cli) {
        Ok((config, warning)) => {
            if let Some(e) = warning {
                eprintln!("Warning: ignoring config file: {e}");
            }
            config
        }
        Err(e) => {
            eprintln!("error: failed to load config file: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("lanchat starting");

    match run(config).await {
        Ok(()) => {
            tracing::info!("lanchat exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            tracing::error!(error = %e, "lanchat failed");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging.
///
/// With a log file, output goes through a non-blocking file writer and the
/// returned [`WorkerGuard`] must be held until exit. Otherwise logs go to
/// stderr, keeping stdout for the chat transcript. A log path without a
/// file name is reported and falls back to stderr.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_dir, file_name)) = log_target(file_path) else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Splits a log file path into directory and file name, reporting a path
/// that names no file.
fn log_target(file_path: Option<&Path>) -> Option<(&Path, &str)> {
    let path = file_path?;
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        eprintln!("error: log file {} has no file name, logging to stderr", path.display());
        return None;
    };
    let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
    Some((dir, name))
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] lanchat::config::ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("stdin: {0}")]
    Stdin(#[from] std::io::Error),
}

async fn run(config: LanchatConfig) -> Result<(), RunError> {
    let files = DirFileStore::new(&config.data_dir);
    let (node, feed) = ChatNode::new(config.node_options(), InMemoryStore::new(), files);
    let node = Arc::new(node);

    let printer = tokio::spawn(print_feed(Arc::clone(&node), feed));
    let watcher = tokio::spawn(print_status(Arc::clone(&node)));

    let started = match config.join_addr()? {
        Some(addr) => {
            println!("Joining {addr} as {} ...", node.session().display_name());
            node.join(addr).await
        }
        None => node.start_host(config.bind_addr()?).await.map(|_| ()),
    };
    if let Err(e) = started {
        node.shutdown();
        return Err(e.into());
    }
    println!("{HELP}");

    let result = repl(&node).await;

    node.shutdown();
    node.join_tasks(Duration::from_secs(2)).await;
    printer.abort();
    watcher.abort();
    result
}

/// Reads stdin until `/quit`, end of input, or Ctrl-C.
async fn repl(node: &Node) -> Result<(), RunError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                return Ok(());
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };

        match Command::parse(&line) {
            Ok(Command::Quit) => return Ok(()),
            Ok(command) => {
                if let Err(e) = execute(node, command).await {
                    println!("! {e}");
                }
            }
            Err(usage) => println!("! {usage}"),
        }
    }
}

/// A parsed stdin line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Say(String),
    Like(LocalId),
    Edit(LocalId, String),
    Delete(LocalId),
    Image(PathBuf, String),
    Doc(PathBuf),
    List,
    Peers,
    Quit,
    Nothing,
}

impl Command {
    fn parse(line: &str) -> Result<Self, &'static str> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Nothing);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Say(line.to_string()));
        };

        let (cmd, args) = rest.split_once(' ').unwrap_or((rest, ""));
        let args = args.trim();
        match cmd {
            "like" => parse_id(args).map(Self::Like).ok_or("usage: /like N"),
            "delete" => parse_id(args).map(Self::Delete).ok_or("usage: /delete N"),
            "edit" => {
                let (id, text) = args.split_once(' ').ok_or("usage: /edit N TEXT")?;
                let id = parse_id(id).ok_or("usage: /edit N TEXT")?;
                Ok(Self::Edit(id, text.trim().to_string()))
            }
            "image" if !args.is_empty() => {
                let (path, caption) = args.split_once(' ').unwrap_or((args, ""));
                Ok(Self::Image(PathBuf::from(path), caption.trim().to_string()))
            }
            "image" => Err("usage: /image PATH [CAPTION]"),
            "doc" if !args.is_empty() => Ok(Self::Doc(PathBuf::from(args))),
            "doc" => Err("usage: /doc PATH"),
            "list" => Ok(Self::List),
            "peers" => Ok(Self::Peers),
            "quit" | "exit" => Ok(Self::Quit),
            _ => Err(HELP),
        }
    }
}

fn parse_id(text: &str) -> Option<LocalId> {
    text.trim().parse().ok()
}

async fn execute(node: &Node, command: Command) -> Result<(), RunError> {
    match command {
        Command::Say(text) => node.send_text(text)?,
        Command::Like(id) => node.toggle_like(id)?,
        Command::Edit(id, text) => node.edit(id, text)?,
        Command::Delete(id) => node.delete(id)?,
        Command::Image(path, caption) => {
            let bytes = tokio::fs::read(&path).await?;
            node.send_image(bytes, caption, path)?;
        }
        Command::Doc(path) => {
            let bytes = tokio::fs::read(&path).await?;
            node.send_document(bytes, path)?;
        }
        Command::List => match node.messages().await {
            Ok(messages) => {
                for message in &messages {
                    println!("{}", format_message(message));
                }
            }
            Err(e) => println!("! {e}"),
        },
        Command::Peers => {
            let names = node.peer_names();
            if names.is_empty() {
                println!("(no connected clients)");
            } else {
                println!("{}", names.join(", "));
            }
        }
        Command::Quit | Command::Nothing => {}
    }
    Ok(())
}

async fn print_feed(node: Arc<Node>, mut feed: mpsc::Receiver<FeedEvent>) {
    while let Some(event) = feed.recv().await {
        let identity = match &event {
            FeedEvent::Inserted { identity, .. } | FeedEvent::Updated { identity } => identity,
        };
        match node.store().find_by_identity(identity).await {
            Ok(Some(message)) => {
                let marker = if matches!(event, FeedEvent::Updated { .. }) { "~" } else { " " };
                println!("{marker}{}", format_message(&message));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "feed lookup failed"),
        }
    }
}

async fn print_status(node: Arc<Node>) {
    let mut connected = node.status().watch_connected();
    let mut address = node.status().watch_address();
    loop {
        tokio::select! {
            changed = connected.changed() => {
                if changed.is_err() {
                    return;
                }
                let state = if *connected.borrow_and_update() { "connected" } else { "disconnected" };
                println!("* {state}");
            }
            changed = address.changed() => {
                if changed.is_err() {
                    return;
                }
                println!("* {}", address.borrow_and_update().as_str());
            }
        }
    }
}

/// Renders one message as a transcript line.
fn format_message(message: &Message) -> String {
    let mut line = format!(
        "[{}] {} {}: {}",
        message.id,
        format_timestamp_ms(message.timestamp_ms),
        message.sender_name,
        message.display_text()
    );
    if message.kind != MessageKind::Text && !message.deleted {
        let name = message.file_name.as_deref().unwrap_or("attachment");
        line.push_str(&format!(" <{name}, {}>", message.formatted_file_size()));
    }
    if message.edited && !message.deleted {
        line.push_str(" (edited)");
    }
    if message.like_count > 0 {
        line.push_str(&format!(" ♥{} {}", message.like_count, message.liked_by_list().join(",")));
    }
    line
}

fn format_timestamp_ms(ms: i64) -> String {
    use chrono::{Local, TimeZone};
    match Local.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt.format("%H:%M").to_string(),
        _ => "??:??".to_string(),
    }
}
