//! OpenCode Bridge CLI
//!
//! Debugging interface for the bridge core: binary discovery checks, a
//! foreground lifecycle harness, and session CRUD against a running
//! backend.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use opencode_bridge::{
    resolve_binary_path, BridgeConfig, Lifecycle, LifecycleObserver, LifecycleOptions,
    LifecycleState, ServerManager, SessionClient,
};

#[derive(Parser)]
#[command(name = "opencode-bridge")]
#[command(about = "OpenCode bridge core - server and session lifecycle tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the opencode CLI is installed
    Check,
    /// Run a full lifecycle in the foreground (Ctrl-C to stop)
    Run {
        /// Title for the created session
        #[arg(short, long)]
        title: Option<String>,
        /// Only resolve the server port, skip session resolution
        #[arg(long)]
        no_session: bool,
    },
    /// Session management against a running backend
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List sessions
    List {
        /// Backend port
        #[arg(short, long)]
        port: u16,
    },
    /// Create a session
    Create {
        #[arg(short, long)]
        port: u16,
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Delete a session
    Delete {
        #[arg(short, long)]
        port: u16,
        /// Session ID
        id: String,
    },
    /// Share a session and print its URL
    Share {
        #[arg(short, long)]
        port: u16,
        id: String,
    },
    /// Revoke a session's share URL
    Unshare {
        #[arg(short, long)]
        port: u16,
        id: String,
    },
}

// ============ Output Types ============

#[derive(Serialize)]
struct CheckOutput {
    installed: bool,
    path: Option<String>,
}

#[derive(Serialize)]
struct SessionListItem {
    id: String,
    title: String,
    directory: String,
    updated: String,
}

// ============ Main ============

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Check => handle_check(),
        Commands::Run { title, no_session } => handle_run(title, no_session).await,
        Commands::Session { action } => {
            let output = handle_session(action).await?;
            println!("{output}");
            Ok(())
        }
    }
}

// ============ Handlers ============

fn handle_check() -> anyhow::Result<()> {
    let config = BridgeConfig::load().unwrap_or_default();
    let output = match resolve_binary_path(config.binary_path.as_deref()) {
        Ok(path) => CheckOutput {
            installed: true,
            path: Some(path.display().to_string()),
        },
        Err(_) => CheckOutput {
            installed: false,
            path: None,
        },
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

struct PrintObserver;

impl LifecycleObserver for PrintObserver {
    fn on_state_changed(&self, state: LifecycleState) {
        println!("state: {state}");
    }
    fn on_port_ready(&self, port: u16) {
        println!("port ready: {port}");
    }
    fn on_session_and_port_ready(&self, session_id: &str, port: u16) {
        println!("session {session_id} ready on port {port}");
    }
    fn on_error(&self, message: &str) {
        eprintln!("error: {message}");
    }
    fn on_process_exited(&self) {
        println!("server exited");
    }
}

async fn handle_run(title: Option<String>, no_session: bool) -> anyhow::Result<()> {
    let config = BridgeConfig::load().unwrap_or_default();
    let server = Arc::new(ServerManager::new(&config));
    let mut options = LifecycleOptions::from_config(&config);
    options.session_title = title;
    options.resolve_session = !no_session;

    let lifecycle = Lifecycle::new(
        server.clone(),
        Arc::new(config),
        Arc::new(PrintObserver),
        options,
    );
    if let Err(e) = lifecycle.initialize().await {
        anyhow::bail!("initialize failed: {e}");
    }

    println!("press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    lifecycle.dispose();
    server.stop().await;
    Ok(())
}

async fn handle_session(action: SessionAction) -> anyhow::Result<String> {
    let config = BridgeConfig::load().unwrap_or_default();
    match action {
        SessionAction::List { port } => {
            let client = SessionClient::new(port, config.max_sessions);
            let sessions = client.list(true).await?;
            let items: Vec<SessionListItem> = sessions
                .iter()
                .map(|s| SessionListItem {
                    id: s.id.clone(),
                    title: s.title.clone().unwrap_or_default(),
                    directory: s.directory.clone(),
                    updated: s.updated_at.to_rfc3339(),
                })
                .collect();
            Ok(serde_json::to_string_pretty(&items)?)
        }
        SessionAction::Create { port, title } => {
            let client = SessionClient::new(port, config.max_sessions);
            let session = client.create(title.as_deref()).await?;
            Ok(serde_json::to_string_pretty(&session)?)
        }
        SessionAction::Delete { port, id } => {
            let client = SessionClient::new(port, config.max_sessions);
            let deleted = client.delete(&id).await?;
            Ok(json!({ "deleted": deleted }).to_string())
        }
        SessionAction::Share { port, id } => {
            let client = SessionClient::new(port, config.max_sessions);
            match client.share(&id).await? {
                Some(url) => Ok(json!({ "url": url }).to_string()),
                None => anyhow::bail!("session not found: {id}"),
            }
        }
        SessionAction::Unshare { port, id } => {
            let client = SessionClient::new(port, config.max_sessions);
            let unshared = client.unshare(&id).await?;
            Ok(json!({ "unshared": unshared }).to_string())
        }
    }
}
