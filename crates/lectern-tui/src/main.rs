//! Lectern TUI entry point.
//!
//! # Usage
//!
//! ```bash
//! # Chat alone against the in-memory backend
//! lectern-tui --name ada
//!
//! # With a demo classmate, forcing the polling fallback
//! lectern-tui --name ada --peer --no-realtime
//! ```

use std::{fs::File, sync::Arc, time::Duration};

use clap::Parser;
use lectern_app::{Command, MemoryBackend, Runtime, SystemEnv};
use lectern_core::{Identity, SessionConfig, UserId};
use lectern_tui::{ChatTerminal, Classmate};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Lectern terminal chat client
#[derive(Parser, Debug)]
#[command(name = "lectern-tui")]
#[command(about = "Course chat client with realtime, polling fallback and reconnects")]
#[command(version)]
struct Args {
    /// User ID to chat as
    #[arg(long, default_value = "1")]
    user_id: u64,

    /// Display name
    #[arg(long, default_value = "me")]
    name: String,

    /// Log file (the terminal is owned by the UI)
    #[arg(long, default_value = "lectern.log")]
    log_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Refuse realtime subscriptions, forcing the polling fallback
    #[arg(long)]
    no_realtime: bool,

    /// Spawn a demo classmate that types and posts periodically
    #[arg(long)]
    peer: bool,

    /// Seconds between classmate posts
    #[arg(long, default_value = "8")]
    peer_every: u64,

    /// Seconds to wait for a realtime subscription before polling
    #[arg(long, default_value = "10")]
    subscribe_timeout: u64,

    /// Seconds between realtime heartbeats
    #[arg(long, default_value = "30")]
    heartbeat_interval: u64,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            subscribe_timeout: Duration::from_secs(self.subscribe_timeout),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval),
            ..SessionConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_file = File::create(&args.log_file)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(Arc::new(log_file)).with_ansi(false))
        .with(filter)
        .init();

    tracing::info!(user_id = args.user_id, name = %args.name, "lectern starting");

    let env = SystemEnv::new();
    let backend = MemoryBackend::new(env);
    backend.set_realtime(!args.no_realtime);

    let identity = Identity::new(UserId(args.user_id), args.name.clone());
    let me = identity.user_id;
    backend.register_author(me, identity.author());

    let config = args.session_config();
    let (runtime, handle) = Runtime::new(backend.clone(), env, identity, config.clone())?;
    let runtime_task = tokio::spawn(runtime.run());

    let classmate = if args.peer {
        Some(Classmate::spawn(backend, env, config, Duration::from_secs(args.peer_every))?)
    } else {
        None
    };

    let result = match ChatTerminal::new(handle.clone(), me) {
        Ok(terminal) => terminal.run().await,
        Err(error) => Err(error),
    };

    // Already stopped if the user quit.
    let _ = handle.send(Command::Shutdown);
    runtime_task.await??;
    if let Some(classmate) = classmate {
        classmate.stop().await;
    }

    tracing::info!("lectern stopped");
    Ok(result?)
}
