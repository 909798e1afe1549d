//! # chessd — server-authoritative online chess
//!
//! A TCP server that hosts rating-banded matchmaking and authoritative
//! chess games over a line-delimited JSON protocol. Every move a client
//! submits is validated against the FIDE rules before it is applied; no
//! client is ever trusted to compute check, checkmate, or draw conditions
//! itself.
//!
//! ## Usage
//!
//! ```bash
//! # Start the server on the configured port (default 8787)
//! chessd
//!
//! # Start in development mode: in-memory storage, relaxed rate limits,
//! # an ephemeral per-process token secret, verbose logging
//! chessd --dev
//! ```

pub mod chess;
pub mod config;
pub mod error;
pub mod manager;
pub mod matchmaking;
pub mod net;
pub mod session;
pub mod storage;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::StartupError;
use crate::manager::GameManager;
use crate::matchmaking::{Matchmaker, MatchmakerConfig};
use crate::net::ConnectionHub;
use crate::storage::memory::{InMemoryGameStore, InMemoryPlayerStore, InMemorySessionStore};
use crate::storage::{GameStore, PlayerStore, SessionStore};

/// chessd — server-authoritative online chess.
#[derive(Parser, Debug)]
#[command(name = "chessd")]
#[command(about = "Server-authoritative online chess: matchmaking, rules enforcement, rating")]
#[command(version)]
struct Cli {
    /// Run in development mode: in-memory storage, relaxed rate limits, an
    /// ephemeral token secret, verbose logging.
    #[arg(long, visible_alias = "development")]
    dev: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let filter = if cli.dev { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = Config::load(cli.dev);

    match run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal startup error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

/// Wires the stores, the game manager, the matchmaker and the connection
/// hub together, binds the listener, and runs until a shutdown signal
/// arrives. Persistence-backend initialization failures are fatal unless
/// `database.use_in_memory` is set (`spec.md` §7).
async fn run(config: Config) -> Result<(), StartupError> {
    log::info!("starting chessd on {}:{} (dev_mode={})", config.server.bind_address, config.server.port, config.dev_mode);

    let (player_store, session_store, game_store, persistence_enabled): (Arc<dyn PlayerStore>, Arc<dyn SessionStore>, Arc<dyn GameStore>, bool) = if config.database.use_in_memory {
        log::info!("using in-memory storage backend");
        (Arc::new(InMemoryPlayerStore::new()), Arc::new(InMemorySessionStore::new()), Arc::new(InMemoryGameStore::new()), false)
    } else {
        // No durable backend ships with this build; an operator wiring one in
        // would replace these three constructors (`spec.md` §6: the DAO
        // traits are the contract, not any particular backend).
        return Err(StartupError::Persistence("no durable backend is configured; pass --dev or set CHESSD_USE_IN_MEMORY=true".to_string()));
    };

    let (manager, game_events) = GameManager::new(player_store.clone(), game_store, persistence_enabled, config.rating);
    let manager = Arc::new(manager);

    let matchmaker = Arc::new(Matchmaker::new(MatchmakerConfig {
        default_rating_range: config.matchmaking.default_rating_range as i32,
        max_rating_range: config.matchmaking.max_rating_range as i32,
        expansion_interval_ms: (config.matchmaking.rating_expansion_interval_seconds as i64) * 1000,
        expansion_amount: config.matchmaking.rating_expansion_amount as i32,
    }));

    let hub = ConnectionHub::new(manager.clone(), matchmaker, player_store, session_store, config.server.clone(), config.security.clone(), config.database.use_in_memory);

    let listener = TcpListener::bind((config.server.bind_address.as_str(), config.server.port))
        .await
        .map_err(|source| StartupError::Bind { addr: format!("{}:{}", config.server.bind_address, config.server.port), source })?;
    log::info!("listening on {}", listener.local_addr().map(|a| a.to_string()).unwrap_or_default());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let accept_task = hub.clone().spawn_accept_loop(listener, shutdown_tx.subscribe());
    let matchmaking_task = hub.clone().spawn_matchmaking_sweep(shutdown_tx.subscribe());
    let heartbeat_task = hub.clone().spawn_heartbeat_supervisor(shutdown_tx.subscribe());
    let relay_task = hub.clone().spawn_game_event_relay(game_events, shutdown_tx.subscribe());
    let timeout_task = manager::spawn_timeout_monitor(manager, shutdown_tx.subscribe());

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, draining connections");

    let _ = shutdown_tx.send(());
    hub.shutdown().await;

    for task in [accept_task, matchmaking_task, heartbeat_task, relay_task, timeout_task] {
        task.abort();
    }

    log::info!("chessd stopped cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
