//! TRICOLOR: round-based colour prediction game
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores state from disk (or starts fresh), and drives the round clock,
//! settlement retries and periodic snapshots until shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use tricolor::api::{self, ApiState};
use tricolor::config;
use tricolor::engine::draw::UniformDrawer;
use tricolor::engine::{RoundScheduler, TickReport};
use tricolor::ledger::InMemoryLedger;
use tricolor::storage::{self, journal::FileJournal, StateSnapshot};

const BANNER: &str = r#"
 _____ ____  ___ ____ ___  _     ___  ____
|_   _|  _ \|_ _/ ___/ _ \| |   / _ \|  _ \
  | | | |_) || | |  | | | | |  | | | | |_) |
  | | |  _ < | | |__| |_| | |__| |_| |  _ <
  |_| |_| \_\___\____\___/|_____\___/|_| \_\

  Red · Green · Violet  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("TRICOLOR_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        game = %cfg.game.name,
        round_secs = cfg.game.round_duration_secs,
        cooldown_secs = cfg.game.cooldown_secs,
        multiplier = %cfg.game.payout_multiplier,
        outcomes = ?cfg.game.outcomes,
        "TRICOLOR starting up"
    );

    // -- Restore or create state -----------------------------------------

    let snapshot = storage::load_snapshot(&cfg.storage.snapshot_path)?;
    let journal = Arc::new(FileJournal::new(&cfg.storage.journal_path));

    let (ledger, scheduler) = match snapshot {
        Some(s) => {
            let ledger = Arc::new(InMemoryLedger::restore(cfg.game.starting_balance, s.accounts));
            let scheduler = RoundScheduler::restore(
                cfg.game.clone(),
                &cfg.settlement,
                ledger.clone(),
                journal,
                Box::new(UniformDrawer),
                s.scheduler,
            );
            info!(
                accounts = ledger.account_count(),
                round = ?scheduler.latest_round().map(|r| r.number),
                pending_retries = scheduler.pending_retries().len(),
                "Resumed from snapshot"
            );
            (ledger, scheduler)
        }
        None => {
            let ledger = Arc::new(InMemoryLedger::new(cfg.game.starting_balance));
            let scheduler = RoundScheduler::new(
                cfg.game.clone(),
                &cfg.settlement,
                ledger.clone(),
                journal,
                Box::new(UniformDrawer),
            );
            info!(starting_balance = %cfg.game.starting_balance, "Fresh start");
            (ledger, scheduler)
        }
    };
    let scheduler = Arc::new(scheduler);

    // -- API -------------------------------------------------------------

    if cfg.server.enabled {
        api::spawn_api(Arc::new(ApiState::new(scheduler.clone())), cfg.server.port).await?;
    } else {
        info!("API server disabled");
    }

    // -- Main loop -------------------------------------------------------

    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.game.tick_interval_ms));
    let mut retry_timer = tokio::time::interval(Duration::from_secs(cfg.settlement.retry_interval_secs));
    let mut snapshot_timer = tokio::time::interval(Duration::from_secs(cfg.storage.snapshot_interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        tick_ms = cfg.game.tick_interval_ms,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let sched = scheduler.clone();
                match tokio::task::spawn_blocking(move || sched.tick()).await {
                    Ok(report) => log_tick_report(&report),
                    Err(e) => error!(error = %e, "Tick task failed"),
                }
            }
            _ = retry_timer.tick() => {
                let sched = scheduler.clone();
                // Off the tick path: a slow ledger delays retries, not rounds.
                tokio::task::spawn_blocking(move || sched.retry_settlements());
            }
            _ = snapshot_timer.tick() => {
                save(&scheduler, &ledger, &cfg.storage.snapshot_path);
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let snapshot = StateSnapshot::capture(&scheduler, &ledger);
    storage::save_snapshot(&snapshot, &cfg.storage.snapshot_path)?;
    info!(
        accounts = ledger.account_count(),
        rounds = scheduler.rounds_played(),
        alerts = scheduler.settlement_alerts().len(),
        "TRICOLOR shut down cleanly."
    );

    Ok(())
}

fn save(scheduler: &RoundScheduler, ledger: &InMemoryLedger, path: &str) {
    let snapshot = StateSnapshot::capture(scheduler, ledger);
    if let Err(e) = storage::save_snapshot(&snapshot, path) {
        error!(error = %e, "Failed to save snapshot");
    }
}

/// Summarise a tick that did something.
fn log_tick_report(report: &TickReport) {
    if report.is_idle() {
        return;
    }
    let settlement = report.settlement.as_ref();
    debug!(
        closed = ?report.closed,
        settled = ?settlement.map(|s| s.round_number),
        house_net = ?settlement.map(|s| s.house_net()),
        opened = ?report.opened,
        "Tick processed"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tricolor=info"));

    let json_logging = std::env::var("TRICOLOR_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
