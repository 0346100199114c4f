//! Shared fixtures: fixed clock, scripted draws, in-memory journal.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use tricolor::config::{GameConfig, SettlementConfig};
use tricolor::engine::draw::ScriptedDrawer;
use tricolor::engine::RoundScheduler;
use tricolor::ledger::{InMemoryLedger, Ledger};
use tricolor::storage::journal::MemoryJournal;
use tricolor::types::Outcome;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

pub struct Game {
    pub scheduler: Arc<RoundScheduler>,
    pub ledger: Arc<InMemoryLedger>,
    pub journal: Arc<MemoryJournal>,
}

pub fn game(starting_balance: Decimal, draws: &[Outcome]) -> Game {
    let ledger = Arc::new(InMemoryLedger::new(starting_balance));
    let journal = Arc::new(MemoryJournal::new());
    let config = GameConfig {
        starting_balance,
        ..GameConfig::default()
    };
    let scheduler = RoundScheduler::new(
        config,
        &SettlementConfig::default(),
        ledger.clone(),
        journal.clone(),
        Box::new(ScriptedDrawer::new(draws.iter().copied())),
    );
    Game {
        scheduler: Arc::new(scheduler),
        ledger,
        journal,
    }
}

/// Scheduler over an arbitrary ledger implementation.
pub fn game_with_ledger(ledger: Arc<dyn Ledger>, settlement: SettlementConfig, draw: Outcome) -> RoundScheduler {
    RoundScheduler::new(
        GameConfig::default(),
        &settlement,
        ledger,
        Arc::new(MemoryJournal::new()),
        Box::new(ScriptedDrawer::always(draw)),
    )
}
