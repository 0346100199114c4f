//! Round scheduler.
//!
//! Owns the round state machine and the clock:
//!
//! ```text
//! accepting --(close time)--> closed --(draw + settle)--> settled --(cool-down)--> next round
//! ```
//!
//! The round gate is a reader/writer lock. Wager placement holds it shared
//! while it checks the window, debits and inserts; the close transition
//! holds it exclusively, so no wager lands after a round is closed.
//! Ticks are serialised by a separate lock and guard on round status, so
//! repeated or late ticks never re-draw or re-settle.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{GameConfig, SettlementConfig};
use crate::engine::draw::OutcomeDrawer;
use crate::engine::retry::{RetryItem, RetryQueue, RetryReport};
use crate::engine::settlement::{SettlementEngine, SettlementReport};
use crate::history::HistoryLog;
use crate::ledger::{Ledger, LedgerEntry};
use crate::storage::journal::{RoundTransition, TransitionJournal};
use crate::types::{GameError, HistoryEntry, Outcome, Round, RoundStatus, Wager, WagerResult};
use crate::wagers::WagerStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Events & reports
// ---------------------------------------------------------------------------

/// Round lifecycle notifications for subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundEvent {
    Opened(Round),
    Closed(Round),
    Settled(HistoryEntry),
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub closed: Option<u64>,
    pub settlement: Option<SettlementReport>,
    pub opened: Option<u64>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.closed.is_none() && self.settlement.is_none() && self.opened.is_none()
    }
}

/// Persisted scheduler state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub round: Option<Round>,
    pub next_round_number: u64,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub wagers: Vec<Wager>,
    pub history: Vec<HistoryEntry>,
    pub retry_queue: Vec<RetryItem>,
    pub alerts: Vec<RetryItem>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Gate {
    /// Latest round; stays `Settled` through the cool-down.
    round: Option<Round>,
    next_number: u64,
    cooldown_until: Option<DateTime<Utc>>,
}

pub struct RoundScheduler {
    config: GameConfig,
    gate: RwLock<Gate>,
    tick_lock: Mutex<()>,
    ledger: Arc<dyn Ledger>,
    wagers: Arc<WagerStore>,
    history: Arc<HistoryLog>,
    settlement: SettlementEngine,
    retries: RetryQueue,
    journal: Arc<dyn TransitionJournal>,
    drawer: Box<dyn OutcomeDrawer>,
    events: broadcast::Sender<RoundEvent>,
}

impl RoundScheduler {
    pub fn new(
        config: GameConfig,
        settlement: &SettlementConfig,
        ledger: Arc<dyn Ledger>,
        journal: Arc<dyn TransitionJournal>,
        drawer: Box<dyn OutcomeDrawer>,
    ) -> Self {
        Self::restore(config, settlement, ledger, journal, drawer, SchedulerSnapshot::default())
    }

    /// Rebuild a scheduler from a snapshot.
    ///
    /// Pending wagers of already-settled rounds that are not in the retry
    /// queue (e.g. drained mid-pass when the snapshot was taken) are queued
    /// again so they cannot be forgotten.
    pub fn restore(
        config: GameConfig,
        settlement: &SettlementConfig,
        ledger: Arc<dyn Ledger>,
        journal: Arc<dyn TransitionJournal>,
        drawer: Box<dyn OutcomeDrawer>,
        snapshot: SchedulerSnapshot,
    ) -> Self {
        let wagers = Arc::new(WagerStore::from_wagers(snapshot.wagers));
        let history = Arc::new(HistoryLog::from_entries(snapshot.history));
        let settlement_engine =
            SettlementEngine::new(Arc::clone(&ledger), Arc::clone(&wagers), config.payout_multiplier);
        let retries = RetryQueue::restore(settlement.max_retries, snapshot.retry_queue, snapshot.alerts);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let next_number = snapshot
            .next_round_number
            .max(snapshot.round.as_ref().map_or(0, |r| r.number + 1))
            .max(1);

        let scheduler = Self {
            config,
            gate: RwLock::new(Gate {
                round: snapshot.round,
                next_number,
                cooldown_until: snapshot.cooldown_until,
            }),
            tick_lock: Mutex::new(()),
            ledger,
            wagers,
            history,
            settlement: settlement_engine,
            retries,
            journal,
            drawer,
            events,
        };
        scheduler.requeue_orphaned_wagers();
        scheduler
    }

    fn requeue_orphaned_wagers(&self) {
        let tracked: HashSet<Uuid> = self
            .retries
            .pending()
            .into_iter()
            .chain(self.retries.escalated())
            .map(|item| item.wager_id)
            .collect();

        for entry in self.history.export() {
            for wager in self.wagers.pending_for_round(entry.round_number) {
                if tracked.contains(&wager.id) {
                    continue;
                }
                warn!(wager_id = %wager.id, round = entry.round_number, "Recovered unsettled wager");
                self.retries.enqueue(RetryItem {
                    wager_id: wager.id,
                    participant_id: wager.participant_id.clone(),
                    round_number: entry.round_number,
                    outcome: entry.outcome,
                    attempts: 0,
                    last_error: "recovered after restart".to_string(),
                    queued_at: Utc::now(),
                });
            }
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RoundEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn record_transition(
        &self,
        round_number: u64,
        status: RoundStatus,
        outcome: Option<Outcome>,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.journal.record(&RoundTransition {
            round_number,
            status,
            outcome,
            at,
        })
    }

    // -- Clock -------------------------------------------------------------

    /// Advance the state machine to the current wall-clock time.
    pub fn tick(&self) -> TickReport {
        self.tick_at(Utc::now())
    }

    /// Advance the state machine to `now`.
    pub fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let _serial = self.tick_lock.lock();
        let mut report = TickReport {
            closed: self.close_if_due(now),
            ..Default::default()
        };
        report.settlement = self.settle_if_closed(now);
        report.opened = self.open_if_ready(now);
        report
    }

    fn close_if_due(&self, now: DateTime<Utc>) -> Option<u64> {
        let closed = {
            let mut gate = self.gate.write();
            let round = gate.round.as_mut().filter(|r| r.is_due_to_close(now))?;
            round.status = RoundStatus::Closed;
            round.closed_at = Some(now);
            round.clone()
        };

        if let Err(e) = self.record_transition(closed.number, RoundStatus::Closed, None, now) {
            error!(round = closed.number, error = %e, "Failed to journal round close");
        }
        info!(
            round = closed.number,
            wagers = self.wagers.for_round(closed.number).len(),
            "Round closed"
        );
        let number = closed.number;
        self.emit(RoundEvent::Closed(closed));
        Some(number)
    }

    fn settle_if_closed(&self, now: DateTime<Utc>) -> Option<SettlementReport> {
        let (number, outcome) = {
            let mut gate = self.gate.write();
            let round = gate.round.as_mut().filter(|r| r.status == RoundStatus::Closed)?;
            let outcome = match round.outcome {
                Some(outcome) => outcome,
                None => {
                    let drawn = self.drawer.draw(&self.config.outcomes);
                    round.outcome = Some(drawn);
                    drawn
                }
            };
            (round.number, outcome)
        };
        info!(round = number, outcome = %outcome, "Outcome drawn");

        let report = self.settlement.settle_round(number, outcome, now);
        for failed in &report.failed {
            self.retries.enqueue(RetryItem {
                wager_id: failed.wager_id,
                participant_id: failed.participant_id.clone(),
                round_number: number,
                outcome,
                attempts: 0,
                last_error: failed.reason.clone(),
                queued_at: now,
            });
        }
        if !report.is_complete() {
            warn!(
                round = number,
                failed = report.failed.len(),
                "Round settled with failed payouts; queued for retry"
            );
        }

        let round_wagers = self.wagers.for_round(number);
        let settled = {
            let mut gate = self.gate.write();
            let round = gate.round.as_mut().filter(|r| r.number == number)?;
            round.status = RoundStatus::Settled;
            round.settled_at = Some(now);
            let entry = HistoryEntry {
                round_number: number,
                outcome,
                opened_at: round.opened_at,
                closed_at: round.closed_at.unwrap_or(now),
                settled_at: now,
                wager_count: round_wagers.len(),
                total_staked: round_wagers.iter().map(|w| w.stake).sum(),
                total_paid: round_wagers.iter().map(|w| w.payout).sum::<Decimal>(),
                unsettled_wagers: round_wagers.iter().filter(|w| w.result == WagerResult::Pending).count(),
            };
            gate.cooldown_until = Some(now + self.config.cooldown());
            entry
        };

        self.history.append(settled.clone());
        if let Err(e) = self.record_transition(number, RoundStatus::Settled, Some(outcome), now) {
            error!(round = number, error = %e, "Failed to journal round settlement");
        }
        self.emit(RoundEvent::Settled(settled));
        Some(report)
    }

    fn open_if_ready(&self, now: DateTime<Utc>) -> Option<u64> {
        let mut gate = self.gate.write();
        let ready = match &gate.round {
            None => true,
            Some(r) if r.status == RoundStatus::Settled => gate.cooldown_until.map_or(true, |until| now >= until),
            Some(_) => false,
        };
        if !ready {
            return None;
        }

        let round = Round::open(gate.next_number, now, self.config.round_duration());
        if let Err(e) = self.record_transition(round.number, RoundStatus::Accepting, None, now) {
            error!(
                round = round.number,
                error = %e,
                "Failed to journal round opening; wager acceptance halted"
            );
            return None;
        }

        gate.next_number += 1;
        gate.cooldown_until = None;
        gate.round = Some(round.clone());
        drop(gate);

        info!(
            round = round.number,
            closes_at = %round.closes_at.to_rfc3339(),
            "Round opened"
        );
        let number = round.number;
        self.emit(RoundEvent::Opened(round));
        Some(number)
    }

    // -- Wager placement ---------------------------------------------------

    pub fn place_wager(&self, participant: &str, prediction: Outcome, stake: Decimal) -> Result<Wager, GameError> {
        self.place_wager_at(participant, prediction, stake, Utc::now())
    }

    /// Place a wager on the accepting round.
    ///
    /// Checks, first failure wins: an accepting round whose window covers
    /// `now`; positive stake; configured outcome; sufficient balance.
    pub fn place_wager_at(
        &self,
        participant: &str,
        prediction: Outcome,
        stake: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Wager, GameError> {
        let gate = self.gate.read();
        let round = gate
            .round
            .as_ref()
            .filter(|r| r.is_accepting_at(now))
            .ok_or(GameError::NoActiveRound)?;

        if stake <= Decimal::ZERO {
            return Err(GameError::InvalidStake(format!("stake must be positive, got {stake}")));
        }
        if !self.config.outcomes.contains(&prediction) {
            return Err(GameError::InvalidOutcome(prediction.to_string()));
        }

        let wager_id = Uuid::new_v4();
        let balance_after = self.ledger.debit(participant, stake, wager_id)?;

        let wager = Wager {
            id: wager_id,
            participant_id: participant.to_string(),
            round_number: round.number,
            prediction,
            stake,
            potential_payout: stake * self.config.payout_multiplier,
            result: WagerResult::Pending,
            payout: Decimal::ZERO,
            placed_at: now,
            settled_at: None,
        };
        self.wagers.insert(wager.clone());
        drop(gate);

        info!(
            round = wager.round_number,
            participant,
            prediction = %prediction,
            stake = %stake,
            balance = %balance_after,
            "Wager placed"
        );
        Ok(wager)
    }

    // -- Queries -----------------------------------------------------------

    /// The round currently accepting wagers, if any.
    pub fn current_round(&self) -> Option<Round> {
        self.gate
            .read()
            .round
            .as_ref()
            .filter(|r| r.status == RoundStatus::Accepting)
            .cloned()
    }

    /// The latest round regardless of status.
    pub fn latest_round(&self) -> Option<Round> {
        self.gate.read().round.clone()
    }

    /// When the next round is due to open, during a cool-down.
    pub fn next_round_at(&self) -> Option<DateTime<Utc>> {
        let gate = self.gate.read();
        match &gate.round {
            Some(r) if r.status == RoundStatus::Settled => gate.cooldown_until,
            _ => None,
        }
    }

    pub fn balance(&self, participant: &str) -> Result<Decimal, GameError> {
        Ok(self.ledger.balance(participant)?)
    }

    pub fn recent_rounds(&self, n: usize) -> Vec<HistoryEntry> {
        self.history.latest(n)
    }

    pub fn rounds_played(&self) -> usize {
        self.history.len()
    }

    pub fn wagers_for(&self, participant: &str) -> Vec<Wager> {
        self.wagers.for_participant(participant)
    }

    pub fn wagers_for_round(&self, round_number: u64) -> Vec<Wager> {
        self.wagers.for_round(round_number)
    }

    pub fn ledger_entries(&self, participant: &str) -> Vec<LedgerEntry> {
        self.ledger.entries(participant)
    }

    // -- Settlement retries ------------------------------------------------

    /// Retry failed payouts once. Runs off the tick path.
    pub fn retry_settlements(&self) -> RetryReport {
        self.retry_settlements_at(Utc::now())
    }

    pub fn retry_settlements_at(&self, now: DateTime<Utc>) -> RetryReport {
        let report = self.retries.process(&self.settlement, now);
        if report != RetryReport::default() {
            debug!(
                resolved = report.resolved,
                pending = report.still_pending,
                escalated = report.escalated,
                "Settlement retry pass"
            );
        }
        report
    }

    pub fn pending_retries(&self) -> Vec<RetryItem> {
        self.retries.pending()
    }

    /// Wagers that exhausted their retries and need an operator.
    pub fn settlement_alerts(&self) -> Vec<RetryItem> {
        self.retries.escalated()
    }

    // -- Persistence -------------------------------------------------------

    /// Consistent copy of scheduler state. Blocks ticks and placements
    /// for the duration of the copy.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.snapshot_with(|| ()).0
    }

    /// Copy scheduler state, then run `capture` while ticks and placements
    /// are still blocked.
    ///
    /// Used to export the ledger in the same window, so every stake in the
    /// exported balances has its wager in the snapshot.
    pub fn snapshot_with<T>(&self, capture: impl FnOnce() -> T) -> (SchedulerSnapshot, T) {
        let _serial = self.tick_lock.lock();
        let gate = self.gate.write();
        let snapshot = SchedulerSnapshot {
            round: gate.round.clone(),
            next_round_number: gate.next_number,
            cooldown_until: gate.cooldown_until,
            wagers: self.wagers.export(),
            history: self.history.export(),
            retry_queue: self.retries.pending(),
            alerts: self.retries.escalated(),
        };
        let captured = capture();
        drop(gate);
        (snapshot, captured)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
