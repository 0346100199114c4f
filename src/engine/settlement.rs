//! Settlement engine.
//!
//! Resolves every wager of a closed round against its drawn outcome and
//! credits winners through the ledger. Each wager settles independently:
//! resolved wagers are skipped, and the payout credit is keyed by the
//! wager id so a retry after a partial failure never pays twice.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ledger::{Ledger, LedgerError};
use crate::types::{Outcome, Wager, WagerResult};
use crate::wagers::WagerStore;

// ---------------------------------------------------------------------------
// Errors & reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettlementError {
    #[error("Wager not found: {0}")]
    WagerNotFound(Uuid),

    #[error("Payout credit failed for wager {wager_id}: {source}")]
    Ledger {
        wager_id: Uuid,
        #[source]
        source: LedgerError,
    },
}

/// What happened to a single wager.
#[derive(Debug, Clone, PartialEq)]
pub enum WagerSettlement {
    Settled(SettledWager),
    /// Already resolved by an earlier pass.
    Skipped(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettledWager {
    pub wager_id: Uuid,
    pub participant_id: String,
    pub result: WagerResult,
    pub stake: Decimal,
    pub payout: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedSettlement {
    pub wager_id: Uuid,
    pub participant_id: String,
    pub reason: String,
}

/// Result of settling one round.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementReport {
    pub round_number: u64,
    pub outcome: Outcome,
    pub wager_count: usize,
    pub settled: Vec<SettledWager>,
    pub skipped: usize,
    pub failed: Vec<FailedSettlement>,
    /// Stakes of every wager in the round.
    pub total_staked: Decimal,
    /// Payouts credited during this pass.
    pub total_paid: Decimal,
}

impl SettlementReport {
    /// Every wager of the round has a result written.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn winners(&self) -> usize {
        self.settled.iter().filter(|s| s.result == WagerResult::Won).count()
    }

    /// Stakes kept minus payouts made, over the wagers settled in this pass.
    pub fn house_net(&self) -> Decimal {
        self.settled.iter().map(|s| s.stake - s.payout).sum()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SettlementEngine {
    ledger: Arc<dyn Ledger>,
    wagers: Arc<WagerStore>,
    payout_multiplier: Decimal,
}

impl SettlementEngine {
    pub fn new(ledger: Arc<dyn Ledger>, wagers: Arc<WagerStore>, payout_multiplier: Decimal) -> Self {
        Self {
            ledger,
            wagers,
            payout_multiplier,
        }
    }

    pub fn payout_multiplier(&self) -> Decimal {
        self.payout_multiplier
    }

    /// Payout owed for a prediction given the drawn outcome.
    pub fn payout_for(&self, stake: Decimal, prediction: Outcome, outcome: Outcome) -> Decimal {
        if prediction == outcome {
            stake * self.payout_multiplier
        } else {
            Decimal::ZERO
        }
    }

    /// Settle every wager of `round_number` against `outcome`.
    ///
    /// Failures are collected in the report rather than aborting the pass.
    pub fn settle_round(&self, round_number: u64, outcome: Outcome, now: DateTime<Utc>) -> SettlementReport {
        let wagers = self.wagers.for_round(round_number);
        let mut report = SettlementReport {
            round_number,
            outcome,
            wager_count: wagers.len(),
            settled: Vec::new(),
            skipped: 0,
            failed: Vec::new(),
            total_staked: wagers.iter().map(|w| w.stake).sum(),
            total_paid: Decimal::ZERO,
        };

        for wager in &wagers {
            match self.settle(wager, outcome, now) {
                Ok(WagerSettlement::Settled(settled)) => {
                    report.total_paid += settled.payout;
                    report.settled.push(settled);
                }
                Ok(WagerSettlement::Skipped(_)) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        round = round_number,
                        wager_id = %wager.id,
                        participant = %wager.participant_id,
                        error = %e,
                        "Wager settlement failed"
                    );
                    report.failed.push(FailedSettlement {
                        wager_id: wager.id,
                        participant_id: wager.participant_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            round = round_number,
            outcome = %outcome,
            wagers = report.wager_count,
            winners = report.winners(),
            failed = report.failed.len(),
            staked = %report.total_staked,
            paid = %report.total_paid,
            "Round settled"
        );

        report
    }

    /// Settle a single wager by id. Used by the retry queue.
    pub fn settle_wager(
        &self,
        wager_id: &Uuid,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<WagerSettlement, SettlementError> {
        let wager = self
            .wagers
            .get(wager_id)
            .ok_or(SettlementError::WagerNotFound(*wager_id))?;
        self.settle(&wager, outcome, now)
    }

    fn settle(&self, wager: &Wager, outcome: Outcome, now: DateTime<Utc>) -> Result<WagerSettlement, SettlementError> {
        if !wager.is_pending() {
            debug!(wager_id = %wager.id, result = %wager.result, "Wager already settled, skipping");
            return Ok(WagerSettlement::Skipped(wager.id));
        }

        let payout = self.payout_for(wager.stake, wager.prediction, outcome);
        let result = if payout > Decimal::ZERO {
            self.ledger
                .credit(&wager.participant_id, payout, wager.id)
                .map_err(|source| SettlementError::Ledger {
                    wager_id: wager.id,
                    source,
                })?;
            WagerResult::Won
        } else {
            WagerResult::Lost
        };

        if !self.wagers.record_result(&wager.id, result, payout, now) {
            // Another pass resolved it between our read and write; the
            // credit above was keyed by wager id so it was not re-applied.
            return Ok(WagerSettlement::Skipped(wager.id));
        }

        Ok(WagerSettlement::Settled(SettledWager {
            wager_id: wager.id,
            participant_id: wager.participant_id.clone(),
            result,
            stake: wager.stake,
            payout,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
