//! Settlement retry queue.
//!
//! Wagers whose payout failed during a round's settlement wait here and
//! are retried on a separate interval, never inside the scheduler tick.
//! After `max_attempts` failed retries a wager is escalated: it stays
//! pending and is listed as an alert for an operator.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::engine::settlement::{SettlementEngine, SettlementError, WagerSettlement};
use crate::types::Outcome;

/// A wager waiting for its payout to be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryItem {
    pub wager_id: Uuid,
    pub participant_id: String,
    pub round_number: u64,
    pub outcome: Outcome,
    pub attempts: u32,
    pub last_error: String,
    pub queued_at: DateTime<Utc>,
}

/// Outcome of one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryReport {
    pub resolved: usize,
    pub still_pending: usize,
    pub escalated: usize,
}

pub struct RetryQueue {
    max_attempts: u32,
    pending: Mutex<VecDeque<RetryItem>>,
    escalated: Mutex<Vec<RetryItem>>,
}

impl RetryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            pending: Mutex::new(VecDeque::new()),
            escalated: Mutex::new(Vec::new()),
        }
    }

    /// Rebuild from persisted state.
    pub fn restore(max_attempts: u32, pending: Vec<RetryItem>, escalated: Vec<RetryItem>) -> Self {
        Self {
            max_attempts,
            pending: Mutex::new(pending.into()),
            escalated: Mutex::new(escalated),
        }
    }

    pub fn enqueue(&self, item: RetryItem) {
        let mut pending = self.pending.lock();
        if pending.iter().any(|p| p.wager_id == item.wager_id) {
            return;
        }
        info!(
            wager_id = %item.wager_id,
            round = item.round_number,
            "Queued wager for settlement retry"
        );
        pending.push_back(item);
    }

    /// Retry every queued wager once.
    ///
    /// The queue is drained before any ledger call so enqueues from a
    /// concurrent tick are not blocked behind a slow retry.
    pub fn process(&self, engine: &SettlementEngine, now: DateTime<Utc>) -> RetryReport {
        let batch: Vec<RetryItem> = self.pending.lock().drain(..).collect();
        let mut report = RetryReport::default();
        if batch.is_empty() {
            return report;
        }

        let mut requeue = Vec::new();
        let mut escalate = Vec::new();

        for mut item in batch {
            match engine.settle_wager(&item.wager_id, item.outcome, now) {
                Ok(WagerSettlement::Settled(settled)) => {
                    info!(
                        wager_id = %item.wager_id,
                        round = item.round_number,
                        result = %settled.result,
                        payout = %settled.payout,
                        attempts = item.attempts + 1,
                        "Settlement retry succeeded"
                    );
                    report.resolved += 1;
                }
                Ok(WagerSettlement::Skipped(_)) => report.resolved += 1,
                Err(e @ SettlementError::WagerNotFound(_)) => {
                    item.attempts += 1;
                    item.last_error = e.to_string();
                    escalate.push(item);
                }
                Err(e) => {
                    item.attempts += 1;
                    item.last_error = e.to_string();
                    if item.attempts >= self.max_attempts {
                        escalate.push(item);
                    } else {
                        warn!(
                            wager_id = %item.wager_id,
                            attempts = item.attempts,
                            max_attempts = self.max_attempts,
                            error = %item.last_error,
                            "Settlement retry failed"
                        );
                        requeue.push(item);
                    }
                }
            }
        }

        report.still_pending = requeue.len();
        report.escalated = escalate.len();

        if !requeue.is_empty() {
            self.pending.lock().extend(requeue);
        }
        if !escalate.is_empty() {
            for item in &escalate {
                error!(
                    wager_id = %item.wager_id,
                    participant = %item.participant_id,
                    round = item.round_number,
                    attempts = item.attempts,
                    error = %item.last_error,
                    "FATAL: wager could not be settled, operator intervention required"
                );
            }
            self.escalated.lock().extend(escalate);
        }

        report
    }

    pub fn pending(&self) -> Vec<RetryItem> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Wagers that exhausted their retries.
    pub fn escalated(&self) -> Vec<RetryItem> {
        self.escalated.lock().clone()
    }
}
