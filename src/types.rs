//! Shared types for the TRICOLOR game.
//!
//! These types form the data model used across all modules so that the
//! ledger, wager store, engine and API can depend on them without
//! circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The colour drawn at the close of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Red,
    Green,
    Violet,
}

impl Outcome {
    /// All known outcomes (useful for iteration).
    pub const ALL: &'static [Outcome] = &[Outcome::Red, Outcome::Green, Outcome::Violet];
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Red => write!(f, "red"),
            Outcome::Green => write!(f, "green"),
            Outcome::Violet => write!(f, "violet"),
        }
    }
}

/// Parse an outcome name (case-insensitive).
impl std::str::FromStr for Outcome {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "red" => Ok(Outcome::Red),
            "green" => Ok(Outcome::Green),
            "violet" | "purple" => Ok(Outcome::Violet),
            _ => Err(GameError::InvalidOutcome(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// Round lifecycle status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Accepting,
    Closed,
    Settled,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Accepting => write!(f, "ACCEPTING"),
            RoundStatus::Closed => write!(f, "CLOSED"),
            RoundStatus::Settled => write!(f, "SETTLED"),
        }
    }
}

/// One timed betting cycle with a single drawn outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub number: u64,
    pub opened_at: DateTime<Utc>,
    /// Scheduled end of the betting window.
    pub closes_at: DateTime<Utc>,
    pub status: RoundStatus,
    pub outcome: Option<Outcome>,
    /// When the close was actually applied (may lag `closes_at` on late ticks).
    pub closed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            Some(outcome) => write!(f, "Round #{} [{}] outcome={}", self.number, self.status, outcome),
            None => write!(f, "Round #{} [{}] closes {}", self.number, self.status, self.closes_at.to_rfc3339()),
        }
    }
}

impl Round {
    /// Open a new round at `now` lasting `duration`.
    pub fn open(number: u64, now: DateTime<Utc>, duration: chrono::Duration) -> Self {
        Self {
            number,
            opened_at: now,
            closes_at: now + duration,
            status: RoundStatus::Accepting,
            outcome: None,
            closed_at: None,
            settled_at: None,
        }
    }

    /// Whether a wager arriving at `now` falls inside the betting window.
    pub fn is_accepting_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RoundStatus::Accepting && now < self.closes_at
    }

    /// Whether the betting window has elapsed but the round is still open.
    pub fn is_due_to_close(&self, now: DateTime<Utc>) -> bool {
        self.status == RoundStatus::Accepting && now >= self.closes_at
    }

    /// Time left in the betting window, clamped at zero.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.closes_at - now).max(chrono::Duration::zero())
    }
}

// ---------------------------------------------------------------------------
// Wager
// ---------------------------------------------------------------------------

/// Settlement result of a wager. Written once, by settlement only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WagerResult {
    Pending,
    Won,
    Lost,
}

impl fmt::Display for WagerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerResult::Pending => write!(f, "PENDING"),
            WagerResult::Won => write!(f, "WON"),
            WagerResult::Lost => write!(f, "LOST"),
        }
    }
}

/// A participant's stake on a predicted outcome for a specific round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: Uuid,
    pub participant_id: String,
    pub round_number: u64,
    pub prediction: Outcome,
    pub stake: Decimal,
    /// Stake × payout multiplier, i.e. what a win would credit.
    pub potential_payout: Decimal,
    pub result: WagerResult,
    /// Amount actually credited at settlement (zero for losses).
    pub payout: Decimal,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Wager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[round #{}] {} {:.2} on {} ({}) [{}]",
            self.round_number, self.participant_id, self.stake, self.prediction, self.result, self.id,
        )
    }
}

impl Wager {
    pub fn is_pending(&self) -> bool {
        self.result == WagerResult::Pending
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Summary of a settled round, appended to the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub round_number: u64,
    pub outcome: Outcome,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub settled_at: DateTime<Utc>,
    pub wager_count: usize,
    pub total_staked: Decimal,
    pub total_paid: Decimal,
    /// Wagers whose payout failed and were handed to the retry queue.
    pub unsettled_wagers: usize,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Round #{}: {} | wagers={} staked={:.2} paid={:.2} unsettled={}",
            self.round_number,
            self.outcome,
            self.wager_count,
            self.total_staked,
            self.total_paid,
            self.unsettled_wagers,
        )
    }
}

impl HistoryEntry {
    /// Whether every wager of the round had its result written.
    pub fn is_fully_settled(&self) -> bool {
        self.unsettled_wagers == 0
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// User-facing errors returned by wager placement and queries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GameError {
    #[error("No round is accepting wagers right now")]
    NoActiveRound,

    #[error("Invalid stake: {0}")]
    InvalidStake(String),

    #[error("Invalid outcome: {0}")]
    InvalidOutcome(String),

    #[error("Insufficient funds: need {needed:.2}, have {available:.2}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),
}

impl GameError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::NoActiveRound => "NO_ACTIVE_ROUND",
            GameError::InvalidStake(_) => "INVALID_STAKE",
            GameError::InvalidOutcome(_) => "INVALID_OUTCOME",
            GameError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            GameError::LedgerUnavailable(_) => "LEDGER_UNAVAILABLE",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
