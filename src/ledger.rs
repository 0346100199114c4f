//! Balance ledger.
//!
//! Owns every participant's spendable balance. Debits and credits are
//! serialised per participant (one lock per account) while different
//! participants proceed independently. Every mutation carries a reference
//! id; applying the same reference twice for the same kind (stake or
//! payout) is a no-op, which is what makes settlement safe to retry.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::types::GameError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds for {participant}: need {needed:.2}, have {available:.2}")]
    InsufficientFunds {
        participant: String,
        needed: Decimal,
        available: Decimal,
    },

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Ledger write failed: {0}")]
    Unavailable(String),
}

impl From<LedgerError> for GameError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds { needed, available, .. } => {
                GameError::InsufficientFunds { needed, available }
            }
            LedgerError::InvalidAmount(amount) => {
                GameError::InvalidStake(format!("stake must be positive, got {amount}"))
            }
            LedgerError::Unavailable(reason) => GameError::LedgerUnavailable(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Starting balance granted when the account is first touched.
    Opening,
    /// Wager stake debited at placement.
    Stake,
    /// Winnings credited at settlement.
    Payout,
}

/// One balance movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub reference: Uuid,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Ledger trait
// ---------------------------------------------------------------------------

/// Authoritative store of participant funds.
#[cfg_attr(test, mockall::automock)]
pub trait Ledger: Send + Sync {
    /// Current balance. Unknown participants report the starting balance.
    fn balance(&self, participant: &str) -> Result<Decimal, LedgerError>;

    /// Remove `amount` if the balance covers it; returns the new balance.
    fn debit(&self, participant: &str, amount: Decimal, reference: Uuid) -> Result<Decimal, LedgerError>;

    /// Add `amount`; returns the new balance.
    fn credit(&self, participant: &str, amount: Decimal, reference: Uuid) -> Result<Decimal, LedgerError>;

    /// Balance movements for a participant, oldest first.
    fn entries(&self, participant: &str) -> Vec<LedgerEntry>;
}

// ---------------------------------------------------------------------------
// In-memory ledger
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Account {
    balance: Decimal,
    /// References are scoped by kind: a wager's stake and its payout share
    /// the wager id.
    applied: HashSet<(EntryKind, Uuid)>,
    entries: Vec<LedgerEntry>,
}

/// Persisted form of one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub participant: String,
    pub balance: Decimal,
    pub applied: Vec<(EntryKind, Uuid)>,
    pub entries: Vec<LedgerEntry>,
}

pub struct InMemoryLedger {
    starting_balance: Decimal,
    accounts: DashMap<String, Arc<Mutex<Account>>>,
}

impl InMemoryLedger {
    pub fn new(starting_balance: Decimal) -> Self {
        Self {
            starting_balance,
            accounts: DashMap::new(),
        }
    }

    pub fn starting_balance(&self) -> Decimal {
        self.starting_balance
    }

    /// Fetch the account handle, creating it with the starting balance.
    /// The map shard guard is released before the account lock is taken.
    fn account(&self, participant: &str) -> Arc<Mutex<Account>> {
        if let Some(existing) = self.accounts.get(participant) {
            return Arc::clone(existing.value());
        }
        let starting_balance = self.starting_balance;
        let handle = self
            .accounts
            .entry(participant.to_string())
            .or_insert_with(|| {
                debug!(participant, balance = %starting_balance, "Opening account");
                let mut entries = Vec::new();
                if starting_balance > Decimal::ZERO {
                    entries.push(LedgerEntry {
                        reference: Uuid::new_v4(),
                        kind: EntryKind::Opening,
                        amount: starting_balance,
                        balance_after: starting_balance,
                        timestamp: Utc::now(),
                    });
                }
                Arc::new(Mutex::new(Account {
                    balance: starting_balance,
                    applied: HashSet::new(),
                    entries,
                }))
            });
        Arc::clone(handle.value())
    }

    /// Number of accounts opened so far.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Sum of all balances.
    pub fn total_balance(&self) -> Decimal {
        self.accounts
            .iter()
            .map(|acct| acct.value().lock().balance)
            .sum()
    }

    /// Export every account for persistence.
    pub fn export(&self) -> Vec<AccountSnapshot> {
        let mut out: Vec<AccountSnapshot> = self
            .accounts
            .iter()
            .map(|acct| {
                let guard = acct.value().lock();
                AccountSnapshot {
                    participant: acct.key().clone(),
                    balance: guard.balance,
                    applied: guard.applied.iter().copied().collect(),
                    entries: guard.entries.clone(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.participant.cmp(&b.participant));
        out
    }

    /// Rebuild a ledger from persisted accounts.
    pub fn restore(starting_balance: Decimal, accounts: Vec<AccountSnapshot>) -> Self {
        let ledger = Self::new(starting_balance);
        for snap in accounts {
            ledger.accounts.insert(
                snap.participant,
                Arc::new(Mutex::new(Account {
                    balance: snap.balance,
                    applied: snap.applied.into_iter().collect(),
                    entries: snap.entries,
                })),
            );
        }
        ledger
    }
}

impl Ledger for InMemoryLedger {
    fn balance(&self, participant: &str) -> Result<Decimal, LedgerError> {
        Ok(self
            .accounts
            .get(participant)
            .map(|acct| acct.value().lock().balance)
            .unwrap_or(self.starting_balance))
    }

    fn debit(&self, participant: &str, amount: Decimal, reference: Uuid) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let handle = match self.accounts.get(participant) {
            Some(existing) => Arc::clone(existing.value()),
            // Refuse before opening so a failed debit leaves no account behind.
            None if amount > self.starting_balance => {
                return Err(LedgerError::InsufficientFunds {
                    participant: participant.to_string(),
                    needed: amount,
                    available: self.starting_balance,
                });
            }
            None => self.account(participant),
        };
        let mut acct = handle.lock();

        if acct.applied.contains(&(EntryKind::Stake, reference)) {
            debug!(participant, %reference, "Debit already applied");
            return Ok(acct.balance);
        }
        if acct.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                participant: participant.to_string(),
                needed: amount,
                available: acct.balance,
            });
        }

        acct.balance -= amount;
        let balance_after = acct.balance;
        acct.applied.insert((EntryKind::Stake, reference));
        acct.entries.push(LedgerEntry {
            reference,
            kind: EntryKind::Stake,
            amount,
            balance_after,
            timestamp: Utc::now(),
        });
        Ok(balance_after)
    }

    fn credit(&self, participant: &str, amount: Decimal, reference: Uuid) -> Result<Decimal, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        let handle = self.account(participant);
        let mut acct = handle.lock();

        if acct.applied.contains(&(EntryKind::Payout, reference)) {
            debug!(participant, %reference, "Credit already applied");
            return Ok(acct.balance);
        }

        acct.balance += amount;
        let balance_after = acct.balance;
        acct.applied.insert((EntryKind::Payout, reference));
        acct.entries.push(LedgerEntry {
            reference,
            kind: EntryKind::Payout,
            amount,
            balance_after,
            timestamp: Utc::now(),
        });
        Ok(balance_after)
    }

    fn entries(&self, participant: &str) -> Vec<LedgerEntry> {
        self.accounts
            .get(participant)
            .map(|acct| acct.value().lock().entries.clone())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
