//! Persistence layer.
//!
//! Game state (rounds, wagers, history, retry queue, ledger accounts) is
//! snapshotted to a single JSON file. Round transitions are additionally
//! appended to a journal, see [`journal`].

pub mod journal;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::engine::scheduler::{RoundScheduler, SchedulerSnapshot};
use crate::ledger::{AccountSnapshot, InMemoryLedger};

/// Everything needed to resume after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub saved_at: DateTime<Utc>,
    pub scheduler: SchedulerSnapshot,
    pub accounts: Vec<AccountSnapshot>,
}

impl StateSnapshot {
    /// Capture scheduler and ledger state in one window.
    ///
    /// Placements are blocked while both are copied, so a stake is never
    /// exported without its wager. Settlement retries still run: a payout
    /// credited after the wagers were copied shows up as a pending wager
    /// with an applied ledger reference, which the idempotent credit turns
    /// into a no-op on retry.
    pub fn capture(scheduler: &RoundScheduler, ledger: &InMemoryLedger) -> Self {
        let (scheduler, accounts) = scheduler.snapshot_with(|| ledger.export());
        Self {
            saved_at: Utc::now(),
            scheduler,
            accounts,
        }
    }
}

/// Write a snapshot. Writes to a sibling temp file first and renames it
/// over the target so a crash never leaves a half-written snapshot.
pub fn save_snapshot(snapshot: &StateSnapshot, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialise snapshot")?;

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create snapshot dir {}", parent.display()))?;
        }
    }

    let tmp = format!("{path}.tmp");
    fs::write(&tmp, &json).with_context(|| format!("Failed to write snapshot to {tmp}"))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to move snapshot into place at {path}"))?;

    debug!(
        path,
        wagers = snapshot.scheduler.wagers.len(),
        accounts = snapshot.accounts.len(),
        "Snapshot saved"
    );
    Ok(())
}

/// Load a snapshot. Returns None if the file doesn't exist (fresh start).
pub fn load_snapshot(path: &str) -> Result<Option<StateSnapshot>> {
    if !Path::new(path).exists() {
        info!(path, "No snapshot found, starting fresh");
        return Ok(None);
    }

    let json = fs::read_to_string(path).with_context(|| format!("Failed to read snapshot from {path}"))?;
    let snapshot: StateSnapshot =
        serde_json::from_str(&json).with_context(|| format!("Failed to parse snapshot from {path}"))?;

    info!(
        path,
        saved_at = %snapshot.saved_at.to_rfc3339(),
        round = ?snapshot.scheduler.round.as_ref().map(|r| r.number),
        wagers = snapshot.scheduler.wagers.len(),
        accounts = snapshot.accounts.len(),
        "Snapshot loaded from disk"
    );
    Ok(Some(snapshot))
}

/// Delete the snapshot file (for testing or reset).
pub fn delete_snapshot(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        fs::remove_file(path).with_context(|| format!("Failed to delete snapshot {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
