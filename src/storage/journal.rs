//! Round transition journal.
//!
//! Every round transition is recorded before it takes effect for wager
//! acceptance. The file journal appends one JSON object per line.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::types::{Outcome, RoundStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTransition {
    pub round_number: u64,
    pub status: RoundStatus,
    pub outcome: Option<Outcome>,
    pub at: DateTime<Utc>,
}

pub trait TransitionJournal: Send + Sync {
    fn record(&self, transition: &RoundTransition) -> Result<()>;
}

/// JSON-lines journal on disk.
pub struct FileJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every recorded transition, oldest first.
    pub fn read_all(&self) -> Result<Vec<RoundTransition>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read journal {}", self.path.display()))?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Corrupt journal entry {} in {}", i + 1, self.path.display()))
            })
            .collect()
    }
}

impl TransitionJournal for FileJournal {
    fn record(&self, transition: &RoundTransition) -> Result<()> {
        let line = serde_json::to_string(transition).context("Failed to serialise transition")?;
        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create journal dir {}", parent.display()))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open journal {}", self.path.display()))?;
        writeln!(file, "{line}").context("Failed to append to journal")?;
        file.sync_data().context("Failed to sync journal")?;
        Ok(())
    }
}

/// In-memory journal. Can be switched into a failing state to exercise
/// fail-stop behaviour.
#[derive(Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<RoundTransition>>,
    failing: Mutex<bool>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn entries(&self) -> Vec<RoundTransition> {
        self.entries.lock().clone()
    }
}

impl TransitionJournal for MemoryJournal {
    fn record(&self, transition: &RoundTransition) -> Result<()> {
        if *self.failing.lock() {
            return Err(anyhow!("journal unavailable"));
        }
        self.entries.lock().push(transition.clone());
        Ok(())
    }
}
