//! Wager store.
//!
//! Holds every wager indexed by round and by participant. A wager is
//! immutable after insertion except for its settlement result, which
//! `record_result` writes at most once.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::{Wager, WagerResult};

#[derive(Default)]
struct Inner {
    wagers: HashMap<Uuid, Wager>,
    by_round: HashMap<u64, Vec<Uuid>>,
    by_participant: HashMap<String, Vec<Uuid>>,
}

#[derive(Default)]
pub struct WagerStore {
    inner: RwLock<Inner>,
}

impl WagerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted wagers (in placement order).
    pub fn from_wagers(wagers: Vec<Wager>) -> Self {
        let store = Self::new();
        for wager in wagers {
            store.insert(wager);
        }
        store
    }

    pub(crate) fn insert(&self, wager: Wager) {
        let mut inner = self.inner.write();
        inner.by_round.entry(wager.round_number).or_default().push(wager.id);
        inner
            .by_participant
            .entry(wager.participant_id.clone())
            .or_default()
            .push(wager.id);
        inner.wagers.insert(wager.id, wager);
    }

    pub fn get(&self, id: &Uuid) -> Option<Wager> {
        self.inner.read().wagers.get(id).cloned()
    }

    /// Wagers of a round, in placement order.
    pub fn for_round(&self, round_number: u64) -> Vec<Wager> {
        let inner = self.inner.read();
        inner
            .by_round
            .get(&round_number)
            .map(|ids| ids.iter().filter_map(|id| inner.wagers.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// A participant's wagers, most recent first.
    pub fn for_participant(&self, participant: &str) -> Vec<Wager> {
        let inner = self.inner.read();
        inner
            .by_participant
            .get(participant)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| inner.wagers.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Write a wager's settlement result.
    ///
    /// Returns `false` (and changes nothing) when the wager is unknown or
    /// already resolved.
    pub(crate) fn record_result(
        &self,
        id: &Uuid,
        result: WagerResult,
        payout: Decimal,
        settled_at: DateTime<Utc>,
    ) -> bool {
        let mut inner = self.inner.write();
        match inner.wagers.get_mut(id) {
            Some(wager) if wager.is_pending() && result != WagerResult::Pending => {
                wager.result = result;
                wager.payout = payout;
                wager.settled_at = Some(settled_at);
                true
            }
            _ => false,
        }
    }

    /// Pending wagers of a round.
    pub fn pending_for_round(&self, round_number: u64) -> Vec<Wager> {
        self.for_round(round_number)
            .into_iter()
            .filter(Wager::is_pending)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().wagers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All wagers ordered by round then placement, for persistence.
    pub fn export(&self) -> Vec<Wager> {
        let inner = self.inner.read();
        let mut rounds: Vec<&u64> = inner.by_round.keys().collect();
        rounds.sort();
        rounds
            .into_iter()
            .flat_map(|r| inner.by_round[r].iter())
            .filter_map(|id| inner.wagers.get(id).cloned())
            .collect()
    }
}
