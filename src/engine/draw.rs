//! Outcome drawing.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;

use crate::types::Outcome;

/// Picks the winning outcome of a round.
pub trait OutcomeDrawer: Send + Sync {
    fn draw(&self, outcomes: &[Outcome]) -> Outcome;
}

/// Uniform draw over the configured outcomes using the thread RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformDrawer;

impl OutcomeDrawer for UniformDrawer {
    fn draw(&self, outcomes: &[Outcome]) -> Outcome {
        let pool = if outcomes.is_empty() { Outcome::ALL } else { outcomes };
        pool[rand::thread_rng().gen_range(0..pool.len())]
    }
}

/// Deterministic drawer for simulations and tests.
///
/// Replays a scripted sequence, then repeats the last outcome.
pub struct ScriptedDrawer {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
}

impl ScriptedDrawer {
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> Self {
        let script: VecDeque<Outcome> = script.into_iter().collect();
        let fallback = script.back().copied().unwrap_or(Outcome::Red);
        Self {
            script: Mutex::new(script),
            fallback,
        }
    }

    /// Always draw the same outcome.
    pub fn always(outcome: Outcome) -> Self {
        Self::new([outcome])
    }
}

impl OutcomeDrawer for ScriptedDrawer {
    fn draw(&self, _outcomes: &[Outcome]) -> Outcome {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.pop_front().unwrap_or(self.fallback)
        } else {
            script.front().copied().unwrap_or(self.fallback)
        }
    }
}
