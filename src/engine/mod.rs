//! Game engine: round scheduling, outcome drawing, settlement and payout
//! retries.

pub mod draw;
pub mod retry;
pub mod scheduler;
pub mod settlement;

pub use scheduler::{RoundEvent, RoundScheduler, SchedulerSnapshot, TickReport};
