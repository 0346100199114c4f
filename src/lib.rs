//! TRICOLOR: round-based colour prediction game engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod ledger;
pub mod wagers;
pub mod history;
pub mod engine;
pub mod storage;
pub mod api;
