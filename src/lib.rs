//! Round lifecycle and settlement engine for live-dealer casino tables.

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod db;
pub mod game;
pub mod jobs;
pub mod ledger;
pub mod lock;
pub mod round;
pub mod server;
pub mod tokio_tools;
pub mod wallet;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::EngineConfig;
pub use round::{RoundController, RoundError};
