//! Round lifecycle: the per-table state machine and its outcomes.

pub mod controller;
pub mod error;
pub mod shoe;
pub mod types;


pub use controller::RoundController;
pub use error::RoundError;
pub use types::{
    BetVolume, CancelSummary, RoundStarted, SettleRequest, SettleSummary, ShuffleSummary,
    TableState,
};
