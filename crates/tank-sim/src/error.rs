//! Error types for the simulator

use tank_mux::RepeaterError;
use thiserror::Error;

/// Errors that can occur while simulating a feed
#[derive(Debug, Error)]
pub enum SimError {
    /// Tank index outside the simulated set
    #[error("no simulated tank {0}")]
    InvalidTank(usize),

    /// Level outside 0..=100 percent
    #[error("level {0} out of range")]
    LevelOutOfRange(f64),

    /// The bus rejected a registration or write
    #[error("bus error: {0}")]
    Bus(#[from] RepeaterError),
}
