//! Error types for the demultiplexer

use tank_protocol::TankPath;
use thiserror::Error;

use crate::state::{SlotId, TankKey, MAX_SLOTS};

/// Errors that can occur in the demultiplexer
///
/// None of these are fatal: each one drops a single update or degrades a
/// subset of slots while the coordinator keeps running.
#[derive(Debug, Error)]
pub enum RepeaterError {
    /// Every slot is bound to a different tank
    #[error("all {max} slots in use, ignoring new tank {key}", max = MAX_SLOTS)]
    CapacityExceeded {
        /// Key of the rejected tank
        key: TankKey,
    },

    /// The resolver could not tell which tank an update describes
    #[error("unresolved tank identity: {0}")]
    UnresolvedIdentity(String),

    /// The incoming service is gone
    #[error("incoming service unreachable: {0}")]
    SourceUnreachable(String),

    /// Update came from a service other than the bound one
    #[error("update from unbound source: {0}")]
    ForeignSource(String),

    /// No incoming service is configured
    #[error("no incoming service configured")]
    NotBound,

    /// Persisting registry state failed
    #[error("failed to persist settings: {0}")]
    PersistenceWriteFailure(String),

    /// One or more fields of an update could not be parsed
    #[error("malformed update fields: {paths:?}")]
    MalformedUpdate {
        /// Paths that failed to parse
        paths: Vec<TankPath>,
    },

    /// Slot not bound to any tank
    #[error("{0} not in use")]
    SlotNotFound(SlotId),

    /// Key already bound to another slot
    #[error("{key} already bound to {slot}")]
    KeyAlreadyBound {
        /// Key being bound
        key: TankKey,
        /// Slot currently holding it
        slot: SlotId,
    },

    /// Bus transport error
    #[error("bus error: {0}")]
    Bus(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
