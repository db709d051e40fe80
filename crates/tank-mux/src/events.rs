//! Unified event stream for the demultiplexer
//!
//! Every observable change (slot lifecycle, liveness, visibility of the
//! original service, dropped updates) is emitted through a single event
//! channel so observers see a consistent order.

use tank_protocol::TankReading;

use crate::state::{CoordinatorState, SlotId, TankKey};

/// Unified event enum for all demultiplexer activity
#[derive(Debug, Clone, PartialEq)]
pub enum RepeaterEvent {
    // -------------------------------------------------------------------------
    // Coordinator events
    // -------------------------------------------------------------------------
    /// The coordinator changed state
    StateChanged {
        /// Previous state
        from: CoordinatorState,
        /// New state
        to: CoordinatorState,
    },

    /// The incoming service was found on the bus
    SourceAvailable {
        /// Bus address of the service
        service: String,
    },

    /// The incoming service disappeared
    SourceLost {
        /// Why it is considered gone
        reason: String,
    },

    /// The original composite service was hidden from the GUI
    OriginalHidden {
        /// Bus address of the hidden service
        service: String,
    },

    /// The original composite service was made visible again
    OriginalRestored {
        /// Bus address of the restored service
        service: String,
    },

    // -------------------------------------------------------------------------
    // Slot lifecycle events
    // -------------------------------------------------------------------------
    /// A new tank was bound to a slot and its service published
    SlotCreated {
        /// Assigned slot
        slot: SlotId,
        /// Tank identity
        key: TankKey,
    },

    /// A slot's reading was republished
    SlotUpdated {
        /// Slot that was written
        slot: SlotId,
        /// Reading as published
        reading: TankReading,
    },

    /// A slot started receiving data again
    SlotConnected {
        /// Slot that reconnected
        slot: SlotId,
    },

    /// A slot stopped receiving data; its last values are kept
    SlotDisconnected {
        /// Slot that went stale
        slot: SlotId,
    },

    /// A slot was torn down and its service unpublished
    SlotRemoved {
        /// Slot that was freed
        slot: SlotId,
    },

    /// A slot's custom name changed
    CustomNameChanged {
        /// Slot renamed
        slot: SlotId,
        /// New name, empty for the default display
        name: String,
    },

    /// A slot was bound to a different tank by the operator
    SlotRemapped {
        /// Slot remapped
        slot: SlotId,
        /// New tank identity
        key: TankKey,
    },

    // -------------------------------------------------------------------------
    // Failure events
    // -------------------------------------------------------------------------
    /// A new tank could not be assigned a slot (emitted once per tank)
    CapacityExceeded {
        /// Key of the rejected tank
        key: TankKey,
    },

    /// An update was dropped without affecting any slot
    UpdateDropped {
        /// Why it was dropped
        reason: String,
    },

    /// Persisting registry state failed
    PersistenceFailed {
        /// Error message
        message: String,
    },

    /// An error occurred in a port (bus, visibility)
    Error {
        /// Source of the error
        source: String,
        /// Error message
        message: String,
    },
}

impl RepeaterEvent {
    /// Check if this is a slot lifecycle event
    pub fn is_slot_lifecycle(&self) -> bool {
        matches!(
            self,
            RepeaterEvent::SlotCreated { .. }
                | RepeaterEvent::SlotRemoved { .. }
                | RepeaterEvent::SlotRemapped { .. }
        )
    }

    /// Check if this is a liveness event
    pub fn is_liveness(&self) -> bool {
        matches!(
            self,
            RepeaterEvent::SlotConnected { .. } | RepeaterEvent::SlotDisconnected { .. }
        )
    }

    /// Check if this event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RepeaterEvent::CapacityExceeded { .. }
                | RepeaterEvent::UpdateDropped { .. }
                | RepeaterEvent::PersistenceFailed { .. }
                | RepeaterEvent::Error { .. }
        )
    }

    /// Get the slot if this event is associated with a specific slot
    pub fn slot(&self) -> Option<SlotId> {
        match self {
            RepeaterEvent::SlotCreated { slot, .. }
            | RepeaterEvent::SlotUpdated { slot, .. }
            | RepeaterEvent::SlotConnected { slot }
            | RepeaterEvent::SlotDisconnected { slot }
            | RepeaterEvent::SlotRemoved { slot }
            | RepeaterEvent::CustomNameChanged { slot, .. }
            | RepeaterEvent::SlotRemapped { slot, .. } => Some(*slot),
            _ => None,
        }
    }
}
