//! Staleness monitor
//!
//! Marks slots disconnected when their tank stops reporting. Slots are never
//! removed here; the GUI keeps the last values with a "no response" marker.

use std::time::{Duration, Instant};

use tracing::info;

use crate::registry::{RegistryEntry, TankRegistry};
use crate::state::SlotId;

/// Default time without data before a slot is disconnected
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(6);

/// Default period between sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline-based liveness tracking
#[derive(Debug, Clone, Copy)]
pub struct StalenessMonitor {
    deadline: Duration,
    sweep_interval: Duration,
}

impl Default for StalenessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_AFTER, DEFAULT_SWEEP_INTERVAL)
    }
}

impl StalenessMonitor {
    /// Create a monitor
    pub fn new(deadline: Duration, sweep_interval: Duration) -> Self {
        Self {
            deadline,
            sweep_interval,
        }
    }

    /// Time without data before a slot is disconnected
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Period between sweeps
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Whether an entry has missed its deadline
    pub fn is_stale(&self, entry: &RegistryEntry, now: Instant) -> bool {
        entry
            .last_seen
            .map_or(true, |seen| now.saturating_duration_since(seen) > self.deadline)
    }

    /// Disconnect every connected slot past its deadline
    ///
    /// Returns the slots that changed; already disconnected slots are not
    /// reported again.
    pub fn sweep(&self, registry: &mut TankRegistry, now: Instant) -> Vec<SlotId> {
        let stale: Vec<SlotId> = registry
            .iter()
            .filter(|e| e.connected && self.is_stale(e, now))
            .map(|e| e.slot)
            .collect();

        stale
            .into_iter()
            .filter(|slot| {
                let changed = registry.mark_disconnected(*slot);
                if changed {
                    info!("{} stopped reporting", slot);
                }
                changed
            })
            .collect()
    }

    /// Disconnect every slot at once
    pub fn disconnect_all(&self, registry: &mut TankRegistry) -> Vec<SlotId> {
        let slots: Vec<SlotId> = registry.iter().map(|e| e.slot).collect();
        slots
            .into_iter()
            .filter(|slot| registry.mark_disconnected(*slot))
            .collect()
    }
}
