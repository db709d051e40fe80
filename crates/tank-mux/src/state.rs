//! Core identifiers and coordinator state

use std::fmt;

use serde::{Deserialize, Serialize};
use tank_protocol::RawFields;

/// Number of output slots
pub const MAX_SLOTS: usize = 14;

/// Default product id of the incoming composite tank service
pub const DEFAULT_PRODUCT_ID: i64 = 41312;

/// Product id value that disables the repeater
pub const DISABLED_PRODUCT_ID: i64 = -1;

/// One of the fixed output positions, each backing one published tank service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(u8);

impl SlotId {
    /// Create a slot id, `None` when out of range
    pub fn new(index: usize) -> Option<Self> {
        (index < MAX_SLOTS).then(|| Self(index as u8))
    }

    /// Zero-based slot index
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Iterate over every slot in order
    pub fn all() -> impl Iterator<Item = SlotId> {
        (0..MAX_SLOTS as u8).map(SlotId)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Resolved stable identity of a physical tank within the incoming feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TankKey {
    /// Explicit per-reading instance/channel number
    Instance(u32),
    /// One tank per fluid type, keyed by the fluid code
    Fluid(i64),
    /// Best-effort fingerprint: fluid code plus first-seen order among
    /// tanks of that fluid
    Fingerprint { fluid: i64, ordinal: u32 },
}

impl fmt::Display for TankKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(n) => write!(f, "instance {}", n),
            Self::Fluid(code) => write!(f, "fluid {}", code),
            Self::Fingerprint { fluid, ordinal } => write!(f, "fluid {} #{}", fluid, ordinal),
        }
    }
}

/// Configured source of the composite feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingServiceBinding {
    /// Bus address of the incoming service; empty until discovered
    #[serde(default)]
    pub service_address: String,
    /// Product id used to find and validate the incoming service
    pub product_id: i64,
}

impl IncomingServiceBinding {
    /// Create a binding
    pub fn new(service_address: impl Into<String>, product_id: i64) -> Self {
        Self {
            service_address: service_address.into(),
            product_id,
        }
    }

    /// Binding that only knows the product id; the address is discovered
    pub fn for_product(product_id: i64) -> Self {
        Self::new(String::new(), product_id)
    }

    /// Whether this binding disables the repeater
    pub fn is_disabled(&self) -> bool {
        self.product_id == DISABLED_PRODUCT_ID
    }

    /// Whether the service address is known
    pub fn has_address(&self) -> bool {
        !self.service_address.is_empty()
    }
}

impl Default for IncomingServiceBinding {
    fn default() -> Self {
        Self::for_product(DEFAULT_PRODUCT_ID)
    }
}

/// One update batch from the incoming feed
#[derive(Debug, Clone, PartialEq)]
pub struct FeedUpdate {
    /// Bus address of the service that produced the update
    pub source: String,
    /// Raw attribute values
    pub fields: RawFields,
}

impl FeedUpdate {
    /// Create an update
    pub fn new(source: impl Into<String>, fields: RawFields) -> Self {
        Self {
            source: source.into(),
            fields,
        }
    }
}

/// Demultiplexer coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CoordinatorState {
    /// No incoming service configured
    #[default]
    Unbound,
    /// Configured, feed not yet observed
    BoundIdle,
    /// At least one update processed
    Active,
    /// Configured but the incoming service is unreachable
    Degraded,
}

impl CoordinatorState {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unbound => "Unbound",
            Self::BoundIdle => "Bound (idle)",
            Self::Active => "Active",
            Self::Degraded => "Degraded",
        }
    }

    /// Whether a binding is configured
    pub fn is_bound(&self) -> bool {
        !matches!(self, Self::Unbound)
    }
}
