//! Tank Feed Demultiplexer Engine
//!
//! This crate provides the core logic for splitting one composite tank
//! service, which cycles several physical tanks through a single set of
//! attribute paths, into one stable service per tank.
//!
//! # Architecture
//!
//! An incoming update flows through a fixed pipeline:
//!
//! - **Resolver**: decides which physical tank the update describes
//!   ([`TankKey`])
//! - **Registry**: maps the key to one of 14 fixed output slots, persisted
//!   across restarts
//! - **Publisher**: writes the reading to the slot's own bus service in a
//!   single batch and owns the visibility of the original service
//! - **Staleness**: marks slots disconnected when their tank stops
//!   reporting, without removing them
//!
//! The [`Demultiplexer`] wires these together as a synchronous state
//! machine. [`run_repeater_actor`] drives it from a single command queue so
//! updates, configuration changes, staleness sweeps and uninstall never
//! interleave.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use tank_mux::{
//!     Demultiplexer, FeedUpdate, IncomingServiceBinding, MemoryBus, OutputPublisher,
//!     RepeaterConfig,
//! };
//! use tank_protocol::{RawFields, TankPath};
//!
//! let bus = Arc::new(MemoryBus::new());
//! let config = RepeaterConfig::default();
//! let publisher = OutputPublisher::new(bus.clone(), bus.clone(), &config.service_prefix);
//! let mut demux = Demultiplexer::new(config, publisher, None);
//!
//! demux.set_binding(Some(IncomingServiceBinding::new("com.victronenergy.tank.n2k", 41312)));
//!
//! let fields = RawFields::new()
//!     .with(TankPath::FluidType, 1i64)
//!     .with(TankPath::Level, 80.0);
//! let slot = demux
//!     .process_update(FeedUpdate::new("com.victronenergy.tank.n2k", fields), Instant::now())
//!     .unwrap();
//! assert_eq!(slot.index(), 0);
//! ```

pub mod actor;
pub mod bus;
pub mod collator;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod publisher;
pub mod registry;
pub mod resolver;
pub mod staleness;
pub mod state;
pub mod store;

// Re-export actor types
pub use actor::{feed_update, run_repeater_actor, RepeaterCommand, SlotSummary};

// Re-export port types
pub use bus::{ItemBatch, MemoryBus, ServiceBus, VisibilityPort};
pub use discovery::{
    find_incoming_service, poll_service, run_source_watcher, BusDirectory, ServiceInfo,
};
pub use store::{
    run_persistence_writer, JsonFileStore, MemoryStore, PersistedSlot, PersistedState,
    SettingsStore,
};

// Re-export engine types
pub use collator::{PolledSnapshot, SignalCollator};
pub use engine::{Demultiplexer, RepeaterConfig};
pub use error::RepeaterError;
pub use events::RepeaterEvent;
pub use publisher::{OutputPublisher, PublishedTankService};
pub use registry::{RegistryEntry, TankRegistry};
pub use resolver::{
    FingerprintResolver, FluidTypeResolver, IdentityResolver, InstanceResolver, ResolverKind,
};
pub use staleness::StalenessMonitor;
pub use state::{
    CoordinatorState, FeedUpdate, IncomingServiceBinding, SlotId, TankKey, DEFAULT_PRODUCT_ID,
    DISABLED_PRODUCT_ID, MAX_SLOTS,
};
