//! Demultiplexer engine
//!
//! The core state machine: resolves each incoming update to a tank, binds
//! the tank to a slot, publishes the reading, and tracks the coordinator
//! state and the visibility of the original service.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tank_protocol::{decode, BusValue, RawFields, TankPath};
use tracing::{debug, info, warn};

use crate::collator::{PolledSnapshot, SignalCollator};
use crate::discovery::ServiceInfo;
use crate::error::RepeaterError;
use crate::events::RepeaterEvent;
use crate::publisher::OutputPublisher;
use crate::registry::TankRegistry;
use crate::resolver::{IdentityResolver, ResolverKind};
use crate::staleness::StalenessMonitor;
use crate::state::{CoordinatorState, FeedUpdate, IncomingServiceBinding, SlotId, TankKey};
use crate::store::PersistedState;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeaterConfig {
    /// Name prefix of the published slot services
    pub service_prefix: String,
    /// Tank identity strategy
    pub resolver: ResolverKind,
    /// Time without data before a slot is disconnected (ms)
    pub stale_after_ms: u64,
    /// Period between staleness sweeps (ms)
    pub sweep_interval_ms: u64,
}

impl Default for RepeaterConfig {
    fn default() -> Self {
        Self {
            service_prefix: "com.victronenergy.tank.repeater".to_string(),
            resolver: ResolverKind::default(),
            stale_after_ms: 6000,
            sweep_interval_ms: 1000,
        }
    }
}

impl RepeaterConfig {
    /// Staleness monitor for these settings
    pub fn staleness(&self) -> StalenessMonitor {
        StalenessMonitor::new(
            Duration::from_millis(self.stale_after_ms),
            Duration::from_millis(self.sweep_interval_ms.max(1)),
        )
    }
}

/// The demultiplexer engine
pub struct Demultiplexer {
    config: RepeaterConfig,
    state: CoordinatorState,
    binding: Option<IncomingServiceBinding>,
    resolver: Box<dyn IdentityResolver>,
    registry: TankRegistry,
    publisher: OutputPublisher,
    staleness: StalenessMonitor,
    collator: SignalCollator,
    rejected: HashSet<TankKey>,
    persist_pending: bool,
    event_buffer: Vec<RepeaterEvent>,
}

impl Demultiplexer {
    /// Create an engine, restoring slot bindings and the incoming binding
    ///
    /// A service hidden by an earlier run is taken over so that uninstall
    /// can make it visible again.
    pub fn new(
        config: RepeaterConfig,
        mut publisher: OutputPublisher,
        persisted: Option<PersistedState>,
    ) -> Self {
        let persisted = persisted.unwrap_or_default();
        let registry = TankRegistry::from_persisted(&persisted.slots);
        if !registry.is_empty() {
            info!("Restored {} tank slots", registry.len());
        }
        if let Some(service) = persisted.hidden_original {
            debug!("{} was hidden by an earlier run", service);
            publisher.adopt_hidden_original(service);
        }

        let mut engine = Self {
            resolver: config.resolver.build(),
            staleness: config.staleness(),
            config,
            state: CoordinatorState::Unbound,
            binding: None,
            registry,
            publisher,
            collator: SignalCollator::new(),
            rejected: HashSet::new(),
            persist_pending: false,
            event_buffer: Vec::new(),
        };

        if let Some(binding) = persisted.binding {
            if !binding.is_disabled() {
                engine.state = CoordinatorState::BoundIdle;
            }
            engine.binding = Some(binding);
        }
        engine
    }

    /// Get the configuration
    pub fn config(&self) -> &RepeaterConfig {
        &self.config
    }

    /// Current coordinator state
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Configured binding, including a disabled one
    pub fn binding(&self) -> Option<&IncomingServiceBinding> {
        self.binding.as_ref()
    }

    /// Slot registry
    pub fn registry(&self) -> &TankRegistry {
        &self.registry
    }

    /// Output publisher
    pub fn publisher(&self) -> &OutputPublisher {
        &self.publisher
    }

    /// Staleness settings
    pub fn staleness(&self) -> &StalenessMonitor {
        &self.staleness
    }

    /// Name of the active identity strategy
    pub fn resolver_name(&self) -> &'static str {
        self.resolver.name()
    }

    /// Configure or clear the incoming service
    ///
    /// A missing or disabled binding returns to `Unbound` and makes the
    /// original service visible again. Changing the product id disconnects
    /// every slot until the new source reports.
    pub fn set_binding(&mut self, binding: Option<IncomingServiceBinding>) {
        let enabled = binding.clone().filter(|b| !b.is_disabled());

        let Some(new) = enabled else {
            if self.state.is_bound() {
                info!("Incoming tank repeater disabled");
                self.disconnect_all();
                self.collator.unbind();
            }
            self.restore_original();
            self.binding = binding;
            self.transition(CoordinatorState::Unbound);
            self.persist_pending = true;
            return;
        };

        match self.binding.as_mut().filter(|b| !b.is_disabled()) {
            Some(current) if current.product_id == new.product_id => {
                if new.has_address() && current.service_address != new.service_address {
                    debug!("Incoming service address set to {}", new.service_address);
                    current.service_address = new.service_address;
                    self.collator.reset();
                }
            }
            _ => {
                if self.state.is_bound() {
                    info!("Incoming product id changed to {}", new.product_id);
                    self.disconnect_all();
                }
                self.collator.unbind();
                self.binding = Some(new);
                self.transition(CoordinatorState::BoundIdle);
            }
        }
        self.persist_pending = true;
    }

    /// The incoming service was found on the bus
    pub fn source_available(&mut self, service: ServiceInfo) {
        let Some(binding) = self.binding.as_mut().filter(|b| !b.is_disabled()) else {
            debug!("Ignoring {} while unbound", service.name);
            return;
        };
        if service.product_id != Some(binding.product_id) {
            warn!(
                "Ignoring {}: product id {:?} does not match {}",
                service.name, service.product_id, binding.product_id
            );
            return;
        }

        if binding.service_address != service.name {
            binding.service_address = service.name.clone();
            self.persist_pending = true;
        }
        self.collator.bind(&service.unique_name);
        info!("Incoming tank connection established at {}", service.name);
        self.event_buffer.push(RepeaterEvent::SourceAvailable {
            service: service.name,
        });
    }

    /// The incoming service disappeared
    pub fn source_lost(&mut self, reason: &str) {
        if !matches!(
            self.state,
            CoordinatorState::Active | CoordinatorState::BoundIdle
        ) {
            return;
        }
        warn!("Incoming tank unreachable: {}", reason);
        self.disconnect_all();
        self.collator.reset();
        self.event_buffer.push(RepeaterEvent::SourceLost {
            reason: reason.to_string(),
        });
        self.transition(CoordinatorState::Degraded);
    }

    /// Process one complete update from the incoming feed
    ///
    /// Returns the slot the update was published to. Errors drop this update
    /// only; the engine stays usable.
    pub fn process_update(
        &mut self,
        update: FeedUpdate,
        now: Instant,
    ) -> Result<SlotId, RepeaterError> {
        let source = match self.binding.as_mut().filter(|b| !b.is_disabled()) {
            None => return Err(self.drop_update(RepeaterError::NotBound)),
            Some(binding) if !binding.has_address() => {
                binding.service_address = update.source.clone();
                self.persist_pending = true;
                update.source.clone()
            }
            Some(binding) => binding.service_address.clone(),
        };
        if update.source != source {
            return Err(self.drop_update(RepeaterError::ForeignSource(update.source)));
        }

        let decoded = decode(&update.fields);
        if !decoded.malformed.is_empty() {
            let err = RepeaterError::MalformedUpdate {
                paths: decoded.malformed.clone(),
            };
            debug!("{}", err);
            self.event_buffer.push(RepeaterEvent::Error {
                source: "codec".to_string(),
                message: err.to_string(),
            });
        }

        let key = match self.resolver.resolve(&update.fields, &decoded.reading) {
            Ok(key) => key,
            Err(e) => return Err(self.drop_update(e)),
        };

        let slot = match self.registry.lookup_or_create(key, now) {
            Ok((slot, created)) => {
                if created {
                    self.event_buffer
                        .push(RepeaterEvent::SlotCreated { slot, key });
                    self.persist_pending = true;
                }
                slot
            }
            Err(e @ RepeaterError::CapacityExceeded { .. }) => {
                if self.rejected.insert(key) {
                    warn!("{}", e);
                    self.event_buffer
                        .push(RepeaterEvent::CapacityExceeded { key });
                }
                return Err(e);
            }
            Err(e) => return Err(self.drop_update(e)),
        };

        if !self.publisher.is_published(slot) {
            let name = self
                .registry
                .get(slot)
                .map(|e| e.custom_name.clone())
                .unwrap_or_default();
            if let Err(e) = self.publisher.create(slot, &name) {
                return Err(self.port_error("publisher", e));
            }
        }

        let base = self
            .publisher
            .last_reading(slot)
            .cloned()
            .unwrap_or_default();
        let reading = decoded.overlay(&base);
        if let Err(e) = self.publisher.publish(slot, &reading) {
            return Err(self.port_error("publisher", e));
        }
        self.event_buffer
            .push(RepeaterEvent::SlotUpdated { slot, reading });

        if self.registry.touch(slot, now)? {
            if let Err(e) = self.publisher.set_connected(slot, true) {
                self.port_error("publisher", e);
            }
            info!("{} is responding", slot);
            self.event_buffer.push(RepeaterEvent::SlotConnected { slot });
        }

        self.transition(CoordinatorState::Active);
        if self.publisher.original_hidden() != Some(source.as_str()) {
            match self.publisher.hide_original(&source) {
                Ok(_) => {
                    self.event_buffer
                        .push(RepeaterEvent::OriginalHidden { service: source });
                    self.persist_pending = true;
                }
                Err(e) => {
                    self.port_error("visibility", e);
                }
            }
        }

        Ok(slot)
    }

    /// Process one property-change signal from the incoming feed
    ///
    /// Returns `None` while the collator is still gathering the tank.
    pub fn process_signal(
        &mut self,
        sender: &str,
        path: TankPath,
        value: &BusValue,
        now: Instant,
    ) -> Option<Result<SlotId, RepeaterError>> {
        let fields = self.collator.on_signal(sender, path, value)?;
        Some(self.process_collated(fields, now))
    }

    /// Process one polled read of the incoming feed
    pub fn process_poll(
        &mut self,
        poll: PolledSnapshot,
        now: Instant,
    ) -> Option<Result<SlotId, RepeaterError>> {
        let fields = self.collator.on_poll(poll)?;
        Some(self.process_collated(fields, now))
    }

    /// Disconnect slots that missed their deadline
    pub fn sweep(&mut self, now: Instant) -> Vec<SlotId> {
        let stale = self.staleness.sweep(&mut self.registry, now);
        for slot in &stale {
            self.publish_disconnected(*slot);
        }
        stale
    }

    /// Set a slot's display name
    pub fn set_custom_name(&mut self, slot: SlotId, name: &str) -> Result<(), RepeaterError> {
        self.registry.set_custom_name(slot, name)?;
        let name = self
            .registry
            .get(slot)
            .map(|e| e.custom_name.clone())
            .unwrap_or_default();
        if self.publisher.is_published(slot) {
            self.publisher.set_custom_name(slot, &name)?;
        }
        self.event_buffer
            .push(RepeaterEvent::CustomNameChanged { slot, name });
        self.persist_pending = true;
        Ok(())
    }

    /// Bind a slot to a different tank
    pub fn remap_slot(&mut self, slot: SlotId, key: TankKey) -> Result<(), RepeaterError> {
        self.registry.remap(slot, key)?;
        if self.publisher.is_published(slot) {
            self.publisher.reset_reading(slot)?;
            self.publisher.set_connected(slot, false)?;
        }
        self.rejected.remove(&key);
        info!("{} remapped to {}", slot, key);
        self.event_buffer
            .push(RepeaterEvent::SlotRemapped { slot, key });
        self.persist_pending = true;
        Ok(())
    }

    /// Unbind a slot and unpublish its service
    ///
    /// The binding is kept when the service cannot be unpublished.
    pub fn remove_slot(&mut self, slot: SlotId) -> Result<(), RepeaterError> {
        if self.registry.get(slot).is_none() {
            return Err(RepeaterError::SlotNotFound(slot));
        }
        self.publisher.teardown(slot)?;
        let entry = self
            .registry
            .remove(slot)
            .ok_or(RepeaterError::SlotNotFound(slot))?;
        info!("Removed {} ({})", slot, entry.key);
        self.rejected.clear();
        self.event_buffer.push(RepeaterEvent::SlotRemoved { slot });
        self.persist_pending = true;
        Ok(())
    }

    /// Reverse everything the repeater published
    ///
    /// Restores the original service, unpublishes every slot and forgets all
    /// bindings. A later binding starts again from slot 0.
    pub fn uninstall(&mut self) {
        info!("Uninstalling tank repeater");
        self.restore_original();

        let slots: Vec<SlotId> = self.registry.iter().map(|e| e.slot).collect();
        for slot in slots {
            if let Err(e) = self.publisher.teardown(slot) {
                self.port_error("publisher", e);
            }
            self.event_buffer.push(RepeaterEvent::SlotRemoved { slot });
        }

        self.registry.clear();
        self.resolver.reset();
        self.collator.unbind();
        self.rejected.clear();
        self.binding = None;
        self.transition(CoordinatorState::Unbound);
        self.persist_pending = true;
    }

    /// Current persistable state
    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            binding: self.binding.clone(),
            slots: self.registry.to_persisted(),
            hidden_original: self.publisher.original_hidden().map(str::to_string),
        }
    }

    /// Take the pending persistence request, if any
    pub fn take_persist_request(&mut self) -> Option<PersistedState> {
        if !self.persist_pending {
            return None;
        }
        self.persist_pending = false;
        Some(self.persisted_state())
    }

    /// Request persistence again, e.g. after a rejected hand-off
    pub fn mark_persist_pending(&mut self) {
        self.persist_pending = true;
    }

    /// Drain all pending events
    pub fn drain_events(&mut self) -> Vec<RepeaterEvent> {
        std::mem::take(&mut self.event_buffer)
    }

    fn process_collated(
        &mut self,
        fields: RawFields,
        now: Instant,
    ) -> Result<SlotId, RepeaterError> {
        let source = self
            .binding
            .as_ref()
            .filter(|b| !b.is_disabled())
            .map(|b| b.service_address.clone())
            .ok_or(RepeaterError::NotBound)?;
        self.process_update(FeedUpdate::new(source, fields), now)
    }

    fn restore_original(&mut self) {
        match self.publisher.restore_original() {
            Ok(Some(service)) => {
                self.event_buffer
                    .push(RepeaterEvent::OriginalRestored { service });
                self.persist_pending = true;
            }
            Ok(None) => {}
            Err(e) => {
                self.port_error("visibility", e);
            }
        }
    }

    fn transition(&mut self, to: CoordinatorState) {
        if self.state == to {
            return;
        }
        info!("State {} -> {}", self.state.name(), to.name());
        self.event_buffer.push(RepeaterEvent::StateChanged {
            from: self.state,
            to,
        });
        self.state = to;
    }

    fn disconnect_all(&mut self) {
        let slots = self.staleness.disconnect_all(&mut self.registry);
        for slot in slots {
            self.publish_disconnected(slot);
        }
    }

    fn publish_disconnected(&mut self, slot: SlotId) {
        if self.publisher.is_published(slot) {
            if let Err(e) = self.publisher.set_connected(slot, false) {
                self.port_error("publisher", e);
            }
        }
        self.event_buffer
            .push(RepeaterEvent::SlotDisconnected { slot });
    }

    fn drop_update(&mut self, err: RepeaterError) -> RepeaterError {
        debug!("Dropping update: {}", err);
        self.event_buffer.push(RepeaterEvent::UpdateDropped {
            reason: err.to_string(),
        });
        err
    }

    fn port_error(&mut self, source: &str, err: RepeaterError) -> RepeaterError {
        warn!("{} error: {}", source, err);
        self.event_buffer.push(RepeaterEvent::Error {
            source: source.to_string(),
            message: err.to_string(),
        });
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::bus::{MemoryBus, ServiceBus, VisibilityPort};
    use crate::state::DISABLED_PRODUCT_ID;

    const FEED: &str = "com.victronenergy.tank.n2k";

    fn setup() -> (Arc<MemoryBus>, Demultiplexer) {
        let bus = Arc::new(MemoryBus::new());
        let config = RepeaterConfig::default();
        let publisher = OutputPublisher::new(bus.clone(), bus.clone(), &config.service_prefix);
        let mut demux = Demultiplexer::new(config, publisher, None);
        demux.set_binding(Some(IncomingServiceBinding::new(FEED, 41312)));
        (bus, demux)
    }

    fn tank(fluid: i64, level: f64) -> FeedUpdate {
        FeedUpdate::new(
            FEED,
            RawFields::new()
                .with(TankPath::FluidType, fluid)
                .with(TankPath::Level, level)
                .with(TankPath::Capacity, 0.2),
        )
    }

    #[test]
    fn test_new_engine_is_unbound() {
        let bus = Arc::new(MemoryBus::new());
        let publisher = OutputPublisher::new(bus.clone(), bus, "r");
        let demux = Demultiplexer::new(RepeaterConfig::default(), publisher, None);
        assert_eq!(demux.state(), CoordinatorState::Unbound);
        assert_eq!(demux.resolver_name(), "fluid-type");
    }

    #[test]
    fn test_unbound_drops_updates() {
        let bus = Arc::new(MemoryBus::new());
        let publisher = OutputPublisher::new(bus.clone(), bus.clone(), "r");
        let mut demux = Demultiplexer::new(RepeaterConfig::default(), publisher, None);
        let err = demux.process_update(tank(0, 50.0), Instant::now()).unwrap_err();
        assert!(matches!(err, RepeaterError::NotBound));
        assert!(bus.service_names().is_empty());
    }

    #[test]
    fn test_first_update_activates_and_hides() {
        let (bus, mut demux) = setup();
        assert_eq!(demux.state(), CoordinatorState::BoundIdle);

        let slot = demux.process_update(tank(1, 60.0), Instant::now()).unwrap();
        assert_eq!(slot.index(), 0);
        assert_eq!(demux.state(), CoordinatorState::Active);
        assert!(bus.is_hidden(FEED));

        let name = demux.publisher().service_name(slot);
        assert_eq!(bus.value(&name, "/Level"), Some(BusValue::Double(60.0)));
        assert_eq!(bus.value(&name, "/Connected"), Some(BusValue::Int(1)));
    }

    #[test]
    fn test_foreign_source_rejected() {
        let (_bus, mut demux) = setup();
        let mut update = tank(0, 10.0);
        update.source = "com.victronenergy.tank.other".into();
        assert!(matches!(
            demux.process_update(update, Instant::now()),
            Err(RepeaterError::ForeignSource(_))
        ));
        assert!(demux.registry().is_empty());
    }

    #[test]
    fn test_address_adopted_from_first_update() {
        let bus = Arc::new(MemoryBus::new());
        let publisher = OutputPublisher::new(bus.clone(), bus, "r");
        let mut demux = Demultiplexer::new(RepeaterConfig::default(), publisher, None);
        demux.set_binding(Some(IncomingServiceBinding::for_product(41312)));
        demux.process_update(tank(0, 10.0), Instant::now()).unwrap();
        assert_eq!(demux.binding().unwrap().service_address, FEED);
    }

    #[test]
    fn test_malformed_field_keeps_last_value() {
        let (bus, mut demux) = setup();
        let now = Instant::now();
        let slot = demux.process_update(tank(2, 40.0), now).unwrap();

        let bad = FeedUpdate::new(
            FEED,
            RawFields::new()
                .with(TankPath::FluidType, 2i64)
                .with(TankPath::Level, "n/a")
                .with(TankPath::Capacity, 0.3),
        );
        assert_eq!(demux.process_update(bad, now).unwrap(), slot);

        let name = demux.publisher().service_name(slot);
        assert_eq!(bus.value(&name, "/Level"), Some(BusValue::Double(40.0)));
        assert_eq!(bus.value(&name, "/Capacity"), Some(BusValue::Double(0.3)));
    }

    #[test]
    fn test_disable_returns_to_unbound() {
        let (bus, mut demux) = setup();
        let now = Instant::now();
        let slot = demux.process_update(tank(0, 50.0), now).unwrap();
        assert!(bus.is_hidden(FEED));
        demux.drain_events();

        demux.set_binding(Some(IncomingServiceBinding::for_product(DISABLED_PRODUCT_ID)));
        assert_eq!(demux.state(), CoordinatorState::Unbound);
        assert!(!demux.registry().get(slot).unwrap().connected);
        // A disabled repeater must not keep the original out of sight
        assert!(!bus.is_hidden(FEED));
        assert_eq!(demux.publisher().original_hidden(), None);
        assert!(demux.drain_events().contains(&RepeaterEvent::OriginalRestored {
            service: FEED.to_string()
        }));
        // The disabled setting itself is persisted
        let persisted = demux.take_persist_request().unwrap();
        assert_eq!(persisted.binding.unwrap().product_id, DISABLED_PRODUCT_ID);
        assert_eq!(persisted.hidden_original, None);
    }

    #[test]
    fn test_hidden_original_is_persisted() {
        let (_bus, mut demux) = setup();
        demux.take_persist_request();
        demux.process_update(tank(0, 50.0), Instant::now()).unwrap();
        let persisted = demux.take_persist_request().unwrap();
        assert_eq!(persisted.hidden_original.as_deref(), Some(FEED));
    }

    #[test]
    fn test_new_engine_adopts_hidden_original() {
        let bus = Arc::new(MemoryBus::new());
        bus.hide(FEED).unwrap();
        let publisher = OutputPublisher::new(bus.clone(), bus.clone(), "r");
        let persisted = PersistedState {
            binding: Some(IncomingServiceBinding::new(FEED, 41312)),
            hidden_original: Some(FEED.to_string()),
            ..Default::default()
        };
        let mut demux = Demultiplexer::new(RepeaterConfig::default(), publisher, Some(persisted));
        assert_eq!(demux.publisher().original_hidden(), Some(FEED));

        // Already hidden, so the first update does not hide it again
        demux.process_update(tank(0, 50.0), Instant::now()).unwrap();
        assert!(!demux
            .drain_events()
            .iter()
            .any(|e| matches!(e, RepeaterEvent::OriginalHidden { .. })));

        demux.uninstall();
        assert!(!bus.is_hidden(FEED));
    }

    #[test]
    fn test_source_lost_and_back() {
        let (_bus, mut demux) = setup();
        let now = Instant::now();
        let slot = demux.process_update(tank(0, 50.0), now).unwrap();
        demux.drain_events();

        demux.source_lost("gone");
        assert_eq!(demux.state(), CoordinatorState::Degraded);
        assert!(!demux.registry().get(slot).unwrap().connected);
        assert!(demux
            .drain_events()
            .contains(&RepeaterEvent::SlotDisconnected { slot }));

        assert_eq!(demux.process_update(tank(0, 48.0), now).unwrap(), slot);
        assert_eq!(demux.state(), CoordinatorState::Active);
    }

    #[test]
    fn test_signals_flow_through_collator() {
        let (bus, mut demux) = setup();
        let now = Instant::now();
        demux.source_available(ServiceInfo {
            name: FEED.into(),
            unique_name: ":1.9".into(),
            product_id: Some(41312),
        });

        assert!(demux
            .process_signal(":1.9", TankPath::FluidType, &BusValue::Int(5), now)
            .is_none());
        demux.process_signal(":1.9", TankPath::Level, &BusValue::Double(33.0), now);
        let slot = demux
            .process_signal(":1.9", TankPath::FluidType, &BusValue::Int(1), now)
            .unwrap()
            .unwrap();

        let name = demux.publisher().service_name(slot);
        assert_eq!(bus.value(&name, "/FluidType"), Some(BusValue::Int(5)));
        assert_eq!(bus.value(&name, "/Level"), Some(BusValue::Double(33.0)));
    }

    fn feed_at(unique_name: &str) -> ServiceInfo {
        ServiceInfo {
            name: FEED.into(),
            unique_name: unique_name.into(),
            product_id: Some(41312),
        }
    }

    #[test]
    fn test_address_change_keeps_signal_sender() {
        let (bus, mut demux) = setup();
        let now = Instant::now();
        demux.source_available(feed_at(":1.9"));
        demux.process_signal(":1.9", TankPath::FluidType, &BusValue::Int(5), now);

        let moved = "com.victronenergy.tank.n2k_moved";
        demux.set_binding(Some(IncomingServiceBinding::new(moved, 41312)));
        assert_eq!(demux.binding().unwrap().service_address, moved);
        assert_eq!(demux.state(), CoordinatorState::BoundIdle);

        // Collected values are dropped but the sender is still accepted
        assert!(demux
            .process_signal(":1.9", TankPath::FluidType, &BusValue::Int(1), now)
            .is_none());
        demux.process_signal(":1.9", TankPath::Level, &BusValue::Double(12.0), now);
        let slot = demux
            .process_signal(":1.9", TankPath::FluidType, &BusValue::Int(2), now)
            .unwrap()
            .unwrap();
        let name = demux.publisher().service_name(slot);
        assert_eq!(bus.value(&name, "/FluidType"), Some(BusValue::Int(1)));
        assert_eq!(bus.value(&name, "/Level"), Some(BusValue::Double(12.0)));
    }

    #[test]
    fn test_torn_poll_dropped_clean_poll_published() {
        let (bus, mut demux) = setup();
        let now = Instant::now();
        demux.source_available(feed_at(":1.9"));

        let torn = PolledSnapshot {
            fluid: Some(1),
            level: Some(70.0),
            capacity: Some(0.2),
            fluid_again: Some(2),
        };
        assert!(demux.process_poll(torn, now).is_none());
        assert!(demux.registry().is_empty());

        let clean = PolledSnapshot {
            fluid_again: Some(1),
            ..torn
        };
        let slot = demux.process_poll(clean, now).unwrap().unwrap();
        let name = demux.publisher().service_name(slot);
        assert_eq!(bus.value(&name, "/FluidType"), Some(BusValue::Int(1)));
        assert_eq!(bus.value(&name, "/Level"), Some(BusValue::Double(70.0)));
    }

    #[test]
    fn test_polls_ignored_before_source_found() {
        let (_bus, mut demux) = setup();
        let poll = PolledSnapshot {
            fluid: Some(1),
            level: Some(70.0),
            capacity: None,
            fluid_again: Some(1),
        };
        assert!(demux.process_poll(poll, Instant::now()).is_none());
    }

    #[test]
    fn test_polled_level_fills_missing_level_signals() {
        let (bus, mut demux) = setup();
        let now = Instant::now();
        demux.source_available(feed_at(":1.9"));
        demux.process_signal(":1.9", TankPath::FluidType, &BusValue::Int(1), now);

        // Every read is torn, so only the fallback can carry the level
        let torn = PolledSnapshot {
            fluid: Some(1),
            level: Some(45.0),
            capacity: None,
            fluid_again: Some(3),
        };
        for _ in 0..11 {
            assert!(demux.process_poll(torn, now).is_none());
        }

        let slot = demux
            .process_signal(":1.9", TankPath::FluidType, &BusValue::Int(2), now)
            .unwrap()
            .unwrap();
        let name = demux.publisher().service_name(slot);
        assert_eq!(bus.value(&name, "/FluidType"), Some(BusValue::Int(1)));
        assert_eq!(bus.value(&name, "/Level"), Some(BusValue::Double(45.0)));
    }

    #[test]
    fn test_remove_slot_keeps_binding_when_teardown_fails() {
        let (bus, mut demux) = setup();
        let slot = demux.process_update(tank(0, 50.0), Instant::now()).unwrap();
        let name = demux.publisher().service_name(slot);

        // The service vanished behind the publisher's back
        bus.unregister_service(&name).unwrap();
        assert!(demux.remove_slot(slot).is_err());
        assert!(demux.registry().get(slot).is_some());
        assert!(demux.publisher().is_published(slot));

        let other = SlotId::new(5).unwrap();
        assert!(matches!(
            demux.remove_slot(other),
            Err(RepeaterError::SlotNotFound(_))
        ));
    }

    #[test]
    fn test_source_with_wrong_product_ignored() {
        let (_bus, mut demux) = setup();
        demux.drain_events();
        demux.source_available(ServiceInfo {
            name: "com.victronenergy.tank.x".into(),
            unique_name: ":1.3".into(),
            product_id: Some(1),
        });
        assert!(demux.drain_events().is_empty());
        assert_eq!(demux.binding().unwrap().service_address, FEED);
    }

    #[test]
    fn test_persist_request_after_new_slot() {
        let (_bus, mut demux) = setup();
        demux.take_persist_request();
        demux.process_update(tank(0, 50.0), Instant::now()).unwrap();
        let persisted = demux.take_persist_request().unwrap();
        assert_eq!(persisted.slots.len(), 1);
        assert!(demux.take_persist_request().is_none());

        // Plain updates of a known tank do not persist
        demux.process_update(tank(0, 49.0), Instant::now()).unwrap();
        assert!(demux.take_persist_request().is_none());
    }
}
