//! Output publisher
//!
//! Owns one bus service per bound slot and the visibility of the original
//! composite service.

use std::sync::Arc;

use tank_protocol::{encode_for_publish, BusValue, TankPath, TankReading};
use tracing::{debug, info};

use crate::bus::{ItemBatch, ServiceBus, VisibilityPort};
use crate::error::RepeaterError;
use crate::state::{SlotId, MAX_SLOTS};

const PROCESS_NAME: &str = "tank-repeater";
const PRODUCT_NAME: &str = "NMEA2000 Multiple Tank";

/// Local view of one published slot service
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedTankService {
    /// Slot backing this service
    pub slot: SlotId,
    /// Bus name of the service
    pub service_name: String,
    /// Last reading written
    pub reading: TankReading,
    /// Last value written to `/Connected`
    pub connected: bool,
    /// Last value written to `/CustomName`
    pub custom_name: String,
}

/// Publisher for the per-slot services
pub struct OutputPublisher {
    bus: Arc<dyn ServiceBus>,
    visibility: Arc<dyn VisibilityPort>,
    prefix: String,
    services: [Option<PublishedTankService>; MAX_SLOTS],
    hidden_original: Option<String>,
}

impl OutputPublisher {
    /// Create a publisher naming services `<prefix>_<slot>`
    pub fn new(
        bus: Arc<dyn ServiceBus>,
        visibility: Arc<dyn VisibilityPort>,
        prefix: &str,
    ) -> Self {
        Self {
            bus,
            visibility,
            prefix: prefix.to_string(),
            services: Default::default(),
            hidden_original: None,
        }
    }

    /// Service name for a slot
    pub fn service_name(&self, slot: SlotId) -> String {
        format!("{}_{}", self.prefix, slot.index())
    }

    /// Register the service for a slot
    ///
    /// The service starts disconnected with every reading path invalid.
    pub fn create(&mut self, slot: SlotId, custom_name: &str) -> Result<(), RepeaterError> {
        let name = self.service_name(slot);
        if self.services[slot.index()].is_some() {
            return Err(RepeaterError::Bus(format!("{} already published", name)));
        }

        let mut initial: ItemBatch = vec![
            ("/Mgmt/ProcessName".into(), PROCESS_NAME.into()),
            ("/Mgmt/ProcessVersion".into(), env!("CARGO_PKG_VERSION").into()),
            ("/Mgmt/Connection".into(), "dBus".into()),
            ("/DeviceInstance".into(), BusValue::Int(slot.index() as i64)),
            (
                "/ProductName".into(),
                format!("{} {} Repeater", PRODUCT_NAME, slot.index()).into(),
            ),
            ("/ProductId".into(), BusValue::Int(0)),
            ("/FirmwareVersion".into(), BusValue::Int(0)),
            ("/HardwareVersion".into(), BusValue::Int(0)),
            ("/Serial".into(), "".into()),
            (TankPath::Connected.as_str().into(), BusValue::Int(0)),
            (TankPath::CustomName.as_str().into(), custom_name.into()),
        ];
        let reading = TankReading::default();
        initial.extend(to_batch(&reading));

        self.bus.register_service(&name, initial)?;
        info!("Published {} for {}", name, slot);

        self.services[slot.index()] = Some(PublishedTankService {
            slot,
            service_name: name,
            reading,
            connected: false,
            custom_name: custom_name.to_string(),
        });
        Ok(())
    }

    /// Write a full reading to a slot's service in one batch
    pub fn publish(&mut self, slot: SlotId, reading: &TankReading) -> Result<(), RepeaterError> {
        let service = self.service_mut(slot)?;
        let name = service.service_name.clone();
        self.bus.write_batch(&name, to_batch(reading))?;
        if let Some(service) = self.services[slot.index()].as_mut() {
            service.reading = reading.clone();
        }
        Ok(())
    }

    /// Toggle `/Connected` without touching the reading
    pub fn set_connected(&mut self, slot: SlotId, connected: bool) -> Result<(), RepeaterError> {
        let name = self.service_mut(slot)?.service_name.clone();
        self.bus.write_batch(
            &name,
            vec![(
                TankPath::Connected.as_str().into(),
                BusValue::from(connected),
            )],
        )?;
        if let Some(service) = self.services[slot.index()].as_mut() {
            service.connected = connected;
        }
        debug!("{} connected = {}", slot, connected);
        Ok(())
    }

    /// Write `/CustomName`
    pub fn set_custom_name(&mut self, slot: SlotId, name: &str) -> Result<(), RepeaterError> {
        let service_name = self.service_mut(slot)?.service_name.clone();
        self.bus.write_batch(
            &service_name,
            vec![(TankPath::CustomName.as_str().into(), name.into())],
        )?;
        if let Some(service) = self.services[slot.index()].as_mut() {
            service.custom_name = name.to_string();
        }
        Ok(())
    }

    /// Unpublish a slot's service
    pub fn teardown(&mut self, slot: SlotId) -> Result<(), RepeaterError> {
        let Some(service) = self.services[slot.index()].as_ref() else {
            return Ok(());
        };
        // Keep the local view until the bus confirms
        self.bus.unregister_service(&service.service_name)?;
        info!("Unpublished {}", service.service_name);
        self.services[slot.index()] = None;
        Ok(())
    }

    /// Local view of a slot's service
    pub fn get(&self, slot: SlotId) -> Option<&PublishedTankService> {
        self.services[slot.index()].as_ref()
    }

    /// Last reading written to a slot
    pub fn last_reading(&self, slot: SlotId) -> Option<&TankReading> {
        self.get(slot).map(|s| &s.reading)
    }

    /// Whether a slot's service is published
    pub fn is_published(&self, slot: SlotId) -> bool {
        self.services[slot.index()].is_some()
    }

    /// Hide the original composite service
    ///
    /// Hiding a different service first restores the previous one.
    pub fn hide_original(&mut self, service: &str) -> Result<bool, RepeaterError> {
        if self.hidden_original.as_deref() == Some(service) {
            return Ok(false);
        }
        self.restore_original()?;
        self.visibility.hide(service)?;
        info!("Hid original service {}", service);
        self.hidden_original = Some(service.to_string());
        Ok(true)
    }

    /// Make the original composite service visible again
    ///
    /// Returns the restored service, if one was hidden.
    pub fn restore_original(&mut self) -> Result<Option<String>, RepeaterError> {
        let Some(service) = self.hidden_original.take() else {
            return Ok(None);
        };
        if let Err(e) = self.visibility.restore(&service) {
            self.hidden_original = Some(service);
            return Err(e);
        }
        info!("Restored original service {}", service);
        Ok(Some(service))
    }

    /// Take over a service hidden by an earlier run
    ///
    /// No bus call is made; the service is already hidden.
    pub fn adopt_hidden_original(&mut self, service: impl Into<String>) {
        self.hidden_original = Some(service.into());
    }

    /// Clear a slot's reading after it was bound to a different tank
    ///
    /// Every reading path is rewritten as invalid so nothing of the previous
    /// tank is carried into the next update.
    pub fn reset_reading(&mut self, slot: SlotId) -> Result<(), RepeaterError> {
        self.publish(slot, &TankReading::default())
    }

    /// Currently hidden original service
    pub fn original_hidden(&self) -> Option<&str> {
        self.hidden_original.as_deref()
    }

    fn service_mut(&mut self, slot: SlotId) -> Result<&mut PublishedTankService, RepeaterError> {
        self.services[slot.index()]
            .as_mut()
            .ok_or(RepeaterError::SlotNotFound(slot))
    }
}

fn to_batch(reading: &TankReading) -> ItemBatch {
    encode_for_publish(reading)
        .iter()
        .map(|(path, value)| (path.as_str().to_string(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use tank_protocol::{FluidType, TankStatus};

    const PREFIX: &str = "com.victronenergy.tank.repeater";

    fn setup() -> (Arc<MemoryBus>, OutputPublisher) {
        let bus = Arc::new(MemoryBus::new());
        let publisher = OutputPublisher::new(bus.clone(), bus.clone(), PREFIX);
        (bus, publisher)
    }

    fn slot(n: usize) -> SlotId {
        SlotId::new(n).unwrap()
    }

    #[test]
    fn test_create_registers_management_paths() {
        let (bus, mut publisher) = setup();
        publisher.create(slot(3), "Port").unwrap();

        let name = "com.victronenergy.tank.repeater_3";
        assert!(bus.service_exists(name));
        assert_eq!(bus.value(name, "/DeviceInstance"), Some(BusValue::Int(3)));
        assert_eq!(
            bus.value(name, "/ProductName"),
            Some(BusValue::Text("NMEA2000 Multiple Tank 3 Repeater".into()))
        );
        assert_eq!(bus.value(name, "/Connected"), Some(BusValue::Int(0)));
        assert_eq!(bus.value(name, "/Level"), Some(BusValue::Invalid));
        assert_eq!(bus.value(name, "/CustomName"), Some(BusValue::Text("Port".into())));
        assert!(publisher.create(slot(3), "").is_err());
    }

    #[test]
    fn test_publish_is_one_batch() {
        let (bus, mut publisher) = setup();
        publisher.create(slot(0), "").unwrap();
        let reading = TankReading {
            level: Some(50.0),
            capacity: Some(0.2),
            fluid_type: Some(FluidType::FreshWater),
            status: TankStatus::Ok,
            ..Default::default()
        };
        publisher.publish(slot(0), &reading).unwrap();

        let name = publisher.service_name(slot(0));
        assert_eq!(bus.batch_count(&name), 1);
        assert_eq!(bus.value(&name, "/Remaining"), Some(BusValue::Double(0.1)));
        assert_eq!(bus.value(&name, "/FluidType"), Some(BusValue::Int(1)));
        assert_eq!(publisher.last_reading(slot(0)), Some(&reading));
    }

    #[test]
    fn test_set_connected_keeps_values() {
        let (bus, mut publisher) = setup();
        publisher.create(slot(1), "").unwrap();
        let reading = TankReading {
            level: Some(20.0),
            ..Default::default()
        };
        publisher.publish(slot(1), &reading).unwrap();
        publisher.set_connected(slot(1), true).unwrap();
        publisher.set_connected(slot(1), false).unwrap();

        let name = publisher.service_name(slot(1));
        assert_eq!(bus.value(&name, "/Connected"), Some(BusValue::Int(0)));
        assert_eq!(bus.value(&name, "/Level"), Some(BusValue::Double(20.0)));
    }

    #[test]
    fn test_unknown_slot() {
        let (_bus, mut publisher) = setup();
        assert!(matches!(
            publisher.publish(slot(2), &TankReading::default()),
            Err(RepeaterError::SlotNotFound(_))
        ));
        // Tearing down an unpublished slot is a no-op
        assert!(publisher.teardown(slot(2)).is_ok());
    }

    #[test]
    fn test_reset_reading_invalidates_values() {
        let (bus, mut publisher) = setup();
        publisher.create(slot(4), "").unwrap();
        let reading = TankReading {
            level: Some(10.0),
            capacity: Some(0.4),
            fluid_type: Some(FluidType::Fuel),
            ..Default::default()
        };
        publisher.publish(slot(4), &reading).unwrap();
        publisher.reset_reading(slot(4)).unwrap();

        let name = publisher.service_name(slot(4));
        assert_eq!(bus.value(&name, "/FluidType"), Some(BusValue::Invalid));
        assert_eq!(bus.value(&name, "/Remaining"), Some(BusValue::Invalid));
        assert_eq!(publisher.last_reading(slot(4)), Some(&TankReading::default()));
    }

    #[test]
    fn test_failed_teardown_keeps_service() {
        let (bus, mut publisher) = setup();
        publisher.create(slot(2), "").unwrap();
        bus.unregister_service(&publisher.service_name(slot(2))).unwrap();

        assert!(publisher.teardown(slot(2)).is_err());
        assert!(publisher.is_published(slot(2)));
    }

    #[test]
    fn test_adopted_original_is_restored() {
        let (bus, mut publisher) = setup();
        bus.hide("a").unwrap();
        publisher.adopt_hidden_original("a");
        assert!(!publisher.hide_original("a").unwrap());

        assert_eq!(publisher.restore_original().unwrap(), Some("a".to_string()));
        assert!(!bus.is_hidden("a"));
    }

    #[test]
    fn test_hide_and_restore() {
        let (bus, mut publisher) = setup();
        assert!(publisher.hide_original("a").unwrap());
        assert!(!publisher.hide_original("a").unwrap());
        assert!(publisher.hide_original("b").unwrap());
        assert_eq!(bus.hidden_services(), vec!["b".to_string()]);

        assert_eq!(publisher.restore_original().unwrap(), Some("b".to_string()));
        assert!(bus.hidden_services().is_empty());
        assert_eq!(publisher.restore_original().unwrap(), None);
    }
}
