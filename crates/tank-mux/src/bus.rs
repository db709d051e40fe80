//! Bus transport ports
//!
//! The repeater talks to the platform's message bus through two narrow
//! traits: [`ServiceBus`] to publish services and their attributes, and
//! [`VisibilityPort`] to hide or restore a service in the GUI.
//! [`MemoryBus`] implements both in-process.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use tank_protocol::BusValue;
use tracing::debug;

use crate::discovery::{BusDirectory, ServiceInfo};
use crate::error::RepeaterError;

/// Attribute writes applied together
pub type ItemBatch = Vec<(String, BusValue)>;

/// Publishing side of the bus
pub trait ServiceBus: Send + Sync {
    /// Claim a service name with its initial attributes
    fn register_service(&self, name: &str, initial: ItemBatch) -> Result<(), RepeaterError>;

    /// Write several attributes of one service so readers see all or none
    fn write_batch(&self, name: &str, items: ItemBatch) -> Result<(), RepeaterError>;

    /// Release a service name
    fn unregister_service(&self, name: &str) -> Result<(), RepeaterError>;
}

/// GUI visibility of services
pub trait VisibilityPort: Send + Sync {
    /// Hide a service from the GUI's device list
    fn hide(&self, service: &str) -> Result<(), RepeaterError>;

    /// Make a hidden service visible again
    fn restore(&self, service: &str) -> Result<(), RepeaterError>;
}

#[derive(Debug, Default)]
struct BusService {
    unique_name: String,
    items: BTreeMap<String, BusValue>,
    batches: usize,
}

#[derive(Debug, Default)]
struct BusInner {
    services: BTreeMap<String, BusService>,
    hidden: BTreeSet<String>,
    next_unique: u32,
}

/// In-process bus
///
/// All state sits behind one lock, so a batch is applied atomically with
/// respect to every reader.
#[derive(Debug, Default)]
pub struct MemoryBus {
    inner: Mutex<BusInner>,
}

impl MemoryBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of an attribute
    pub fn value(&self, service: &str, path: &str) -> Option<BusValue> {
        self.inner
            .lock()
            .services
            .get(service)
            .and_then(|s| s.items.get(path).cloned())
    }

    /// Whether a service is registered
    pub fn service_exists(&self, service: &str) -> bool {
        self.inner.lock().services.contains_key(service)
    }

    /// Every attribute of a service, read under one lock
    pub fn snapshot(&self, service: &str) -> Option<BTreeMap<String, BusValue>> {
        self.inner
            .lock()
            .services
            .get(service)
            .map(|s| s.items.clone())
    }

    /// Unique connection name of a registered service
    pub fn unique_name(&self, service: &str) -> Option<String> {
        self.inner
            .lock()
            .services
            .get(service)
            .map(|s| s.unique_name.clone())
    }

    /// Number of batches written to a service since registration
    pub fn batch_count(&self, service: &str) -> usize {
        self.inner
            .lock()
            .services
            .get(service)
            .map_or(0, |s| s.batches)
    }

    /// Registered service names, sorted
    pub fn service_names(&self) -> Vec<String> {
        self.inner.lock().services.keys().cloned().collect()
    }

    /// Services currently hidden from the GUI
    pub fn hidden_services(&self) -> Vec<String> {
        self.inner.lock().hidden.iter().cloned().collect()
    }

    /// Whether a service is hidden from the GUI
    pub fn is_hidden(&self, service: &str) -> bool {
        self.inner.lock().hidden.contains(service)
    }
}

impl ServiceBus for MemoryBus {
    fn register_service(&self, name: &str, initial: ItemBatch) -> Result<(), RepeaterError> {
        let mut inner = self.inner.lock();
        if inner.services.contains_key(name) {
            return Err(RepeaterError::Bus(format!("{} already registered", name)));
        }
        inner.next_unique += 1;
        let service = BusService {
            unique_name: format!(":1.{}", inner.next_unique),
            items: initial.into_iter().collect(),
            batches: 0,
        };
        inner.services.insert(name.to_string(), service);
        debug!("Registered {}", name);
        Ok(())
    }

    fn write_batch(&self, name: &str, items: ItemBatch) -> Result<(), RepeaterError> {
        let mut inner = self.inner.lock();
        let service = inner
            .services
            .get_mut(name)
            .ok_or_else(|| RepeaterError::Bus(format!("{} not registered", name)))?;
        service.items.extend(items);
        service.batches += 1;
        Ok(())
    }

    fn unregister_service(&self, name: &str) -> Result<(), RepeaterError> {
        let removed = self.inner.lock().services.remove(name);
        match removed {
            Some(_) => {
                debug!("Unregistered {}", name);
                Ok(())
            }
            None => Err(RepeaterError::Bus(format!("{} not registered", name))),
        }
    }
}

impl VisibilityPort for MemoryBus {
    fn hide(&self, service: &str) -> Result<(), RepeaterError> {
        self.inner.lock().hidden.insert(service.to_string());
        Ok(())
    }

    fn restore(&self, service: &str) -> Result<(), RepeaterError> {
        self.inner.lock().hidden.remove(service);
        Ok(())
    }
}

impl BusDirectory for MemoryBus {
    fn list_services(&self) -> Result<Vec<ServiceInfo>, RepeaterError> {
        let inner = self.inner.lock();
        Ok(inner
            .services
            .iter()
            .map(|(name, s)| ServiceInfo {
                name: name.clone(),
                unique_name: s.unique_name.clone(),
                product_id: s.items.get("/ProductId").and_then(BusValue::as_i64),
            })
            .collect())
    }

    fn read_value(&self, service: &str, path: &str) -> Result<Option<BusValue>, RepeaterError> {
        Ok(self.value(service, path))
    }
}
