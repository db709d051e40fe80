//! Slot registry
//!
//! Durable mapping from tank key to output slot. The registry only records
//! bindings and liveness; publishing is the publisher's job.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::RepeaterError;
use crate::state::{SlotId, TankKey, MAX_SLOTS};
use crate::store::PersistedSlot;

/// One bound slot
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    /// Slot position
    pub slot: SlotId,
    /// Tank bound to the slot
    pub key: TankKey,
    /// Operator-assigned name, empty for the default display
    pub custom_name: String,
    /// When the tank last reported, `None` if not since startup
    pub last_seen: Option<Instant>,
    /// Whether the slot currently receives data
    pub connected: bool,
}

impl RegistryEntry {
    fn new(slot: SlotId, key: TankKey, custom_name: String) -> Self {
        Self {
            slot,
            key,
            custom_name,
            last_seen: None,
            connected: false,
        }
    }
}

/// Fixed-size table of slot bindings
///
/// A key is bound to at most one slot, and a slot holds at most one key.
#[derive(Debug, Default)]
pub struct TankRegistry {
    slots: [Option<RegistryEntry>; MAX_SLOTS],
}

impl TankRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the slot bound to a key, binding the lowest free slot if none is
    ///
    /// Returns the slot and whether it was newly created.
    pub fn lookup_or_create(
        &mut self,
        key: TankKey,
        now: Instant,
    ) -> Result<(SlotId, bool), RepeaterError> {
        if let Some(slot) = self.slot_for(key) {
            return Ok((slot, false));
        }

        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(RepeaterError::CapacityExceeded { key })?;
        let slot = SlotId::new(index).ok_or(RepeaterError::CapacityExceeded { key })?;

        let mut entry = RegistryEntry::new(slot, key, String::new());
        entry.last_seen = Some(now);
        self.slots[index] = Some(entry);
        info!("Bound {} to {}", key, slot);
        Ok((slot, true))
    }

    /// Record that a slot received data
    ///
    /// Returns true if the slot was disconnected before.
    pub fn touch(&mut self, slot: SlotId, now: Instant) -> Result<bool, RepeaterError> {
        let entry = self.entry_mut(slot)?;
        entry.last_seen = Some(now);
        let reconnected = !entry.connected;
        entry.connected = true;
        Ok(reconnected)
    }

    /// Mark a slot disconnected, returning true if it was connected
    pub fn mark_disconnected(&mut self, slot: SlotId) -> bool {
        match self.slots[slot.index()].as_mut() {
            Some(entry) if entry.connected => {
                entry.connected = false;
                true
            }
            _ => false,
        }
    }

    /// Set a slot's custom name
    pub fn set_custom_name(&mut self, slot: SlotId, name: &str) -> Result<(), RepeaterError> {
        self.entry_mut(slot)?.custom_name = name.trim().to_string();
        Ok(())
    }

    /// Rebind a slot to a different tank, keeping its name
    pub fn remap(&mut self, slot: SlotId, key: TankKey) -> Result<(), RepeaterError> {
        if let Some(existing) = self.slot_for(key) {
            if existing != slot {
                return Err(RepeaterError::KeyAlreadyBound {
                    key,
                    slot: existing,
                });
            }
        }
        let entry = self.entry_mut(slot)?;
        debug!("Remap {} from {} to {}", slot, entry.key, key);
        entry.key = key;
        entry.connected = false;
        entry.last_seen = None;
        Ok(())
    }

    /// Unbind a slot
    pub fn remove(&mut self, slot: SlotId) -> Option<RegistryEntry> {
        self.slots[slot.index()].take()
    }

    /// Unbind every slot
    pub fn clear(&mut self) {
        self.slots = Default::default();
    }

    /// Get a bound slot
    pub fn get(&self, slot: SlotId) -> Option<&RegistryEntry> {
        self.slots[slot.index()].as_ref()
    }

    /// Slot bound to a key
    pub fn slot_for(&self, key: TankKey) -> Option<SlotId> {
        self.iter().find(|e| e.key == key).map(|e| e.slot)
    }

    /// Iterate over bound slots in slot order
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.slots.iter().flatten()
    }

    /// Bound slots in slot order
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.iter().cloned().collect()
    }

    /// Number of bound slots
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether no slot is bound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every slot is bound
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Persistable form of the bindings
    pub fn to_persisted(&self) -> Vec<PersistedSlot> {
        self.iter()
            .map(|e| PersistedSlot {
                slot: e.slot.index() as u8,
                key: e.key,
                custom_name: e.custom_name.clone(),
            })
            .collect()
    }

    /// Rebuild from persisted bindings
    ///
    /// Restored slots start disconnected. Entries with an out-of-range slot
    /// or a duplicate slot or key are skipped.
    pub fn from_persisted(slots: &[PersistedSlot]) -> Self {
        let mut registry = Self::new();
        for persisted in slots {
            let Some(slot) = SlotId::new(persisted.slot as usize) else {
                warn!("Skipping persisted slot {}: out of range", persisted.slot);
                continue;
            };
            if registry.get(slot).is_some() || registry.slot_for(persisted.key).is_some() {
                warn!("Skipping duplicate persisted binding {} -> {}", persisted.key, slot);
                continue;
            }
            registry.slots[slot.index()] = Some(RegistryEntry::new(
                slot,
                persisted.key,
                persisted.custom_name.clone(),
            ));
        }
        registry
    }

    fn entry_mut(&mut self, slot: SlotId) -> Result<&mut RegistryEntry, RepeaterError> {
        self.slots[slot.index()]
            .as_mut()
            .ok_or(RepeaterError::SlotNotFound(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(n: usize) -> SlotId {
        SlotId::new(n).unwrap()
    }

    #[test]
    fn test_lookup_is_idempotent() {
        let mut registry = TankRegistry::new();
        let now = Instant::now();
        let (a, created) = registry.lookup_or_create(TankKey::Fluid(0), now).unwrap();
        assert!(created);
        let (again, created) = registry.lookup_or_create(TankKey::Fluid(0), now).unwrap();
        assert!(!created);
        assert_eq!(a, again);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lowest_free_slot() {
        let mut registry = TankRegistry::new();
        let now = Instant::now();
        for code in 0..3 {
            registry.lookup_or_create(TankKey::Fluid(code), now).unwrap();
        }
        registry.remove(slot(1));
        let (s, _) = registry.lookup_or_create(TankKey::Fluid(9), now).unwrap();
        assert_eq!(s, slot(1));
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut registry = TankRegistry::new();
        let now = Instant::now();
        for n in 0..MAX_SLOTS as u32 {
            registry.lookup_or_create(TankKey::Instance(n), now).unwrap();
        }
        assert!(registry.is_full());
        let err = registry
            .lookup_or_create(TankKey::Instance(99), now)
            .unwrap_err();
        assert!(matches!(err, RepeaterError::CapacityExceeded { .. }));
        // Known keys still resolve when full
        assert!(registry.lookup_or_create(TankKey::Instance(3), now).is_ok());
    }

    #[test]
    fn test_touch_and_disconnect() {
        let mut registry = TankRegistry::new();
        let now = Instant::now();
        let (s, _) = registry.lookup_or_create(TankKey::Fluid(1), now).unwrap();
        assert!(registry.touch(s, now).unwrap());
        assert!(!registry.touch(s, now).unwrap());
        assert!(registry.mark_disconnected(s));
        assert!(!registry.mark_disconnected(s));
        assert!(registry.touch(s, now).unwrap());
        assert!(registry.touch(slot(5), now).is_err());
    }

    #[test]
    fn test_remap_conflict() {
        let mut registry = TankRegistry::new();
        let now = Instant::now();
        let (a, _) = registry.lookup_or_create(TankKey::Fluid(0), now).unwrap();
        let (b, _) = registry.lookup_or_create(TankKey::Fluid(1), now).unwrap();
        registry.set_custom_name(a, "  Port fuel ").unwrap();

        assert!(matches!(
            registry.remap(a, TankKey::Fluid(1)),
            Err(RepeaterError::KeyAlreadyBound { slot, .. }) if slot == b
        ));

        registry.remap(a, TankKey::Instance(7)).unwrap();
        let entry = registry.get(a).unwrap();
        assert_eq!(entry.key, TankKey::Instance(7));
        assert_eq!(entry.custom_name, "Port fuel");
    }

    #[test]
    fn test_persisted_round_trip() {
        let mut registry = TankRegistry::new();
        let now = Instant::now();
        registry.lookup_or_create(TankKey::Fluid(0), now).unwrap();
        let (s, _) = registry.lookup_or_create(TankKey::Fluid(5), now).unwrap();
        registry.set_custom_name(s, "Holding").unwrap();

        let restored = TankRegistry::from_persisted(&registry.to_persisted());
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.slot_for(TankKey::Fluid(5)), Some(s));
        assert_eq!(restored.get(s).unwrap().custom_name, "Holding");
        assert!(!restored.get(s).unwrap().connected);
    }

    #[test]
    fn test_from_persisted_skips_bad_entries() {
        let persisted = vec![
            PersistedSlot {
                slot: 0,
                key: TankKey::Fluid(0),
                custom_name: String::new(),
            },
            PersistedSlot {
                slot: 0,
                key: TankKey::Fluid(1),
                custom_name: String::new(),
            },
            PersistedSlot {
                slot: 3,
                key: TankKey::Fluid(0),
                custom_name: String::new(),
            },
            PersistedSlot {
                slot: 40,
                key: TankKey::Fluid(2),
                custom_name: String::new(),
            },
        ];
        let registry = TankRegistry::from_persisted(&persisted);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.slot_for(TankKey::Fluid(0)), Some(slot(0)));
    }
}
