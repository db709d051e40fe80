//! Tank identity resolution
//!
//! The composite feed cycles several tanks through one set of paths. A
//! resolver looks at one update and decides which physical tank it
//! describes. The choice of strategy is a configuration option because feeds
//! differ in what they expose.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tank_protocol::{decode_instance, RawFields, TankReading};
use tracing::debug;

use crate::error::RepeaterError;
use crate::state::TankKey;

/// Maps one update to a stable tank key
///
/// For a reproducible resolver the same physical tank always yields the same
/// key, across updates and across restarts.
pub trait IdentityResolver: Send {
    /// Resolve the key for an update
    fn resolve(&mut self, raw: &RawFields, reading: &TankReading) -> Result<TankKey, RepeaterError>;

    /// Forget any learned state
    fn reset(&mut self) {}

    /// Whether keys survive a restart of the feed and of this process
    fn is_reproducible(&self) -> bool {
        true
    }

    /// Strategy name for logging
    fn name(&self) -> &'static str;
}

/// Uses the explicit per-reading instance number
#[derive(Debug, Default)]
pub struct InstanceResolver;

impl IdentityResolver for InstanceResolver {
    fn resolve(&mut self, raw: &RawFields, _reading: &TankReading) -> Result<TankKey, RepeaterError> {
        match decode_instance(raw) {
            Ok(Some(n)) => Ok(TankKey::Instance(n)),
            Ok(None) => Err(RepeaterError::UnresolvedIdentity(
                "update carries no instance".to_string(),
            )),
            Err(e) => Err(RepeaterError::UnresolvedIdentity(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "instance"
    }
}

/// Assumes one tank per fluid type
#[derive(Debug, Default)]
pub struct FluidTypeResolver;

impl IdentityResolver for FluidTypeResolver {
    fn resolve(&mut self, _raw: &RawFields, reading: &TankReading) -> Result<TankKey, RepeaterError> {
        reading
            .fluid_type
            .map(|fluid| TankKey::Fluid(fluid.code()))
            .ok_or_else(|| RepeaterError::UnresolvedIdentity("update carries no fluid type".into()))
    }

    fn name(&self) -> &'static str {
        "fluid-type"
    }
}

/// Best-effort fingerprint of fluid type plus capacity
///
/// Tanks of the same fluid are told apart by capacity, numbered in the order
/// they are first seen. Ordinals depend on arrival order, so keys are not
/// guaranteed to be stable across restarts.
#[derive(Debug, Default)]
pub struct FingerprintResolver {
    seen: HashMap<i64, Vec<Option<f64>>>,
}

/// Capacities closer than this are treated as the same tank
const CAPACITY_EPSILON: f64 = 1e-6;

impl FingerprintResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct tanks learned for a fluid
    pub fn known(&self, fluid: i64) -> usize {
        self.seen.get(&fluid).map_or(0, Vec::len)
    }
}

impl IdentityResolver for FingerprintResolver {
    fn resolve(&mut self, _raw: &RawFields, reading: &TankReading) -> Result<TankKey, RepeaterError> {
        let fluid = reading
            .fluid_type
            .map(|f| f.code())
            .ok_or_else(|| RepeaterError::UnresolvedIdentity("update carries no fluid type".into()))?;
        let capacities = self.seen.entry(fluid).or_default();

        let ordinal = match reading.capacity {
            Some(capacity) => {
                let found = capacities
                    .iter()
                    .position(|c| c.is_some_and(|c| (c - capacity).abs() < CAPACITY_EPSILON));
                match found {
                    Some(i) => i,
                    // A lone tank first seen without a capacity learns it now
                    None if capacities.len() == 1 && capacities[0].is_none() => {
                        capacities[0] = Some(capacity);
                        0
                    }
                    None => {
                        capacities.push(Some(capacity));
                        debug!("New fingerprint: fluid {} capacity {}", fluid, capacity);
                        capacities.len() - 1
                    }
                }
            }
            None => match capacities.len() {
                0 => {
                    capacities.push(None);
                    0
                }
                1 => 0,
                n => {
                    return Err(RepeaterError::UnresolvedIdentity(format!(
                        "no capacity and {} tanks of fluid {}",
                        n, fluid
                    )))
                }
            },
        };

        Ok(TankKey::Fingerprint {
            fluid,
            ordinal: ordinal as u32,
        })
    }

    fn reset(&mut self) {
        self.seen.clear();
    }

    fn is_reproducible(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "fingerprint"
    }
}

/// Resolver strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolverKind {
    /// Explicit instance number
    Instance,
    /// One tank per fluid type
    #[default]
    FluidType,
    /// Fluid type plus capacity
    Fingerprint,
}

impl ResolverKind {
    /// Build a resolver for this strategy
    pub fn build(self) -> Box<dyn IdentityResolver> {
        match self {
            Self::Instance => Box::new(InstanceResolver),
            Self::FluidType => Box::new(FluidTypeResolver),
            Self::Fingerprint => Box::new(FingerprintResolver::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tank_protocol::{decode, TankPath};

    fn update(fluid: i64, capacity: Option<f64>) -> (RawFields, TankReading) {
        let mut raw = RawFields::new()
            .with(TankPath::FluidType, fluid)
            .with(TankPath::Level, 40.0);
        if let Some(c) = capacity {
            raw.insert(TankPath::Capacity, c);
        }
        let reading = decode(&raw).reading;
        (raw, reading)
    }

    #[test]
    fn test_instance_resolver() {
        let mut resolver = InstanceResolver;
        let raw = RawFields::new().with(TankPath::Instance, 2i64);
        let reading = decode(&raw).reading;
        assert_eq!(resolver.resolve(&raw, &reading).unwrap(), TankKey::Instance(2));

        let (raw, reading) = update(0, None);
        assert!(matches!(
            resolver.resolve(&raw, &reading),
            Err(RepeaterError::UnresolvedIdentity(_))
        ));
    }

    #[test]
    fn test_fluid_resolver_is_stable() {
        let mut resolver = FluidTypeResolver;
        let (raw, reading) = update(5, Some(0.1));
        let first = resolver.resolve(&raw, &reading).unwrap();
        let (raw, reading) = update(5, None);
        assert_eq!(resolver.resolve(&raw, &reading).unwrap(), first);
        assert_eq!(first, TankKey::Fluid(5));
    }

    #[test]
    fn test_fluid_resolver_needs_fluid() {
        let mut resolver = FluidTypeResolver;
        let raw = RawFields::new().with(TankPath::Level, 10.0);
        let reading = decode(&raw).reading;
        assert!(resolver.resolve(&raw, &reading).is_err());
    }

    #[test]
    fn test_fingerprint_splits_by_capacity() {
        let mut resolver = FingerprintResolver::new();
        let (raw, reading) = update(1, Some(0.2));
        let a = resolver.resolve(&raw, &reading).unwrap();
        let (raw, reading) = update(1, Some(0.4));
        let b = resolver.resolve(&raw, &reading).unwrap();
        let (raw, reading) = update(1, Some(0.2));
        let a_again = resolver.resolve(&raw, &reading).unwrap();

        assert_eq!(a, TankKey::Fingerprint { fluid: 1, ordinal: 0 });
        assert_eq!(b, TankKey::Fingerprint { fluid: 1, ordinal: 1 });
        assert_eq!(a, a_again);
        assert!(!resolver.is_reproducible());
    }

    #[test]
    fn test_fingerprint_without_capacity() {
        let mut resolver = FingerprintResolver::new();
        let (raw, reading) = update(2, None);
        let first = resolver.resolve(&raw, &reading).unwrap();

        // Capacity arriving later sticks to the same tank
        let (raw, reading) = update(2, Some(0.3));
        assert_eq!(resolver.resolve(&raw, &reading).unwrap(), first);
        assert_eq!(resolver.known(2), 1);

        let (raw, reading) = update(2, Some(0.5));
        resolver.resolve(&raw, &reading).unwrap();

        // Ambiguous once two tanks of the fluid are known
        let (raw, reading) = update(2, None);
        assert!(resolver.resolve(&raw, &reading).is_err());

        resolver.reset();
        assert_eq!(resolver.known(2), 0);
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&ResolverKind::FluidType).unwrap();
        assert_eq!(json, "\"fluid-type\"");
        assert_eq!(ResolverKind::Fingerprint.build().name(), "fingerprint");
    }
}
