//! Signal collation for rotating feeds
//!
//! A SeeLevel-style feed does not deliver whole updates. It cycles one tank
//! at a time through `/FluidType`, `/Level` and `/Capacity`, and each path
//! changes with its own property-change signal. The level and capacity of a
//! tank arrive after its fluid type and before the next tank's, so the
//! collator keeps the latest level and capacity and emits them for the
//! *previous* fluid type when the next fluid type arrives.
//!
//! The feed is also polled. A polled read is only trusted when the fluid
//! type read before and after the values agree, otherwise the feed rotated
//! mid-read.

use tank_protocol::{BusValue, RawFields, TankPath};
use tracing::{debug, info};

/// Polls without a level (or capacity) signal before polled values are used
const POLL_FALLBACK_THRESHOLD: u32 = 10;

/// One polled read of the composite feed
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PolledSnapshot {
    /// Fluid type read first
    pub fluid: Option<i64>,
    /// Level read
    pub level: Option<f64>,
    /// Capacity read
    pub capacity: Option<f64>,
    /// Fluid type read again after level and capacity
    pub fluid_again: Option<i64>,
}

/// Turns per-path signals and polls into whole updates
#[derive(Debug, Default)]
pub struct SignalCollator {
    sender: Option<String>,
    last_fluid: Option<i64>,
    last_level: Option<f64>,
    last_capacity: Option<f64>,
    polls_without_level: u32,
    polls_without_capacity: u32,
}

impl SignalCollator {
    /// Create an unbound collator
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept signals only from this unique bus name; clears collected state
    pub fn bind(&mut self, unique_name: &str) {
        self.reset();
        self.sender = Some(unique_name.to_string());
    }

    /// Stop accepting signals
    pub fn unbind(&mut self) {
        self.reset();
        self.sender = None;
    }

    /// Clear collected values
    pub fn reset(&mut self) {
        self.last_fluid = None;
        self.last_level = None;
        self.last_capacity = None;
        self.polls_without_level = 0;
        self.polls_without_capacity = 0;
    }

    /// Unique name signals are accepted from
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// Handle one property-change signal
    ///
    /// Returns an update when a fluid type signal completes the previous
    /// tank.
    pub fn on_signal(&mut self, sender: &str, path: TankPath, value: &BusValue) -> Option<RawFields> {
        if self.sender.as_deref() != Some(sender) {
            return None;
        }
        if value.is_invalid() {
            return None;
        }

        match path {
            TankPath::FluidType => {
                let code = value.as_i64()?;
                let flushed = self.last_fluid.map(|prev| self.collected(prev));
                self.last_fluid = Some(code);
                flushed
            }
            TankPath::Level => {
                if let Some(level) = value.as_f64() {
                    self.last_level = Some(level);
                }
                None
            }
            TankPath::Capacity => {
                if let Some(capacity) = value.as_f64() {
                    self.last_capacity = Some(capacity);
                }
                None
            }
            _ => None,
        }
    }

    /// Handle one polled read
    ///
    /// Returns an update unless the read was torn by a rotation.
    pub fn on_poll(&mut self, poll: PolledSnapshot) -> Option<RawFields> {
        if self.sender.is_none() {
            return None;
        }

        // Fall back to polled values when signals for a path never arrive
        let signals_flowing = self.last_fluid.is_some();
        match (self.last_level, poll.level) {
            (None, Some(level)) if signals_flowing => {
                self.polls_without_level += 1;
                if self.polls_without_level > POLL_FALLBACK_THRESHOLD {
                    info!("No /Level signals received, using polled data");
                    self.last_level = Some(level);
                }
            }
            _ => self.polls_without_level = 0,
        }
        match (self.last_capacity, poll.capacity) {
            (None, Some(capacity)) if signals_flowing => {
                self.polls_without_capacity += 1;
                if self.polls_without_capacity > POLL_FALLBACK_THRESHOLD {
                    info!("No /Capacity signals received, using polled data");
                    self.last_capacity = Some(capacity);
                }
            }
            _ => self.polls_without_capacity = 0,
        }

        match (poll.fluid, poll.fluid_again) {
            (Some(a), Some(b)) if a == b => {
                let mut raw = RawFields::new().with(TankPath::FluidType, a);
                if let Some(level) = poll.level {
                    raw.insert(TankPath::Level, level);
                }
                if let Some(capacity) = poll.capacity {
                    raw.insert(TankPath::Capacity, capacity);
                }
                Some(raw)
            }
            _ => {
                debug!("Discarding torn poll: {:?}", poll);
                None
            }
        }
    }

    fn collected(&self, fluid: i64) -> RawFields {
        let mut raw = RawFields::new().with(TankPath::FluidType, fluid);
        if let Some(level) = self.last_level {
            raw.insert(TankPath::Level, level);
        }
        if let Some(capacity) = self.last_capacity {
            raw.insert(TankPath::Capacity, capacity);
        }
        raw
    }
}
