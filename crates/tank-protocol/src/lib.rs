//! Tank Attribute Codec
//!
//! This crate converts between the raw, path-addressed values a tank service
//! exposes on the bus and typed tank readings:
//!
//! - **Paths**: the fixed attribute surface of a tank service (`/Level`,
//!   `/Capacity`, `/FluidType`, ...)
//! - **Values**: the typed variant carried by each path, including the bus's
//!   "invalid" marker
//! - **Readings**: a decoded, typed snapshot of one tank
//! - **Units**: the volume unit lookup table used for display scaling
//!
//! # Architecture
//!
//! Everything here is stateless. Decoding never fails as a whole: a field
//! that cannot be parsed is reported in [`Decoded::malformed`] and left out of
//! the reading, while the remaining fields still apply.
//!
//! # Example
//!
//! ```rust
//! use tank_protocol::{decode, encode, BusValue, FluidType, RawFields, TankPath};
//!
//! let mut raw = RawFields::new();
//! raw.insert(TankPath::FluidType, BusValue::Int(1));
//! raw.insert(TankPath::Level, BusValue::Double(55.0));
//! raw.insert(TankPath::Capacity, BusValue::Double(0.2));
//! raw.insert(TankPath::Status, BusValue::Int(0));
//!
//! let decoded = decode(&raw);
//! assert_eq!(decoded.reading.fluid_type, Some(FluidType::FreshWater));
//! assert_eq!(encode(&decoded.reading), raw);
//! ```

pub mod codec;
pub mod error;
pub mod fluid;
pub mod paths;
pub mod reading;
pub mod units;
pub mod value;

pub use codec::{decode, decode_instance, encode, encode_for_publish, Decoded};
pub use error::CodecError;
pub use fluid::{FluidType, TankStatus};
pub use paths::{RawFields, TankPath};
pub use reading::TankReading;
pub use units::VolumeUnit;
pub use value::BusValue;
