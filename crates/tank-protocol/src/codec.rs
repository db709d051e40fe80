//! Attribute codec
//!
//! Conversion between [`RawFields`] and [`TankReading`]. Decoding is
//! per-field: a bad field never poisons the rest of the update.

use tracing::debug;

use crate::error::CodecError;
use crate::fluid::{FluidType, TankStatus};
use crate::paths::{RawFields, TankPath};
use crate::reading::TankReading;
use crate::value::BusValue;

/// Result of decoding one raw update
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decoded {
    /// The typed reading
    pub reading: TankReading,
    /// Reading paths that carried a well-formed value (including the invalid marker)
    pub present: Vec<TankPath>,
    /// Reading paths whose value could not be parsed
    pub malformed: Vec<TankPath>,
}

impl Decoded {
    /// Whether a path carried a well-formed value
    pub fn has(&self, path: TankPath) -> bool {
        self.present.contains(&path)
    }

    /// Apply this update on top of the last known reading of the same tank
    ///
    /// Paths missing from the update (or malformed) keep the previous value.
    /// `/Remaining` is never carried over, since a stale volume would not
    /// match a fresh level.
    pub fn overlay(&self, base: &TankReading) -> TankReading {
        let r = &self.reading;
        TankReading {
            level: if self.has(TankPath::Level) { r.level } else { base.level },
            capacity: if self.has(TankPath::Capacity) {
                r.capacity
            } else {
                base.capacity
            },
            fluid_type: if self.has(TankPath::FluidType) {
                r.fluid_type
            } else {
                base.fluid_type
            },
            remaining: r.remaining,
            resistance_ohm: if self.has(TankPath::Resistance) {
                r.resistance_ohm
            } else {
                base.resistance_ohm
            },
            status: if self.has(TankPath::Status) {
                r.status
            } else {
                base.status
            },
        }
    }
}

/// Decode a raw update into a typed reading
pub fn decode(raw: &RawFields) -> Decoded {
    let mut out = Decoded::default();

    for (path, value) in raw.iter() {
        let result = match path {
            TankPath::Level => decode_level(value).map(|v| out.reading.level = v),
            TankPath::Capacity => {
                decode_volume(path, value).map(|v| out.reading.capacity = v)
            }
            TankPath::FluidType => decode_fluid(value).map(|v| out.reading.fluid_type = v),
            TankPath::Remaining => {
                decode_volume(path, value).map(|v| out.reading.remaining = v)
            }
            TankPath::Status => decode_status(value).map(|v| out.reading.status = v),
            TankPath::Resistance => {
                decode_resistance(value).map(|v| out.reading.resistance_ohm = v)
            }
            // Not part of a reading
            TankPath::Instance | TankPath::Connected | TankPath::CustomName => continue,
        };
        record(&mut out, path, result);
    }

    // A malformed status must not read as "OK"
    if out.malformed.contains(&TankPath::Status) {
        out.reading.status = TankStatus::Unknown;
    }

    out
}

fn record(out: &mut Decoded, path: TankPath, result: Result<(), CodecError>) {
    match result {
        Ok(()) => out.present.push(path),
        Err(e) => {
            debug!("Malformed field: {}", e);
            out.malformed.push(path);
        }
    }
}

/// Extract the explicit tank instance, if the feed provides one
pub fn decode_instance(raw: &RawFields) -> Result<Option<u32>, CodecError> {
    let Some(value) = raw.get(TankPath::Instance) else {
        return Ok(None);
    };
    if value.is_invalid() {
        return Ok(None);
    }
    let n = value.as_i64().ok_or_else(|| wrong_type(TankPath::Instance, "integer", value))?;
    u32::try_from(n).map(Some).map_err(|_| CodecError::OutOfRange {
        path: TankPath::Instance,
        value: n.to_string(),
    })
}

/// Encode a reading back into raw fields
///
/// The inverse of [`decode`] for well-formed field sets: an invalid level is
/// written as the invalid marker, absent optional fields are omitted.
pub fn encode(reading: &TankReading) -> RawFields {
    let mut raw = RawFields::new();
    raw.insert(
        TankPath::Level,
        reading.level.map(BusValue::Double).unwrap_or(BusValue::Invalid),
    );
    if let Some(capacity) = reading.capacity {
        raw.insert(TankPath::Capacity, capacity);
    }
    if let Some(fluid) = reading.fluid_type {
        raw.insert(TankPath::FluidType, fluid.code());
    }
    if let Some(remaining) = reading.remaining {
        raw.insert(TankPath::Remaining, remaining);
    }
    raw.insert(TankPath::Status, reading.status.code());
    if let Some(ohm) = reading.resistance_ohm {
        raw.insert(TankPath::Resistance, ohm);
    }
    raw
}

/// Encode a reading for a published service
///
/// Every reading path is written, so a consumer never sees a value left over
/// from an earlier write. Missing values become the invalid marker and
/// `/Remaining` is derived when the feed did not report it.
pub fn encode_for_publish(reading: &TankReading) -> RawFields {
    let opt = |v: Option<f64>| v.map(BusValue::Double).unwrap_or(BusValue::Invalid);

    let mut raw = RawFields::new();
    raw.insert(TankPath::Level, opt(reading.level));
    raw.insert(TankPath::Capacity, opt(reading.capacity));
    raw.insert(
        TankPath::FluidType,
        reading
            .fluid_type
            .map(|f| BusValue::Int(f.code()))
            .unwrap_or(BusValue::Invalid),
    );
    raw.insert(TankPath::Remaining, opt(reading.remaining_or_derived()));
    raw.insert(TankPath::Status, reading.status.code());
    raw.insert(TankPath::Resistance, opt(reading.resistance_ohm));
    raw
}

fn wrong_type(path: TankPath, expected: &'static str, value: &BusValue) -> CodecError {
    CodecError::WrongType {
        path,
        expected,
        actual: value.type_name().to_string(),
    }
}

fn finite_number(path: TankPath, value: &BusValue) -> Result<f64, CodecError> {
    let v = value
        .as_f64()
        .ok_or_else(|| wrong_type(path, "number", value))?;
    if !v.is_finite() {
        return Err(CodecError::OutOfRange {
            path,
            value: v.to_string(),
        });
    }
    Ok(v)
}

fn decode_level(value: &BusValue) -> Result<Option<f64>, CodecError> {
    if value.is_invalid() {
        return Ok(None);
    }
    let v = finite_number(TankPath::Level, value)?;
    if !(0.0..=100.0).contains(&v) {
        return Err(CodecError::OutOfRange {
            path: TankPath::Level,
            value: v.to_string(),
        });
    }
    Ok(Some(v))
}

fn decode_volume(path: TankPath, value: &BusValue) -> Result<Option<f64>, CodecError> {
    if value.is_invalid() {
        return Ok(None);
    }
    let v = finite_number(path, value)?;
    if v < 0.0 {
        return Err(CodecError::OutOfRange {
            path,
            value: v.to_string(),
        });
    }
    Ok(Some(v))
}

fn decode_fluid(value: &BusValue) -> Result<Option<FluidType>, CodecError> {
    if value.is_invalid() {
        return Ok(None);
    }
    value
        .as_i64()
        .map(|code| Some(FluidType::from_code(code)))
        .ok_or_else(|| wrong_type(TankPath::FluidType, "integer", value))
}

fn decode_status(value: &BusValue) -> Result<TankStatus, CodecError> {
    if value.is_invalid() {
        return Ok(TankStatus::Unknown);
    }
    value
        .as_i64()
        .map(TankStatus::from_code)
        .ok_or_else(|| wrong_type(TankPath::Status, "integer", value))
}

fn decode_resistance(value: &BusValue) -> Result<Option<f64>, CodecError> {
    if value.is_invalid() {
        return Ok(None);
    }
    finite_number(TankPath::Resistance, value).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_update() -> RawFields {
        RawFields::new()
            .with(TankPath::FluidType, 0i64)
            .with(TankPath::Level, 55.0)
            .with(TankPath::Capacity, 0.4)
            .with(TankPath::Status, 0i64)
    }

    #[test]
    fn test_decode_full_update() {
        let decoded = decode(&full_update());
        assert!(decoded.malformed.is_empty());
        assert_eq!(decoded.reading.fluid_type, Some(FluidType::Fuel));
        assert_eq!(decoded.reading.level, Some(55.0));
        assert_eq!(decoded.reading.capacity, Some(0.4));
        assert_eq!(decoded.reading.status, TankStatus::Ok);
        assert_eq!(decoded.reading.remaining, None);
    }

    #[test]
    fn test_malformed_field_does_not_poison_others() {
        let raw = full_update().with(TankPath::Capacity, "lots");
        let decoded = decode(&raw);
        assert_eq!(decoded.malformed, vec![TankPath::Capacity]);
        assert_eq!(decoded.reading.capacity, None);
        assert_eq!(decoded.reading.level, Some(55.0));
        assert!(!decoded.has(TankPath::Capacity));
    }

    #[test]
    fn test_level_out_of_range_is_malformed() {
        let raw = full_update().with(TankPath::Level, 130.0);
        let decoded = decode(&raw);
        assert_eq!(decoded.malformed, vec![TankPath::Level]);
        assert_eq!(decoded.reading.level, None);
    }

    #[test]
    fn test_invalid_level_is_present_but_none() {
        let raw = full_update().with(TankPath::Level, BusValue::Invalid);
        let decoded = decode(&raw);
        assert!(decoded.malformed.is_empty());
        assert!(decoded.has(TankPath::Level));
        assert_eq!(decoded.reading.level, None);
    }

    #[test]
    fn test_malformed_status_is_unknown() {
        let raw = full_update().with(TankPath::Status, "broken");
        let decoded = decode(&raw);
        assert_eq!(decoded.reading.status, TankStatus::Unknown);
    }

    #[test]
    fn test_unknown_fluid_code_is_not_an_error() {
        let raw = full_update().with(TankPath::FluidType, 9i64);
        let decoded = decode(&raw);
        assert!(decoded.malformed.is_empty());
        assert_eq!(decoded.reading.fluid_type, Some(FluidType::Unknown(9)));
    }

    #[test]
    fn test_round_trip() {
        let raw = full_update()
            .with(TankPath::Remaining, 0.2)
            .with(TankPath::Resistance, 120.5);
        assert_eq!(encode(&decode(&raw).reading), raw);
    }

    #[test]
    fn test_overlay_keeps_missing_fields() {
        let base = decode(&full_update()).reading;
        let update = decode(&RawFields::new().with(TankPath::Level, 52.0));
        let merged = update.overlay(&base);
        assert_eq!(merged.level, Some(52.0));
        assert_eq!(merged.capacity, Some(0.4));
        assert_eq!(merged.fluid_type, Some(FluidType::Fuel));
    }

    #[test]
    fn test_overlay_drops_stale_remaining() {
        let base = decode(&full_update().with(TankPath::Remaining, 0.22)).reading;
        let update = decode(&RawFields::new().with(TankPath::Level, 10.0));
        let merged = update.overlay(&base);
        assert_eq!(merged.remaining, None);
        assert_eq!(merged.remaining_or_derived(), Some(0.4 * 10.0 / 100.0));
    }

    #[test]
    fn test_decode_instance() {
        assert_eq!(decode_instance(&RawFields::new()), Ok(None));
        let raw = RawFields::new().with(TankPath::Instance, 3i64);
        assert_eq!(decode_instance(&raw), Ok(Some(3)));
        let raw = RawFields::new().with(TankPath::Instance, -3i64);
        assert!(decode_instance(&raw).is_err());
        let raw = RawFields::new().with(TankPath::Instance, "three");
        assert!(decode_instance(&raw).is_err());
    }

    #[test]
    fn test_encode_for_publish_writes_every_reading_path() {
        let reading = decode(&full_update()).reading;
        let raw = encode_for_publish(&reading);
        for path in TankPath::ALL.iter().filter(|p| p.is_reading()) {
            assert!(raw.contains(*path), "missing {}", path);
        }
        assert_eq!(raw.get(TankPath::Remaining), Some(&BusValue::Double(0.4 * 55.0 / 100.0)));
        assert_eq!(raw.get(TankPath::Resistance), Some(&BusValue::Invalid));
    }
}
