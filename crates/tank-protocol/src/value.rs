//! Raw attribute values
//!
//! A bus attribute carries a small variant type. Services signal "no valid
//! reading" with a dedicated invalid marker (shown as an empty text by the
//! platform tools) rather than by omitting the path.

use std::fmt;

/// A raw typed attribute value as carried on the bus
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BusValue {
    /// Integer value (enumerations, counters, flags)
    Int(i64),
    /// Floating point value (levels, volumes)
    Double(f64),
    /// Text value (names)
    Text(String),
    /// No valid value
    Invalid,
}

impl BusValue {
    /// Returns true for the invalid marker
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    /// Numeric view of the value; integers widen to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Text(_) | Self::Invalid => None,
        }
    }

    /// Integer view of the value; doubles are accepted only when integral
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Double(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Text view of the value
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for BusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Text(s) => write!(f, "{:?}", s),
            // Platform tools render invalid values as empty text
            Self::Invalid => write!(f, "\"\""),
        }
    }
}

impl From<i64> for BusValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for BusValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for BusValue {
    fn from(v: bool) -> Self {
        // The GUI expects 1/0 rather than a boolean type
        Self::Int(i64::from(v))
    }
}

impl From<&str> for BusValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for BusValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(BusValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(BusValue::Double(2.0).as_i64(), Some(2));
        assert_eq!(BusValue::Double(2.5).as_i64(), None);
        assert_eq!(BusValue::Text("x".into()).as_f64(), None);
        assert_eq!(BusValue::Invalid.as_i64(), None);
    }

    #[test]
    fn test_bool_is_numeric() {
        assert_eq!(BusValue::from(true), BusValue::Int(1));
        assert_eq!(BusValue::from(false), BusValue::Int(0));
    }

    #[test]
    fn test_invalid_displays_as_empty_text() {
        assert_eq!(BusValue::Invalid.to_string(), "\"\"");
        assert!(BusValue::Invalid.is_invalid());
    }
}
