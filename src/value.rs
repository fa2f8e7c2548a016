//! # BSB Value Types
//!
//! Wire encodings of parameter values and the transient decode result.
//!
//! | Type | Bytes | Aliases |
//! |------|-------|---------|
//! | UInt8 | 1 | uint8, u8, byte |
//! | Int8 | 1 | int8, i8 |
//! | Int16 | 2 | int16, i16 |
//! | Int32 | 4 | int32, i32 |
//! | Temperature | 2 | temperature, temp |
//! | RoomTemperature | 2 | roomtemperature, room_temperature |

use std::fmt;
use std::str::FromStr;

use crate::error::BsbError;
use crate::registry::FieldId;
use crate::telegram::Payload;

/// Wire encoding of a parameter value.
///
/// # Example
///
/// ```rust
/// use voltage_bsb::ValueType;
///
/// let vt: ValueType = "temperature".parse().unwrap();
/// assert_eq!(vt, ValueType::Temperature);
/// assert_eq!(vt.width(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub enum ValueType {
    /// Unsigned 8-bit integer
    #[cfg_attr(feature = "serde", serde(rename = "uint8"))]
    UInt8,
    /// Signed 8-bit integer
    #[cfg_attr(feature = "serde", serde(rename = "int8"))]
    Int8,
    /// Signed 16-bit integer, big-endian
    #[cfg_attr(feature = "serde", serde(rename = "int16"))]
    Int16,
    /// Signed 32-bit integer, big-endian
    #[cfg_attr(feature = "serde", serde(rename = "int32"))]
    Int32,
    /// Fixed-point temperature, big-endian signed 16-bit
    #[cfg_attr(feature = "serde", serde(rename = "temperature"))]
    Temperature,
    /// Fixed-point room temperature, big-endian signed 16-bit
    #[cfg_attr(feature = "serde", serde(rename = "room_temperature"))]
    RoomTemperature,
}

impl ValueType {
    /// Number of value bytes on the wire
    #[inline]
    pub fn width(self) -> usize {
        match self {
            Self::UInt8 | Self::Int8 => 1,
            Self::Int16 | Self::Temperature | Self::RoomTemperature => 2,
            Self::Int32 => 4,
        }
    }

    /// Inclusive range of the raw integer
    pub fn raw_range(self) -> (i64, i64) {
        match self {
            Self::UInt8 => (0, i64::from(u8::MAX)),
            Self::Int8 => (i64::from(i8::MIN), i64::from(i8::MAX)),
            Self::Int16 | Self::Temperature | Self::RoomTemperature => {
                (i64::from(i16::MIN), i64::from(i16::MAX))
            }
            Self::Int32 => (i64::from(i32::MIN), i64::from(i32::MAX)),
        }
    }

    /// Whether the raw integer is a scaled temperature
    #[inline]
    pub fn is_temperature(self) -> bool {
        matches!(self, Self::Temperature | Self::RoomTemperature)
    }

    /// Get type name for logging
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Temperature => "temperature",
            Self::RoomTemperature => "room_temperature",
        }
    }
}

impl Default for ValueType {
    fn default() -> Self {
        Self::Temperature
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = BsbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uint8" | "u8" | "byte" => Ok(Self::UInt8),
            "int8" | "i8" => Ok(Self::Int8),
            "int16" | "i16" => Ok(Self::Int16),
            "int32" | "i32" => Ok(Self::Int32),
            "temperature" | "temp" => Ok(Self::Temperature),
            "roomtemperature" | "room_temperature" => Ok(Self::RoomTemperature),
            _ => Err(BsbError::configuration(format!(
                "Unsupported value type: {}",
                s
            ))),
        }
    }
}

// ============================================================================
// Decoded Values
// ============================================================================

/// Result of decoding one response for a field
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue {
    /// Field the value belongs to
    pub field_id: FieldId,
    /// Value bytes with any status or enable byte removed
    pub raw: Payload,
    /// Value after scaling
    pub engineering_value: f64,
    /// False when the controller reports the value as not set
    pub valid: bool,
}

impl DecodedValue {
    /// Raw bytes as text, NUL padding removed
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw)
            .trim_matches('\0')
            .to_string()
    }
}
