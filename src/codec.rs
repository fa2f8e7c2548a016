//! # BSB Value Codec
//!
//! Conversion between value bytes and numbers, plus the payload shapes
//! each command wraps around those bytes.
//!
//! Scaling is two-stage: [`ValueCodec`] turns the raw integer into a
//! native number (temperatures divide by their scale), then [`Scaling`]
//! applies the per-field `divisor` and `factor`:
//!
//! ```text
//! engineering = native / divisor * factor
//! native      = round(engineering * divisor / factor)
//! ```
//!
//! ## Payload Shapes
//!
//! | Command | Payload |
//! |---------|---------|
//! | Get | empty |
//! | Ret | status, value |
//! | Set | enable, value |
//! | Inf (room temperature) | hi, lo, 0x00 |
//! | Inf (other) | enable, value |

use heapless::Vec;

use crate::constants::{
    ENABLE_BYTE_NULL, ENABLE_BYTE_NULLABLE, ROOM_TEMPERATURE_SCALE, STATUS_NULL_FLAG,
    TEMPERATURE_SCALE,
};
use crate::error::{BsbError, BsbResult};
use crate::telegram::Payload;
use crate::value::ValueType;

/// Encoded value bytes (at most 4)
pub type RawValue = Vec<u8, 4>;

// ============================================================================
// Value Codec
// ============================================================================

/// Raw bytes to native numbers and back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueCodec {
    /// Raw counts per degree for [`ValueType::Temperature`]
    pub temperature_scale: f64,
    /// Raw counts per degree for [`ValueType::RoomTemperature`]
    pub room_temperature_scale: f64,
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self {
            temperature_scale: TEMPERATURE_SCALE,
            room_temperature_scale: ROOM_TEMPERATURE_SCALE,
        }
    }
}

impl ValueCodec {
    /// Codec with custom temperature scales
    pub fn with_scales(temperature_scale: f64, room_temperature_scale: f64) -> Self {
        Self {
            temperature_scale,
            room_temperature_scale,
        }
    }

    fn scale_of(&self, value_type: ValueType) -> f64 {
        match value_type {
            ValueType::Temperature => self.temperature_scale,
            ValueType::RoomTemperature => self.room_temperature_scale,
            _ => 1.0,
        }
    }

    /// Decode value bytes to a native number
    pub fn decode(&self, value_type: ValueType, bytes: &[u8]) -> BsbResult<f64> {
        if bytes.len() != value_type.width() {
            return Err(BsbError::payload_length(value_type.width(), bytes.len()));
        }

        let raw = match value_type {
            ValueType::UInt8 => i64::from(bytes[0]),
            ValueType::Int8 => i64::from(bytes[0] as i8),
            ValueType::Int16 | ValueType::Temperature | ValueType::RoomTemperature => {
                i64::from(i16::from_be_bytes([bytes[0], bytes[1]]))
            }
            ValueType::Int32 => {
                i64::from(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        };

        Ok(raw as f64 / self.scale_of(value_type))
    }

    /// Encode a native number to value bytes.
    ///
    /// Fails with `OutOfRange` when the rounded raw integer does not fit
    /// the type, or when the input is not finite.
    pub fn encode(&self, value_type: ValueType, native: f64) -> BsbResult<RawValue> {
        if !native.is_finite() {
            return Err(BsbError::out_of_range(native, "value is not finite"));
        }

        let scaled = (native * self.scale_of(value_type)).round();
        let (min, max) = value_type.raw_range();
        if scaled < min as f64 || scaled > max as f64 {
            return Err(BsbError::out_of_range(
                native,
                format!("{} raw range is {}..={}", value_type, min, max),
            ));
        }
        let raw = scaled as i64;

        let mut out = RawValue::new();
        // Widths are at most 4, the capacity of RawValue
        let _ = match value_type {
            ValueType::UInt8 => out.push(raw as u8).map_err(|_| ()),
            ValueType::Int8 => out.push(raw as i8 as u8).map_err(|_| ()),
            ValueType::Int16 | ValueType::Temperature | ValueType::RoomTemperature => {
                out.extend_from_slice(&(raw as i16).to_be_bytes())
            }
            ValueType::Int32 => out.extend_from_slice(&(raw as i32).to_be_bytes()),
        };
        Ok(out)
    }
}

/// Decode value bytes with the default temperature scales
pub fn decode_value(value_type: ValueType, bytes: &[u8]) -> BsbResult<f64> {
    ValueCodec::default().decode(value_type, bytes)
}

/// Encode a number with the default temperature scales
pub fn encode_value(value_type: ValueType, native: f64) -> BsbResult<RawValue> {
    ValueCodec::default().encode(value_type, native)
}

// ============================================================================
// Field Scaling
// ============================================================================

/// Per-field `divisor` and `factor`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    /// Divides the native value (> 0)
    pub divisor: f64,
    /// Multiplies the native value (non-zero)
    pub factor: f64,
}

impl Default for Scaling {
    fn default() -> Self {
        Self {
            divisor: 1.0,
            factor: 1.0,
        }
    }
}

impl Scaling {
    /// Create a scaling pair
    pub fn new(divisor: f64, factor: f64) -> Self {
        Self { divisor, factor }
    }

    /// Native to engineering
    #[inline]
    pub fn to_engineering(&self, native: f64) -> f64 {
        native / self.divisor * self.factor
    }

    /// Engineering to native
    #[inline]
    pub fn to_native(&self, engineering: f64) -> f64 {
        engineering * self.divisor / self.factor
    }
}

// ============================================================================
// Payload Shapes
// ============================================================================

/// Split a RET payload into its validity flag and value bytes
pub fn split_ret_payload(payload: &[u8]) -> BsbResult<(bool, &[u8])> {
    match payload.split_first() {
        Some((status, value)) => Ok((status & STATUS_NULL_FLAG == 0, value)),
        None => Err(BsbError::payload_length(1, 0)),
    }
}

/// Value bytes of an INF payload
pub fn inf_value_bytes(value_type: ValueType, payload: &[u8]) -> BsbResult<&[u8]> {
    let width = value_type.width();
    match value_type {
        ValueType::RoomTemperature => {
            if payload.len() != width + 1 {
                return Err(BsbError::payload_length(width + 1, payload.len()));
            }
            Ok(&payload[..width])
        }
        _ => match payload.split_first() {
            Some((_, value)) => Ok(value),
            None => Err(BsbError::payload_length(width + 1, 0)),
        },
    }
}

/// Build a SET payload.
///
/// A nullable enable byte is replaced by the null flag when the value is zero.
pub fn set_payload(enable_byte: u8, value: &[u8], is_zero: bool) -> Payload {
    let flag = if enable_byte == ENABLE_BYTE_NULLABLE && is_zero {
        ENABLE_BYTE_NULL
    } else {
        enable_byte
    };

    let mut payload = Payload::new();
    // One flag plus at most four value bytes
    let _ = payload.push(flag);
    let _ = payload.extend_from_slice(value);
    payload
}

/// Build an INF payload
pub fn inf_payload(value_type: ValueType, enable_byte: u8, value: &[u8]) -> Payload {
    let mut payload = Payload::new();
    match value_type {
        ValueType::RoomTemperature => {
            let _ = payload.extend_from_slice(value);
            let _ = payload.push(0x00);
        }
        _ => {
            let _ = payload.push(enable_byte);
            let _ = payload.extend_from_slice(value);
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_uint8() {
        assert_eq!(decode_value(ValueType::UInt8, &[0x42]).unwrap(), 66.0);
        assert_eq!(decode_value(ValueType::UInt8, &[0xFF]).unwrap(), 255.0);
    }

    #[test]
    fn test_decode_int8_negative() {
        assert_eq!(decode_value(ValueType::Int8, &[0xFE]).unwrap(), -2.0);
    }

    #[test]
    fn test_decode_int16_and_int32_big_endian() {
        assert_eq!(decode_value(ValueType::Int16, &[0x00, 0xEB]).unwrap(), 235.0);
        assert_eq!(
            decode_value(ValueType::Int32, &[0xFF, 0xFF, 0xFF, 0xFE]).unwrap(),
            -2.0
        );
    }

    #[test]
    fn test_decode_temperature() {
        assert_eq!(
            decode_value(ValueType::Temperature, &[0x05, 0x60]).unwrap(),
            21.5
        );
        assert_eq!(
            decode_value(ValueType::Temperature, &[0xFF, 0xC0]).unwrap(),
            -1.0
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        let err = decode_value(ValueType::Int16, &[0x01, 0x02, 0x03]).unwrap_err();
        assert_eq!(err, BsbError::payload_length(2, 3));
    }

    #[test]
    fn test_temperature_scales_are_independent() {
        let codec = ValueCodec::with_scales(64.0, 10.0);
        assert_eq!(codec.decode(ValueType::Temperature, &[0x00, 0x40]).unwrap(), 1.0);
        assert_eq!(
            codec.decode(ValueType::RoomTemperature, &[0x00, 0x40]).unwrap(),
            6.4
        );
    }

    #[test]
    fn test_encode_temperature() {
        assert_eq!(
            encode_value(ValueType::Temperature, 20.0).unwrap().as_slice(),
            &[0x05, 0x00]
        );
    }

    #[test]
    fn test_encode_out_of_range() {
        assert!(matches!(
            encode_value(ValueType::UInt8, 256.0),
            Err(BsbError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode_value(ValueType::Int8, -129.0),
            Err(BsbError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode_value(ValueType::Temperature, 600.0),
            Err(BsbError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode_value(ValueType::Int16, f64::NAN),
            Err(BsbError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_scaling() {
        let scaling = Scaling::new(10.0, 1.0);
        assert_eq!(scaling.to_engineering(235.0), 23.5);
        assert_eq!(scaling.to_native(23.5), 235.0);
    }

    #[test]
    fn test_split_ret_payload() {
        let (valid, value) = split_ret_payload(&[0x00, 0x05, 0x60]).unwrap();
        assert!(valid);
        assert_eq!(value, &[0x05, 0x60]);

        let (valid, _) = split_ret_payload(&[0x01, 0x00, 0x00]).unwrap();
        assert!(!valid);

        assert!(split_ret_payload(&[]).is_err());
    }

    #[test]
    fn test_set_payload_null_substitution() {
        assert_eq!(set_payload(0x06, &[0x00], true).as_slice(), &[0x05, 0x00]);
        assert_eq!(set_payload(0x06, &[0x01], false).as_slice(), &[0x06, 0x01]);
        assert_eq!(set_payload(0x01, &[0x00], true).as_slice(), &[0x01, 0x00]);
    }

    #[test]
    fn test_inf_payload_shapes() {
        assert_eq!(
            inf_payload(ValueType::Temperature, 0x01, &[0x05, 0x00]).as_slice(),
            &[0x01, 0x05, 0x00]
        );
        assert_eq!(
            inf_payload(ValueType::RoomTemperature, 0x01, &[0x05, 0x00]).as_slice(),
            &[0x05, 0x00, 0x00]
        );
        assert_eq!(
            inf_value_bytes(ValueType::RoomTemperature, &[0x05, 0x00, 0x00]).unwrap(),
            &[0x05, 0x00]
        );
        assert_eq!(
            inf_value_bytes(ValueType::Temperature, &[0x01, 0x05, 0x00]).unwrap(),
            &[0x05, 0x00]
        );
    }

    fn value_type() -> impl Strategy<Value = ValueType> {
        prop_oneof![
            Just(ValueType::UInt8),
            Just(ValueType::Int8),
            Just(ValueType::Int16),
            Just(ValueType::Int32),
            Just(ValueType::Temperature),
            Just(ValueType::RoomTemperature),
        ]
    }

    proptest! {
        // Any representable raw integer survives decode(encode(x)) exactly
        #[test]
        fn prop_raw_roundtrip(vt in value_type(), seed in any::<i64>()) {
            let codec = ValueCodec::default();
            let (min, max) = vt.raw_range();
            let raw = min + (seed.rem_euclid(max - min + 1));
            let native = raw as f64 / if vt.is_temperature() { 64.0 } else { 1.0 };

            let bytes = codec.encode(vt, native).unwrap();
            prop_assert_eq!(bytes.len(), vt.width());
            prop_assert_eq!(codec.decode(vt, &bytes).unwrap(), native);
        }

        // Engineering values come back within half a raw step
        #[test]
        fn prop_engineering_roundtrip(
            vt in value_type(),
            x in -100.0f64..100.0,
            divisor in prop_oneof![Just(1.0f64), Just(10.0), Just(60.0)],
        ) {
            let codec = ValueCodec::default();
            let scaling = Scaling::new(divisor, 1.0);
            if let Ok(bytes) = codec.encode(vt, scaling.to_native(x)) {
                let back = scaling.to_engineering(codec.decode(vt, &bytes).unwrap());
                let step = if vt.is_temperature() { 1.0 / 64.0 } else { 1.0 } / divisor;
                prop_assert!((back - x).abs() <= step / 2.0 + 1e-9);
            }
        }
    }
}
