//! # Field Registry
//!
//! Ordered set of the logical fields multiplexed over the bus.
//!
//! Each field is described once by a [`FieldDescriptor`] and never changes
//! after registration. Registration order is the scheduler's tie-break
//! order.
//!
//! ## Field Kinds
//!
//! | Kind | Writable | Published as |
//! |------|----------|--------------|
//! | Sensor | no | number |
//! | Number | yes (room temperature only by broadcast) | number |
//! | Switch | yes | number and on/off state |
//! | Text | no | string |

use std::time::Duration;

use crate::codec::{
    inf_payload, inf_value_bytes, set_payload, split_ret_payload, Scaling, ValueCodec,
};
use crate::constants::{DEFAULT_ENABLE_BYTE, DEFAULT_UPDATE_INTERVAL};
use crate::error::{BsbError, BsbResult};
use crate::telegram::{Command, Payload};
use crate::value::{DecodedValue, ValueType};

/// Identifier of a logical field
pub type FieldId = u32;

/// Closed set of field kinds and their write constraints
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize),
    serde(tag = "kind", rename_all = "snake_case")
)]
pub enum FieldKind {
    /// Read-only numeric value
    Sensor,
    /// Numeric setpoint
    Number {
        /// Lowest accepted value
        min: f64,
        /// Highest accepted value
        max: f64,
        /// Write granularity relative to `min` (0 disables snapping)
        step: f64,
    },
    /// Two-state value
    Switch {
        /// Value meaning "on"
        on_value: f64,
        /// Value meaning "off"
        off_value: f64,
    },
    /// Read-only text
    Text,
}

impl FieldKind {
    /// Whether this kind accepts writes
    #[inline]
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Number { .. } | Self::Switch { .. })
    }

    /// Get kind name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::Number { .. } => "number",
            Self::Switch { .. } => "switch",
            Self::Text => "text",
        }
    }
}

// ============================================================================
// Field Descriptor
// ============================================================================

/// Static description of one field.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use voltage_bsb::{FieldDescriptor, ValueType};
///
/// let outside = FieldDescriptor::sensor(1, 0x3D2D0215)
///     .with_value_type(ValueType::Temperature)
///     .with_update_interval(Duration::from_secs(60));
///
/// assert!(!outside.is_writable());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Unique id within the registry
    pub field_id: FieldId,
    /// Parameter number on the bus (0 = never polled)
    pub parameter_number: u32,
    /// Flag byte in front of written values
    pub enable_byte: u8,
    /// Wire encoding of the value
    pub value_type: ValueType,
    /// Native value is divided by this (> 0)
    pub divisor: f64,
    /// Native value is multiplied by this (non-zero)
    pub factor: f64,
    /// Time between two polls
    pub update_interval: Duration,
    /// Response timeout and backoff, engine default when `None`
    pub retry_interval: Option<Duration>,
    /// Attempts per poll, engine default when `None`
    pub retry_count: Option<u8>,
    /// Written by broadcast INF instead of SET, never polled
    pub broadcast: bool,
    /// Kind and write constraints
    pub kind: FieldKind,
}

impl FieldDescriptor {
    fn with_kind(field_id: FieldId, parameter_number: u32, kind: FieldKind) -> Self {
        Self {
            field_id,
            parameter_number,
            enable_byte: DEFAULT_ENABLE_BYTE,
            value_type: ValueType::Temperature,
            divisor: 1.0,
            factor: 1.0,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            retry_interval: None,
            retry_count: None,
            broadcast: false,
            kind,
        }
    }

    /// Read-only numeric field
    pub fn sensor(field_id: FieldId, parameter_number: u32) -> Self {
        Self::with_kind(field_id, parameter_number, FieldKind::Sensor)
    }

    /// Writable numeric field
    pub fn number(field_id: FieldId, parameter_number: u32, min: f64, max: f64, step: f64) -> Self {
        Self::with_kind(field_id, parameter_number, FieldKind::Number { min, max, step })
    }

    /// Two-state field, INT8 by default
    pub fn switch(field_id: FieldId, parameter_number: u32, on_value: f64, off_value: f64) -> Self {
        let mut descriptor = Self::with_kind(
            field_id,
            parameter_number,
            FieldKind::Switch {
                on_value,
                off_value,
            },
        );
        descriptor.value_type = ValueType::Int8;
        descriptor
    }

    /// Read-only text field
    pub fn text(field_id: FieldId, parameter_number: u32) -> Self {
        Self::with_kind(field_id, parameter_number, FieldKind::Text)
    }

    /// Set enable byte.
    pub fn with_enable_byte(mut self, enable_byte: u8) -> Self {
        self.enable_byte = enable_byte;
        self
    }

    /// Set value type.
    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    /// Set divisor.
    pub fn with_divisor(mut self, divisor: f64) -> Self {
        self.divisor = divisor;
        self
    }

    /// Set factor.
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Set update interval.
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Override the engine retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    /// Override the engine retry count.
    pub fn with_retry_count(mut self, count: u8) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Write by broadcast.
    pub fn with_broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    /// Divisor and factor of this field
    #[inline]
    pub fn scaling(&self) -> Scaling {
        Scaling::new(self.divisor, self.factor)
    }

    /// Whether the scheduler polls this field
    #[inline]
    pub fn is_pollable(&self) -> bool {
        self.parameter_number != 0 && !self.broadcast
    }

    /// Whether writes are accepted.
    ///
    /// The controller only takes room temperatures as broadcasts.
    pub fn is_writable(&self) -> bool {
        match self.kind {
            FieldKind::Number { .. } if self.value_type == ValueType::RoomTemperature => {
                self.broadcast
            }
            kind => kind.is_writable(),
        }
    }

    /// Check a requested write and return the value that will be sent.
    ///
    /// Number writes are snapped to `step` relative to `min`. The wire
    /// range is checked with `codec`, which must be the engine's codec.
    pub fn validate_write(&self, codec: &ValueCodec, value: f64) -> BsbResult<f64> {
        if !self.is_writable() {
            return Err(BsbError::FieldNotWritable {
                field_id: self.field_id,
            });
        }
        if !value.is_finite() {
            return Err(BsbError::out_of_range(value, "value is not finite"));
        }

        let value = match self.kind {
            FieldKind::Number { min, max, step } => {
                if value < min || value > max {
                    return Err(BsbError::out_of_range(
                        value,
                        format!("allowed range is {}..={}", min, max),
                    ));
                }
                snap_to_step(value, min, max, step)
            }
            FieldKind::Switch {
                on_value,
                off_value,
            } => {
                if value != on_value && value != off_value {
                    return Err(BsbError::out_of_range(
                        value,
                        format!("switch accepts {} or {}", on_value, off_value),
                    ));
                }
                value
            }
            FieldKind::Sensor | FieldKind::Text => value,
        };

        // Reject values the wire type cannot carry before they are queued
        self.encode_write(codec, value)?;
        Ok(value)
    }

    /// Build the command and payload carrying `value`
    pub fn encode_write(&self, codec: &ValueCodec, value: f64) -> BsbResult<(Command, Payload)> {
        let raw = codec.encode(self.value_type, self.scaling().to_native(value))?;
        if self.broadcast {
            Ok((
                Command::Inf,
                inf_payload(self.value_type, self.enable_byte, &raw),
            ))
        } else {
            let is_zero = raw.iter().all(|b| *b == 0);
            Ok((Command::Set, set_payload(self.enable_byte, &raw, is_zero)))
        }
    }

    /// Decode a RET or INF payload for this field
    pub fn decode(
        &self,
        codec: &ValueCodec,
        command: Command,
        payload: &[u8],
    ) -> BsbResult<DecodedValue> {
        if self.kind == FieldKind::Text {
            return Ok(DecodedValue {
                field_id: self.field_id,
                raw: Payload::from_slice(payload)
                    .map_err(|_| BsbError::frame_invalid("Text payload too large"))?,
                engineering_value: 0.0,
                valid: true,
            });
        }

        let (valid, bytes) = match command {
            Command::Ret => split_ret_payload(payload)?,
            Command::Inf => (true, inf_value_bytes(self.value_type, payload)?),
            other => {
                return Err(BsbError::frame_invalid(format!(
                    "{} carries no value",
                    other
                )))
            }
        };

        let engineering_value = if valid {
            self.scaling()
                .to_engineering(codec.decode(self.value_type, bytes)?)
        } else {
            f64::NAN
        };

        Ok(DecodedValue {
            field_id: self.field_id,
            raw: Payload::from_slice(bytes)
                .map_err(|_| BsbError::frame_invalid("Value payload too large"))?,
            engineering_value,
            valid,
        })
    }

    fn validate(&self) -> BsbResult<()> {
        if !(self.divisor > 0.0 && self.divisor.is_finite()) {
            return Err(BsbError::configuration(format!(
                "Field 0x{:08X}: divisor must be positive, got {}",
                self.field_id, self.divisor
            )));
        }
        if self.factor == 0.0 || !self.factor.is_finite() {
            return Err(BsbError::configuration(format!(
                "Field 0x{:08X}: factor must be non-zero",
                self.field_id
            )));
        }
        if self.update_interval.is_zero() {
            return Err(BsbError::configuration(format!(
                "Field 0x{:08X}: update interval must be non-zero",
                self.field_id
            )));
        }
        if let FieldKind::Number { min, max, step } = self.kind {
            if min > max || step < 0.0 {
                return Err(BsbError::configuration(format!(
                    "Field 0x{:08X}: invalid number range {}..={} step {}",
                    self.field_id, min, max, step
                )));
            }
        }
        Ok(())
    }
}

fn snap_to_step(value: f64, min: f64, max: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    let snapped = min + ((value - min) / step).round() * step;
    if snapped > max {
        snapped - step
    } else {
        snapped
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Insertion-ordered set of field descriptors
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    fields: Vec<FieldDescriptor>,
}

impl FieldRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field.
    ///
    /// Fails with `DuplicateFieldId` or a configuration error.
    pub fn register(&mut self, descriptor: FieldDescriptor) -> BsbResult<()> {
        if self.get(descriptor.field_id).is_some() {
            return Err(BsbError::DuplicateFieldId {
                field_id: descriptor.field_id,
            });
        }
        descriptor.validate()?;
        self.fields.push(descriptor);
        Ok(())
    }

    /// Look up a field by id
    pub fn get(&self, field_id: FieldId) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|d| d.field_id == field_id)
    }

    /// Registration index of a field
    pub fn index_of(&self, field_id: FieldId) -> Option<usize> {
        self.fields.iter().position(|d| d.field_id == field_id)
    }

    /// Field at a registration index
    #[inline]
    pub fn at(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    /// First field registered for a parameter number
    pub fn find_by_parameter(&self, parameter_number: u32) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|d| d.parameter_number == parameter_number)
    }

    /// Iterate in registration order
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Number of fields
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field is registered
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = FieldRegistry::new();
        registry.register(FieldDescriptor::sensor(1, 100)).unwrap();
        let err = registry.register(FieldDescriptor::sensor(1, 200)).unwrap_err();
        assert_eq!(err, BsbError::DuplicateFieldId { field_id: 1 });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_invalid_descriptors() {
        let mut registry = FieldRegistry::new();
        assert!(registry
            .register(FieldDescriptor::sensor(1, 100).with_divisor(0.0))
            .is_err());
        assert!(registry
            .register(FieldDescriptor::sensor(2, 100).with_factor(0.0))
            .is_err());
        assert!(registry
            .register(FieldDescriptor::number(3, 100, 10.0, 5.0, 1.0))
            .is_err());
        assert!(registry
            .register(FieldDescriptor::sensor(4, 100).with_update_interval(Duration::ZERO))
            .is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_order_and_lookup() {
        let mut registry = FieldRegistry::new();
        registry.register(FieldDescriptor::sensor(10, 500)).unwrap();
        registry.register(FieldDescriptor::sensor(20, 600)).unwrap();
        registry.register(FieldDescriptor::text(30, 500)).unwrap();

        assert_eq!(registry.index_of(20), Some(1));
        assert_eq!(registry.find_by_parameter(500).unwrap().field_id, 10);
        assert!(registry.find_by_parameter(700).is_none());
        let ids: Vec<FieldId> = registry.iter().map(|d| d.field_id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn test_writability() {
        assert!(!FieldDescriptor::sensor(1, 1).is_writable());
        assert!(!FieldDescriptor::text(1, 1).is_writable());
        assert!(FieldDescriptor::switch(1, 1, 1.0, 0.0).is_writable());
        assert!(FieldDescriptor::number(1, 1, 0.0, 30.0, 0.5).is_writable());

        let room = FieldDescriptor::number(1, 1, 0.0, 30.0, 0.5)
            .with_value_type(ValueType::RoomTemperature);
        assert!(!room.is_writable());
        assert!(room.with_broadcast(true).is_writable());
    }

    #[test]
    fn test_validate_write_number_snaps_to_step() {
        let codec = ValueCodec::default();
        let field = FieldDescriptor::number(1, 1, 8.0, 30.0, 0.5);
        assert_eq!(field.validate_write(&codec, 20.3).unwrap(), 20.5);
        assert_eq!(field.validate_write(&codec, 8.0).unwrap(), 8.0);
        assert!(matches!(
            field.validate_write(&codec, 31.0),
            Err(BsbError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_write_switch() {
        let codec = ValueCodec::default();
        let field = FieldDescriptor::switch(1, 1, 1.0, 0.0);
        assert_eq!(field.validate_write(&codec, 1.0).unwrap(), 1.0);
        assert!(field.validate_write(&codec, 2.0).is_err());
        assert_eq!(
            FieldDescriptor::sensor(7, 1).validate_write(&codec, 1.0).unwrap_err(),
            BsbError::FieldNotWritable { field_id: 7 }
        );
    }

    #[test]
    fn test_validate_write_checks_wire_range() {
        let codec = ValueCodec::default();
        let field = FieldDescriptor::number(1, 1, 0.0, 1000.0, 1.0).with_value_type(ValueType::UInt8);
        assert!(matches!(
            field.validate_write(&codec, 300.0),
            Err(BsbError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_write_uses_given_codec() {
        let room = FieldDescriptor::number(1, 1, -1000.0, 1000.0, 0.0)
            .with_value_type(ValueType::RoomTemperature)
            .with_broadcast(true);
        // 600 * 64 overflows INT16, 600 * 10 does not
        assert!(room.validate_write(&ValueCodec::default(), 600.0).is_err());
        assert_eq!(
            room.validate_write(&ValueCodec::with_scales(64.0, 10.0), 600.0),
            Ok(600.0)
        );

        let boiler = FieldDescriptor::number(2, 1, 0.0, 100.0, 0.0);
        assert!(boiler.validate_write(&ValueCodec::default(), 60.0).is_ok());
        assert!(matches!(
            boiler.validate_write(&ValueCodec::with_scales(640.0, 64.0), 60.0),
            Err(BsbError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_encode_write_set_and_inf() {
        let codec = ValueCodec::default();

        let switch = FieldDescriptor::switch(1, 200, 1.0, 0.0);
        let (command, payload) = switch.encode_write(&codec, 1.0).unwrap();
        assert_eq!(command, Command::Set);
        assert_eq!(payload.as_slice(), &[0x01, 0x01]);

        let room = FieldDescriptor::number(2, 300, 5.0, 30.0, 0.5)
            .with_value_type(ValueType::RoomTemperature)
            .with_broadcast(true);
        let (command, payload) = room.encode_write(&codec, 20.0).unwrap();
        assert_eq!(command, Command::Inf);
        assert_eq!(payload.as_slice(), &[0x05, 0x00, 0x00]);
    }

    #[test]
    fn test_decode_ret_with_scaling() {
        let field = FieldDescriptor::sensor(1, 100)
            .with_value_type(ValueType::Int16)
            .with_divisor(10.0);
        let value = field
            .decode(&ValueCodec::default(), Command::Ret, &[0x00, 0x00, 0xEB])
            .unwrap();
        assert!(value.valid);
        assert_eq!(value.engineering_value, 23.5);
        assert_eq!(value.raw.as_slice(), &[0x00, 0xEB]);
    }

    #[test]
    fn test_decode_null_value() {
        let field = FieldDescriptor::sensor(1, 100);
        let value = field
            .decode(&ValueCodec::default(), Command::Ret, &[0x01, 0x00, 0x00])
            .unwrap();
        assert!(!value.valid);
    }

    #[test]
    fn test_decode_text() {
        let field = FieldDescriptor::text(1, 100);
        let value = field
            .decode(&ValueCodec::default(), Command::Ret, b"RVS43.222\0")
            .unwrap();
        assert_eq!(value.text(), "RVS43.222");
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        let field = FieldDescriptor::sensor(1, 100).with_value_type(ValueType::Int16);
        let err = field
            .decode(&ValueCodec::default(), Command::Ret, &[0x00, 0x00, 0x00, 0x01])
            .unwrap_err();
        assert_eq!(err, BsbError::payload_length(2, 3));
    }
}
