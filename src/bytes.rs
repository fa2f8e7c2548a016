//! # Parameter Number Byte Layout
//!
//! The 32-bit parameter number travels in two different layouts depending
//! on the telegram direction.
//!
//! ## Naming Convention
//!
//! Uses ABCD notation where:
//! - A = Most significant byte (MSB)
//! - B = Second byte
//! - C = Third byte
//! - D = Least significant byte (LSB)
//!
//! For parameter number `0x3D2D0215`:
//! - `Response (ABCD)`: \[0x3D, 0x2D, 0x02, 0x15\] (RET, ACK, NACK)
//! - `Request (BACD)`: \[0x2D, 0x3D, 0x02, 0x15\] (GET, SET, INF sent by us)

use std::fmt;

/// Byte layout of the parameter number inside a telegram.
///
/// # Example
///
/// ```rust
/// use voltage_bsb::ParameterLayout;
///
/// let wire = ParameterLayout::Request.to_bytes(0x3D2D0215);
/// assert_eq!(wire, [0x2D, 0x3D, 0x02, 0x15]);
/// assert_eq!(ParameterLayout::Request.from_bytes(wire), 0x3D2D0215);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ParameterLayout {
    /// BACD: the two high bytes swapped
    ///
    /// Used by every telegram that asks the controller for something.
    Request,

    /// ABCD: plain big-endian
    ///
    /// Used by the controller's answers and, on most controllers, by the
    /// INF telegrams it broadcasts.
    Response,
}

impl ParameterLayout {
    /// Get descriptive name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "BACD (Request)",
            Self::Response => "ABCD (Response)",
        }
    }

    /// Serialize a parameter number.
    #[inline]
    pub fn to_bytes(&self, parameter_number: u32) -> [u8; 4] {
        let [a, b, c, d] = parameter_number.to_be_bytes();
        match self {
            Self::Request => [b, a, c, d],
            Self::Response => [a, b, c, d],
        }
    }

    /// Parse a parameter number.
    #[inline]
    pub fn from_bytes(&self, bytes: [u8; 4]) -> u32 {
        let [p0, p1, p2, p3] = bytes;
        match self {
            Self::Request => u32::from_be_bytes([p1, p0, p2, p3]),
            Self::Response => u32::from_be_bytes([p0, p1, p2, p3]),
        }
    }
}

impl fmt::Display for ParameterLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Line Inversion
// ============================================================================

/// Invert bytes in place.
///
/// The BSB line is idle-low, so every byte is transmitted inverted.
#[inline]
pub fn invert_in_place(bytes: &mut [u8]) {
    for b in bytes.iter_mut() {
        *b ^= 0xFF;
    }
}
