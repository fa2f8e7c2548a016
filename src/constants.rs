//! BSB protocol constants
//!
//! Frame layout (logical bytes, before line inversion):
//!
//! ```text
//! [0xDC][src | 0x80][dst][len][cmd][p0][p1][p2][p3][payload..][crc_hi][crc_lo]
//! ```
//!
//! `len` counts the whole telegram including start byte and checksum.

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Start-of-telegram marker
pub const START_OF_FRAME: u8 = 0xDC;

/// Bit set on the source address byte of every telegram
pub const SOURCE_ADDRESS_FLAG: u8 = 0x80;

/// Header length: start(1) + source(1) + destination(1) + length(1) + command(1) + parameter(4)
pub const HEADER_LEN: usize = 9;

/// Maximum payload carried by a single telegram.
///
/// Schedules (12 bytes) and text values are the largest payloads seen
/// on the bus; 32 leaves room for vendor text parameters.
pub const MAX_PAYLOAD_LEN: usize = 32;

/// Largest checksum trailer supported by the frame codec
pub const MAX_CHECKSUM_LEN: usize = 2;

/// Smallest possible telegram: header plus a one-byte checksum
pub const MIN_FRAME_LEN: usize = HEADER_LEN + 1;

/// Largest possible telegram
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN + MAX_CHECKSUM_LEN;

// ============================================================================
// Addressing
// ============================================================================

/// Destination used by INF telegrams addressed to every listener
pub const BROADCAST_ADDRESS: u8 = 0x7F;

/// Default source address of this device on the bus (66)
pub const DEFAULT_SOURCE_ADDRESS: u8 = 0x42;

/// Default destination address.
///
/// Address 0 is the heating controller on this bus, not a broadcast;
/// broadcasts use [`BROADCAST_ADDRESS`].
pub const DEFAULT_DESTINATION_ADDRESS: u8 = 0x00;

// ============================================================================
// Payload Flags
// ============================================================================

/// Default enable byte sent in front of SET payloads
pub const DEFAULT_ENABLE_BYTE: u8 = 0x01;

/// Enable byte of parameters that may be switched off by writing zero
pub const ENABLE_BYTE_NULLABLE: u8 = 0x06;

/// Enable byte substituted for [`ENABLE_BYTE_NULLABLE`] when the value is zero
pub const ENABLE_BYTE_NULL: u8 = 0x05;

/// Bit in the RET status byte marking the value as not set
pub const STATUS_NULL_FLAG: u8 = 0x01;

// ============================================================================
// Timing Defaults
// ============================================================================

/// Base tick: minimum spacing between two telegrams sent by the engine
pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_millis(250);

/// Default per-field update interval
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default response timeout and backoff between attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of attempts before a field is declared unreachable
pub const DEFAULT_RETRY_COUNT: u8 = 3;

/// Consecutive `TransportBusy` results tolerated before a request is abandoned
pub const DEFAULT_MAX_BUSY_RETRIES: u32 = 5;

/// Delay between an answered SET and the GET reading the value back
pub const READBACK_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Native Scales
// ============================================================================

/// Raw counts per degree for TEMPERATURE values
pub const TEMPERATURE_SCALE: f64 = 64.0;

/// Raw counts per degree for ROOMTEMPERATURE values
pub const ROOM_TEMPERATURE_SCALE: f64 = 64.0;

// ============================================================================
// Serial Line
// ============================================================================

/// BSB line speed (8 data bits, odd parity, 1 stop bit)
pub const BSB_BAUD_RATE: u32 = 4800;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(HEADER_LEN, 9);
        assert_eq!(MIN_FRAME_LEN, 10);
        assert_eq!(MAX_FRAME_LEN, 43);
        // The length byte must be able to describe every frame
        assert!(MAX_FRAME_LEN <= u8::MAX as usize);
    }

    #[test]
    fn test_crc_frame_without_payload_is_eleven_bytes() {
        assert_eq!(HEADER_LEN + MAX_CHECKSUM_LEN, 11);
    }

    #[test]
    fn test_timing_defaults() {
        assert!(DEFAULT_RETRY_INTERVAL >= DEFAULT_QUERY_INTERVAL);
        assert!(DEFAULT_UPDATE_INTERVAL >= DEFAULT_QUERY_INTERVAL);
        assert!(READBACK_DELAY < DEFAULT_UPDATE_INTERVAL);
    }
}
