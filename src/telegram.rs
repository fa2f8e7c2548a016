//! BSB telegram data structures
//!
//! A telegram is held in a stack-allocated, bounded payload buffer so the
//! polling loop never allocates per frame.

use std::fmt;

use heapless::Vec;

use crate::bytes::ParameterLayout;
use crate::constants::{BROADCAST_ADDRESS, MAX_PAYLOAD_LEN};
use crate::error::{BsbError, BsbResult};

/// Telegram payload buffer
pub type Payload = Vec<u8, MAX_PAYLOAD_LEN>;

/// Telegram command byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Unsolicited information broadcast
    Inf = 0x02,
    /// Write a parameter
    Set = 0x03,
    /// Write accepted
    Ack = 0x04,
    /// Write rejected
    Nack = 0x05,
    /// Read a parameter
    Get = 0x06,
    /// Answer to a read
    Ret = 0x07,
}

impl Command {
    /// Parse a command byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Self::Inf),
            0x03 => Some(Self::Set),
            0x04 => Some(Self::Ack),
            0x05 => Some(Self::Nack),
            0x06 => Some(Self::Get),
            0x07 => Some(Self::Ret),
            _ => None,
        }
    }

    /// Command byte value
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether this command originates a transaction (GET, SET, INF)
    #[inline]
    pub fn is_request(self) -> bool {
        matches!(self, Self::Inf | Self::Set | Self::Get)
    }

    /// Layout of the parameter number for this command
    #[inline]
    pub fn parameter_layout(self) -> ParameterLayout {
        if self.is_request() {
            ParameterLayout::Request
        } else {
            ParameterLayout::Response
        }
    }

    /// Whether `response` answers a request carrying this command
    pub fn is_answered_by(self, response: Command) -> bool {
        match self {
            Self::Get => response == Self::Ret,
            Self::Set => matches!(response, Self::Ack | Self::Nack),
            _ => false,
        }
    }

    /// Get human-readable command name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inf => "Inf",
            Self::Set => "Set",
            Self::Ack => "Ack",
            Self::Nack => "Nack",
            Self::Get => "Get",
            Self::Ret => "Ret",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source and destination of the telegrams this engine sends.
///
/// Set once at startup. Destination 0 is the heating controller itself;
/// telegrams for every listener go to [`BROADCAST_ADDRESS`] (0x7F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct BusAddress {
    /// Our own address (7 bits)
    pub source: u8,
    /// The controller we poll
    pub destination: u8,
}

impl BusAddress {
    /// Create an address pair
    pub fn new(source: u8, destination: u8) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Same source, addressed to every listener
    pub fn broadcast(&self) -> Self {
        Self {
            source: self.source,
            destination: BROADCAST_ADDRESS,
        }
    }

    /// Whether telegrams to this destination reach every listener
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST_ADDRESS
    }
}

impl Default for BusAddress {
    fn default() -> Self {
        Self {
            source: crate::constants::DEFAULT_SOURCE_ADDRESS,
            destination: crate::constants::DEFAULT_DESTINATION_ADDRESS,
        }
    }
}

/// A decoded or to-be-encoded telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    /// Sender address (without the 0x80 flag)
    pub source: u8,
    /// Receiver address
    pub destination: u8,
    /// Command
    pub command: Command,
    /// Parameter number in logical (big-endian) order
    pub parameter_number: u32,
    /// Payload bytes
    pub payload: Payload,
}

impl Telegram {
    /// Create a telegram from a payload slice
    pub fn new(
        address: BusAddress,
        command: Command,
        parameter_number: u32,
        payload: &[u8],
    ) -> BsbResult<Self> {
        let payload = Payload::from_slice(payload).map_err(|_| {
            BsbError::frame_invalid(format!(
                "Payload too large: {} bytes (max {})",
                payload.len(),
                MAX_PAYLOAD_LEN
            ))
        })?;

        Ok(Self {
            source: address.source,
            destination: address.destination,
            command,
            parameter_number,
            payload,
        })
    }

    /// Address pair of this telegram
    #[inline]
    pub fn address(&self) -> BusAddress {
        BusAddress::new(self.source, self.destination)
    }

    /// Payload slice
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Parameter number as read from the wire bytes with `layout`.
    ///
    /// Controllers do not agree on the byte order of the INF telegrams they
    /// broadcast; this re-reads the bytes the way a receiver expecting
    /// `layout` would.
    pub fn parameter_number_as(&self, layout: ParameterLayout) -> u32 {
        let wire = self.command.parameter_layout().to_bytes(self.parameter_number);
        layout.from_bytes(wire)
    }

    /// Whether this telegram answers `request`
    pub fn answers(&self, request: &Telegram) -> bool {
        request.command.is_answered_by(self.command)
            && self.parameter_number == request.parameter_number
            && self.destination == request.source
    }
}

impl fmt::Display for Telegram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02X}->{:02X}, field: {:08X}",
            self.command, self.source, self.destination, self.parameter_number
        )?;
        if !self.payload.is_empty() {
            f.write_str(", payload:")?;
            for b in &self.payload {
                write!(f, " {:02X}", b)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_roundtrip() {
        for cmd in [
            Command::Inf,
            Command::Set,
            Command::Ack,
            Command::Nack,
            Command::Get,
            Command::Ret,
        ] {
            assert_eq!(Command::from_u8(cmd.to_u8()), Some(cmd));
        }
        assert_eq!(Command::from_u8(0x00), None);
        assert_eq!(Command::from_u8(0x08), None);
    }

    #[test]
    fn test_command_answers() {
        assert!(Command::Get.is_answered_by(Command::Ret));
        assert!(Command::Set.is_answered_by(Command::Ack));
        assert!(Command::Set.is_answered_by(Command::Nack));
        assert!(!Command::Get.is_answered_by(Command::Get));
        assert!(!Command::Inf.is_answered_by(Command::Ack));
    }

    #[test]
    fn test_response_matches_request() {
        let ours = BusAddress::new(0x42, 0x00);
        let request = Telegram::new(ours, Command::Get, 100, &[]).unwrap();

        let answer = Telegram::new(BusAddress::new(0x00, 0x42), Command::Ret, 100, &[0, 0, 1]).unwrap();
        assert!(answer.answers(&request));

        // Our own echo on the single-wire bus
        assert!(!request.answers(&request));

        // Same parameter answered to another device
        let foreign = Telegram::new(BusAddress::new(0x00, 0x06), Command::Ret, 100, &[0, 0, 1]).unwrap();
        assert!(!foreign.answers(&request));
    }

    #[test]
    fn test_parameter_number_as_wire_layout() {
        let inf = Telegram::new(BusAddress::new(0x00, 0x7F), Command::Inf, 0x0005021F, &[]).unwrap();
        assert_eq!(inf.parameter_number_as(ParameterLayout::Request), 0x0005021F);
        assert_eq!(inf.parameter_number_as(ParameterLayout::Response), 0x0500021F);

        let ret = Telegram::new(BusAddress::new(0x00, 0x42), Command::Ret, 0x3D2D0215, &[]).unwrap();
        assert_eq!(ret.parameter_number_as(ParameterLayout::Response), 0x3D2D0215);
    }

    #[test]
    fn test_broadcast_address() {
        let address = BusAddress::new(0x42, 0x00);
        assert!(!address.is_broadcast());
        let inf = address.broadcast();
        assert!(inf.is_broadcast());
        assert_eq!(inf.source, 0x42);
    }

    #[test]
    fn test_display() {
        let telegram =
            Telegram::new(BusAddress::new(0x00, 0x42), Command::Ret, 0x3D2D0215, &[0x00, 0x05, 0x60]).unwrap();
        assert_eq!(
            telegram.to_string(),
            "Ret 00->42, field: 3D2D0215, payload: 00 05 60"
        );
    }
}
