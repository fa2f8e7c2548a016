//! # BSB Frame Codec
//!
//! Serialization and validation of complete telegrams.
//!
//! [`FrameCodec`] is a pure transformation between [`Telegram`] values and
//! byte buffers. [`FrameReader`] sits in front of it on the receive path
//! and cuts an arbitrary byte stream (split reads, line noise, our own
//! echo) into candidate frames.
//!
//! The checksum is a strategy. [`Crc16Xmodem`] matches captured bus
//! traffic; [`AdditiveSum`] is kept for gateways that use a one-byte sum.

use crc::{Crc, CRC_16_XMODEM};
use heapless::Vec;
use tracing::trace;

use crate::constants::{
    HEADER_LEN, MAX_CHECKSUM_LEN, MAX_FRAME_LEN, SOURCE_ADDRESS_FLAG, START_OF_FRAME,
};
use crate::error::BsbResult;
use crate::telegram::{BusAddress, Command, Payload, Telegram};

/// Encoded telegram bytes
pub type FrameBuffer = Vec<u8, MAX_FRAME_LEN>;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

// ============================================================================
// Checksum Strategies
// ============================================================================

/// Telegram checksum algorithm.
///
/// The checksum covers every byte from the start marker to the end of the
/// payload and is appended big-endian using `width()` bytes.
pub trait Checksum {
    /// Number of trailer bytes (1 or 2)
    fn width(&self) -> usize;

    /// Compute the checksum over `data`
    fn compute(&self, data: &[u8]) -> u16;
}

/// CRC-16/XMODEM (poly 0x1021, init 0), the checksum used on the BSB bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc16Xmodem;

impl Checksum for Crc16Xmodem {
    #[inline]
    fn width(&self) -> usize {
        2
    }

    #[inline]
    fn compute(&self, data: &[u8]) -> u16 {
        CRC16.checksum(data)
    }
}

/// Sum of all bytes modulo 256
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdditiveSum;

impl Checksum for AdditiveSum {
    #[inline]
    fn width(&self) -> usize {
        1
    }

    #[inline]
    fn compute(&self, data: &[u8]) -> u16 {
        u16::from(data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)))
    }
}

// ============================================================================
// Frame Codec
// ============================================================================

/// Stateless telegram encoder/decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec<C: Checksum = Crc16Xmodem> {
    checksum: C,
}

impl FrameCodec<Crc16Xmodem> {
    /// Codec with the bus checksum
    pub fn new() -> Self {
        Self {
            checksum: Crc16Xmodem,
        }
    }
}

impl<C: Checksum> FrameCodec<C> {
    /// Codec with a custom checksum strategy
    pub fn with_checksum(checksum: C) -> Self {
        Self { checksum }
    }

    /// Trailer length of this codec
    #[inline]
    pub fn checksum_len(&self) -> usize {
        self.checksum.width().min(MAX_CHECKSUM_LEN)
    }

    /// Smallest frame this codec can produce
    #[inline]
    pub fn min_frame_len(&self) -> usize {
        HEADER_LEN + self.checksum_len()
    }

    /// Encode a request or response.
    ///
    /// Fails only when the payload exceeds the telegram buffer.
    pub fn encode(
        &self,
        address: BusAddress,
        parameter_number: u32,
        command: Command,
        payload: &[u8],
    ) -> BsbResult<FrameBuffer> {
        let telegram = Telegram::new(address, command, parameter_number, payload)?;
        Ok(self.encode_telegram(&telegram))
    }

    /// Encode a telegram
    pub fn encode_telegram(&self, telegram: &Telegram) -> FrameBuffer {
        let crc_len = self.checksum_len();
        let len = HEADER_LEN + telegram.payload.len() + crc_len;

        let mut buf = FrameBuffer::new();
        let parameter = telegram
            .command
            .parameter_layout()
            .to_bytes(telegram.parameter_number);

        // Capacity is HEADER_LEN + MAX_PAYLOAD_LEN + MAX_CHECKSUM_LEN, which
        // bounds every push below.
        let _ = buf.extend_from_slice(&[
            START_OF_FRAME,
            telegram.source | SOURCE_ADDRESS_FLAG,
            telegram.destination,
            len as u8,
            telegram.command.to_u8(),
        ]);
        let _ = buf.extend_from_slice(&parameter);
        let _ = buf.extend_from_slice(&telegram.payload);

        let crc = self.checksum.compute(&buf).to_be_bytes();
        let _ = buf.extend_from_slice(&crc[2 - crc_len..]);

        buf
    }

    /// Decode and validate a complete frame.
    ///
    /// Returns `None` for anything that is not a well-formed telegram;
    /// noise and truncation are normal on a shared bus.
    pub fn decode(&self, bytes: &[u8]) -> Option<Telegram> {
        let crc_len = self.checksum_len();

        if bytes.len() < self.min_frame_len() || bytes.len() > MAX_FRAME_LEN {
            trace!("Frame rejected: length {}", bytes.len());
            return None;
        }
        if bytes[0] != START_OF_FRAME || bytes[1] & SOURCE_ADDRESS_FLAG == 0 {
            trace!("Frame rejected: bad header {:02X} {:02X}", bytes[0], bytes[1]);
            return None;
        }
        if usize::from(bytes[3]) != bytes.len() {
            trace!(
                "Frame rejected: length byte {} vs {} received",
                bytes[3],
                bytes.len()
            );
            return None;
        }

        let body_end = bytes.len() - crc_len;
        let expected = self.checksum.compute(&bytes[..body_end]);
        let received = bytes[body_end..]
            .iter()
            .fold(0u16, |acc, b| (acc << 8) | u16::from(*b));
        if expected != received {
            trace!(
                "Frame rejected: checksum {:04X} expected {:04X}",
                received,
                expected
            );
            return None;
        }

        let command = Command::from_u8(bytes[4])?;
        let parameter_number = command
            .parameter_layout()
            .from_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        let payload = Payload::from_slice(&bytes[HEADER_LEN..body_end]).ok()?;

        Some(Telegram {
            source: bytes[1] & !SOURCE_ADDRESS_FLAG,
            destination: bytes[2],
            command,
            parameter_number,
            payload,
        })
    }
}

// ============================================================================
// Streaming Reader
// ============================================================================

/// Outcome of a candidate frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A telegram passed validation
    Telegram(Telegram),
    /// A candidate frame was cut out but failed validation
    Invalid,
}

/// Incremental frame splitter for a raw byte stream
#[derive(Debug)]
pub struct FrameReader<C: Checksum = Crc16Xmodem> {
    codec: FrameCodec<C>,
    buffer: FrameBuffer,
    expected_len: usize,
    skipped_bytes: u64,
    invalid_frames: u64,
}

impl Default for FrameReader<Crc16Xmodem> {
    fn default() -> Self {
        Self::new(FrameCodec::new())
    }
}

impl<C: Checksum> FrameReader<C> {
    /// Create a reader validating with `codec`
    pub fn new(codec: FrameCodec<C>) -> Self {
        Self {
            codec,
            buffer: FrameBuffer::new(),
            expected_len: 0,
            skipped_bytes: 0,
            invalid_frames: 0,
        }
    }

    /// Bytes discarded while hunting for a start marker
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Candidate frames that failed validation
    pub fn invalid_frames(&self) -> u64 {
        self.invalid_frames
    }

    /// Drop any partially received frame
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_len = 0;
    }

    /// Feed received bytes, reporting every complete candidate frame
    pub fn feed<F: FnMut(FrameEvent)>(&mut self, data: &[u8], mut on_event: F) {
        for &byte in data {
            self.push_byte(byte, &mut on_event);
        }
    }

    fn push_byte<F: FnMut(FrameEvent)>(&mut self, byte: u8, on_event: &mut F) {
        if self.buffer.is_empty() {
            if byte == START_OF_FRAME {
                let _ = self.buffer.push(byte);
            } else {
                self.skipped_bytes += 1;
            }
            return;
        }

        let _ = self.buffer.push(byte);

        match self.buffer.len() {
            2 if byte & SOURCE_ADDRESS_FLAG == 0 => {
                self.skipped_bytes += 2;
                self.reset();
            }
            4 => {
                let len = usize::from(byte);
                if len < self.codec.min_frame_len() || len > MAX_FRAME_LEN {
                    self.resync(on_event);
                } else {
                    self.expected_len = len;
                }
            }
            n if n >= 4 && n == self.expected_len => match self.codec.decode(&self.buffer) {
                Some(telegram) => {
                    self.reset();
                    on_event(FrameEvent::Telegram(telegram));
                }
                None => self.resync(on_event),
            },
            _ => {}
        }
    }

    /// Reject the current candidate and rescan its tail for another start marker.
    fn resync<F: FnMut(FrameEvent)>(&mut self, on_event: &mut F) {
        self.invalid_frames += 1;
        on_event(FrameEvent::Invalid);

        let tail: FrameBuffer = self.buffer.iter().skip(1).copied().collect();
        self.reset();
        for byte in tail {
            self.push_byte(byte, on_event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET_OUTSIDE_TEMP: [u8; 11] = [
        0xDC, 0xC2, 0x00, 0x0B, 0x06, 0x2D, 0x3D, 0x02, 0x15, 0x21, 0x9F,
    ];
    const RET_OUTSIDE_TEMP: [u8; 14] = [
        0xDC, 0x80, 0x42, 0x0E, 0x07, 0x3D, 0x2D, 0x02, 0x15, 0x00, 0x05, 0x60, 0x7F, 0x66,
    ];

    fn collect(reader: &mut FrameReader, data: &[u8]) -> std::vec::Vec<FrameEvent> {
        let mut events = std::vec::Vec::new();
        reader.feed(data, |e| events.push(e));
        events
    }

    #[test]
    fn test_crc16_xmodem_check_value() {
        assert_eq!(Crc16Xmodem.compute(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_additive_sum() {
        assert_eq!(AdditiveSum.compute(&[0xFF, 0x02]), 0x01);
        assert_eq!(AdditiveSum.width(), 1);
    }

    #[test]
    fn test_encode_get_matches_captured_frame() {
        let codec = FrameCodec::new();
        let frame = codec
            .encode(BusAddress::new(0x42, 0x00), 0x3D2D0215, Command::Get, &[])
            .unwrap();
        assert_eq!(frame.as_slice(), &GET_OUTSIDE_TEMP);
    }

    #[test]
    fn test_decode_ret_matches_captured_frame() {
        let telegram = FrameCodec::new().decode(&RET_OUTSIDE_TEMP).unwrap();
        assert_eq!(telegram.command, Command::Ret);
        assert_eq!(telegram.source, 0x00);
        assert_eq!(telegram.destination, 0x42);
        assert_eq!(telegram.parameter_number, 0x3D2D0215);
        assert_eq!(telegram.payload(), &[0x00, 0x05, 0x60]);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let codec = FrameCodec::new();
        let address = BusAddress::new(0x42, 0x00);
        let a = codec.encode(address, 200, Command::Set, &[0x01, 0x01]).unwrap();
        let b = codec.encode(address, 200, Command::Set, &[0x01, 0x01]).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.as_slice(),
            &[0xDC, 0xC2, 0x00, 0x0D, 0x03, 0x00, 0x00, 0x00, 0xC8, 0x01, 0x01, 0x01, 0x8F]
        );
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let codec = FrameCodec::new();

        let mut bad_crc = RET_OUTSIDE_TEMP;
        bad_crc[11] ^= 0x01;
        assert!(codec.decode(&bad_crc).is_none());

        assert!(codec.decode(&RET_OUTSIDE_TEMP[..10]).is_none());
        assert!(codec.decode(&[]).is_none());

        let mut bad_start = RET_OUTSIDE_TEMP;
        bad_start[0] = 0xDD;
        assert!(codec.decode(&bad_start).is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_command() {
        let codec = FrameCodec::new();
        let mut frame = FrameBuffer::new();
        frame
            .extend_from_slice(&[0xDC, 0x80, 0x42, 0x0B, 0x09, 0x00, 0x00, 0x00, 0x64])
            .unwrap();
        let crc = Crc16Xmodem.compute(&frame).to_be_bytes();
        frame.extend_from_slice(&crc).unwrap();
        assert!(codec.decode(&frame).is_none());
    }

    #[test]
    fn test_additive_codec_roundtrip() {
        let codec = FrameCodec::with_checksum(AdditiveSum);
        let frame = codec
            .encode(BusAddress::new(0x42, 0x00), 100, Command::Get, &[])
            .unwrap();
        assert_eq!(frame.len(), 10);
        assert_eq!(frame[3], 10);
        let telegram = codec.decode(&frame).unwrap();
        assert_eq!(telegram.parameter_number, 100);
    }

    #[test]
    fn test_reader_split_chunks() {
        let mut reader = FrameReader::default();
        assert!(collect(&mut reader, &RET_OUTSIDE_TEMP[..5]).is_empty());
        let events = collect(&mut reader, &RET_OUTSIDE_TEMP[5..]);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], FrameEvent::Telegram(t) if t.parameter_number == 0x3D2D0215));
    }

    #[test]
    fn test_reader_skips_garbage_between_frames() {
        let mut reader = FrameReader::default();
        let mut stream = std::vec::Vec::new();
        stream.extend_from_slice(&[0x00, 0x13, 0x37]);
        stream.extend_from_slice(&GET_OUTSIDE_TEMP);
        stream.extend_from_slice(&[0xAA]);
        stream.extend_from_slice(&RET_OUTSIDE_TEMP);

        let events = collect(&mut reader, &stream);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], FrameEvent::Telegram(t) if t.command == Command::Get));
        assert!(matches!(&events[1], FrameEvent::Telegram(t) if t.command == Command::Ret));
        assert_eq!(reader.skipped_bytes(), 4);
    }

    #[test]
    fn test_reader_recovers_frame_hidden_in_bad_candidate() {
        // A stray start marker with a plausible length swallows the real frame
        let mut stream = std::vec::Vec::new();
        stream.extend_from_slice(&[0xDC, 0x80, 0x00, 0x0B]);
        stream.extend_from_slice(&RET_OUTSIDE_TEMP);
        stream.extend_from_slice(&[0x00; 8]);

        let mut reader = FrameReader::default();
        let events = collect(&mut reader, &stream);
        assert!(events.contains(&FrameEvent::Invalid));
        assert!(events
            .iter()
            .any(|e| matches!(e, FrameEvent::Telegram(t) if t.parameter_number == 0x3D2D0215)));
        assert!(reader.invalid_frames() >= 1);
    }

    #[test]
    fn test_reader_rejects_impossible_length() {
        let mut reader = FrameReader::default();
        let events = collect(&mut reader, &[0xDC, 0x80, 0x42, 0xFF]);
        assert_eq!(events, vec![FrameEvent::Invalid]);
    }
}
