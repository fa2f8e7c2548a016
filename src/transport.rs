//! # Transport Layer
//!
//! Non-blocking byte channel between the engine and the bus.
//!
//! The engine never waits on I/O: it reads whatever is available and hands
//! complete telegrams to [`TransportLink::write`]. A link that cannot take
//! more bytes returns [`BsbError::TransportBusy`] and the engine tries again
//! on a later tick.
//!
//! [`BufferedLink`] is the in-memory link used by the async runtime driver
//! and by tests. It applies the BSB line inversion in both directions, so
//! the engine only ever sees logical bytes.

use bytes::{Buf, Bytes, BytesMut};

use crate::bytes::invert_in_place;
use crate::constants::MAX_FRAME_LEN;
use crate::error::{BsbError, BsbResult};

/// Default capacity of the outgoing buffer
pub const DEFAULT_TX_CAPACITY: usize = 4 * MAX_FRAME_LEN;

/// Non-blocking byte channel to the bus
pub trait TransportLink {
    /// Copy received bytes into `buf`, returning how many were copied (0 = none)
    fn read_available(&mut self, buf: &mut [u8]) -> usize;

    /// Queue a complete telegram for transmission
    fn write(&mut self, data: &[u8]) -> BsbResult<()>;
}

impl<T: TransportLink + ?Sized> TransportLink for &mut T {
    fn read_available(&mut self, buf: &mut [u8]) -> usize {
        (**self).read_available(buf)
    }

    fn write(&mut self, data: &[u8]) -> BsbResult<()> {
        (**self).write(data)
    }
}

/// Link statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Bytes accepted from the line
    pub bytes_received: u64,
    /// Bytes handed to the line
    pub bytes_sent: u64,
    /// Writes refused because the buffer was full
    pub writes_refused: u64,
}

/// In-memory link with optional line inversion
#[derive(Debug)]
pub struct BufferedLink {
    rx: BytesMut,
    tx: BytesMut,
    tx_capacity: usize,
    inverted: bool,
    stats: LinkStats,
}

impl Default for BufferedLink {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BufferedLink {
    /// Create a link; `inverted` selects BSB line inversion
    pub fn new(inverted: bool) -> Self {
        Self::with_capacity(inverted, DEFAULT_TX_CAPACITY)
    }

    /// Create a link with a bounded outgoing buffer
    pub fn with_capacity(inverted: bool, tx_capacity: usize) -> Self {
        Self {
            rx: BytesMut::with_capacity(2 * MAX_FRAME_LEN),
            tx: BytesMut::with_capacity(tx_capacity),
            tx_capacity,
            inverted,
            stats: LinkStats::default(),
        }
    }

    /// Whether bytes are inverted on the line
    #[inline]
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Append bytes received from the line
    pub fn push_incoming(&mut self, line_bytes: &[u8]) {
        self.rx.extend_from_slice(line_bytes);
        self.stats.bytes_received += line_bytes.len() as u64;
    }

    /// Take every byte waiting to go out on the line
    pub fn take_outgoing(&mut self) -> Bytes {
        self.tx.split().freeze()
    }

    /// Bytes waiting to go out
    #[inline]
    pub fn pending_outgoing(&self) -> usize {
        self.tx.len()
    }

    /// Bytes received but not yet read by the engine
    #[inline]
    pub fn pending_incoming(&self) -> usize {
        self.rx.len()
    }

    /// Link statistics
    pub fn stats(&self) -> LinkStats {
        self.stats
    }
}

impl TransportLink for BufferedLink {
    fn read_available(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.rx.len());
        if n == 0 {
            return 0;
        }
        self.rx.copy_to_slice(&mut buf[..n]);
        if self.inverted {
            invert_in_place(&mut buf[..n]);
        }
        n
    }

    fn write(&mut self, data: &[u8]) -> BsbResult<()> {
        if self.tx.len() + data.len() > self.tx_capacity {
            self.stats.writes_refused += 1;
            return Err(BsbError::TransportBusy);
        }

        let start = self.tx.len();
        self.tx.extend_from_slice(data);
        if self.inverted {
            invert_in_place(&mut self.tx[start..]);
        }
        self.stats.bytes_sent += data.len() as u64;
        Ok(())
    }
}
