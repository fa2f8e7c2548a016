//! # Voltage BSB - Polling Engine for the BSB Heating Bus
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! A request/response engine for the BSB serial bus spoken by heating and
//! boiler controllers. Many independently configured fields (sensors,
//! setpoints, switches, text values) are multiplexed over one half-duplex
//! line with bounded memory and no blocking I/O.
//!
//! ## Features
//!
//! - **Deterministic Engine**: tick-driven state machine, one request on the bus at a time
//! - **Validated Framing**: CRC-16/XMODEM, re-synchronisation after line noise
//! - **Typed Values**: integer and fixed-point temperature codecs with per-field scaling
//! - **Writes**: validated, coalesced per field, sent ahead of polls
//! - **Automation Hooks**: bus-timeout and cycle-complete observers
//! - **Async Driver**: tokio pump for serial ports or any byte stream
//!
//! ## Telegram Commands
//!
//! | Byte | Command | Direction |
//! |------|---------|-----------|
//! | 0x02 | Inf | broadcast |
//! | 0x03 | Set | request |
//! | 0x04 | Ack | response |
//! | 0x05 | Nack | response |
//! | 0x06 | Get | request |
//! | 0x07 | Ret | response |
//!
//! ## Quick Start
//!
//! ```rust
//! use voltage_bsb::{BufferedLink, EngineConfig, FieldDescriptor, FieldRegistry, PollScheduler, ValueType};
//!
//! let mut registry = FieldRegistry::new();
//! registry.register(
//!     FieldDescriptor::sensor(1, 0x3D2D0215).with_value_type(ValueType::Temperature),
//! )?;
//! registry.register(FieldDescriptor::switch(2, 0x2D3D0574, 1.0, 0.0))?;
//!
//! let mut engine = PollScheduler::new(EngineConfig::new(), registry, BufferedLink::default())?;
//! let writer = engine.write_handle();
//! writer.request_switch(2, true)?;
//!
//! engine.tick(0);
//! # Ok::<(), voltage_bsb::BsbError>(())
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// BSB protocol constants
pub mod constants;

/// Parameter number byte layout and line inversion
pub mod bytes;

/// Stack-bounded telegram
pub mod telegram;

/// Frame encoding, validation and stream re-synchronisation
pub mod frame;

/// Non-blocking transport abstraction
pub mod transport;

// ============================================================================
// Value handling
// ============================================================================

/// Value types and decode results
pub mod value;

/// Value encoding and payload shapes
pub mod codec;

// ============================================================================
// Engine
// ============================================================================

/// Field descriptors and the registry
pub mod registry;

/// Retry thresholds and counters
pub mod retry;

/// Coalescing write queue
pub mod write_queue;

/// Value sinks and automation hooks
pub mod sink;

/// Engine configuration
pub mod config;

/// The polling state machine
pub mod scheduler;

/// Async tokio driver
#[cfg(feature = "std")]
pub mod runtime;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_bsb::tokio) ===
pub use tokio;

// === Engine API ===
pub use config::EngineConfig;
pub use scheduler::{EngineState, EngineStats, PendingRequest, PollScheduler, WriteHandle};
pub use sink::{AutomationHooks, TracingSink, ValueSink};

// === Error handling ===
pub use error::{BsbError, BsbResult};

// === Fields and values ===
pub use codec::{decode_value, encode_value, Scaling, ValueCodec};
pub use registry::{FieldDescriptor, FieldId, FieldKind, FieldRegistry};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use value::{DecodedValue, ValueType};
pub use write_queue::{QueuedWrite, WriteQueue};

// === Protocol ===
pub use bytes::ParameterLayout;
pub use frame::{AdditiveSum, Checksum, Crc16Xmodem, FrameCodec, FrameEvent, FrameReader};
pub use telegram::{BusAddress, Command, Telegram};
pub use transport::{BufferedLink, LinkStats, TransportLink};

// === Protocol limits ===
pub use constants::{BROADCAST_ADDRESS, MAX_FRAME_LEN, MAX_PAYLOAD_LEN};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage BSB v{} - BSB heating bus polling engine by Evan Liu",
        VERSION
    )
}
