//! # Engine Configuration
//!
//! Bus-wide settings of the polling engine.
//!
//! ## BSB Timing
//!
//! - **Query interval**: base tick, at most one telegram is sent per tick
//! - **Retry interval**: response timeout and the pause before a retry
//! - **Retry count**: attempts per poll before a field is unreachable
//!
//! Fields may override the retry settings individually.

use std::time::Duration;

use tracing::info;

use crate::bytes::ParameterLayout;
use crate::constants::{
    DEFAULT_MAX_BUSY_RETRIES, DEFAULT_QUERY_INTERVAL, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_INTERVAL,
};
use crate::error::{BsbError, BsbResult};
use crate::retry::RetryPolicy;
use crate::telegram::BusAddress;

/// Engine settings.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use voltage_bsb::{BusAddress, EngineConfig};
///
/// let config = EngineConfig::new()
///     .with_address(BusAddress::new(0x42, 0x00))
///     .with_retry_interval(Duration::from_secs(2))
///     .with_packet_logging(true);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize), serde(default))]
pub struct EngineConfig {
    /// Our address and the controller we poll
    pub address: BusAddress,
    /// Base tick
    pub query_interval: Duration,
    /// Default response timeout and backoff
    pub retry_interval: Duration,
    /// Default attempts per poll
    pub retry_count: u8,
    /// Consecutive busy results before a request is abandoned
    pub max_busy_retries: u32,
    /// Log every telegram sent and received
    pub packet_logging: bool,
    /// Publish INF telegrams broadcast by the controller
    pub listen_to_broadcasts: bool,
    /// Byte order of the parameter number in received INF telegrams
    pub broadcast_layout: ParameterLayout,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            address: BusAddress::default(),
            query_interval: DEFAULT_QUERY_INTERVAL,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            retry_count: DEFAULT_RETRY_COUNT,
            max_busy_retries: DEFAULT_MAX_BUSY_RETRIES,
            packet_logging: false,
            listen_to_broadcasts: false,
            broadcast_layout: ParameterLayout::Response,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with protocol defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bus address.
    pub fn with_address(mut self, address: BusAddress) -> Self {
        self.address = address;
        self
    }

    /// Set query interval.
    pub fn with_query_interval(mut self, interval: Duration) -> Self {
        self.query_interval = interval;
        self
    }

    /// Set default retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set default retry count.
    pub fn with_retry_count(mut self, count: u8) -> Self {
        self.retry_count = count;
        self
    }

    /// Set busy retry limit.
    pub fn with_max_busy_retries(mut self, count: u32) -> Self {
        self.max_busy_retries = count;
        self
    }

    /// Enable or disable packet logging.
    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Enable or disable passive INF listening.
    pub fn with_listen_to_broadcasts(mut self, enabled: bool) -> Self {
        self.listen_to_broadcasts = enabled;
        self
    }

    /// Set the parameter byte order expected in received INF telegrams.
    pub fn with_broadcast_layout(mut self, layout: ParameterLayout) -> Self {
        self.broadcast_layout = layout;
        self
    }

    /// Retry policy for fields without overrides
    pub fn default_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_interval, self.retry_count)
    }

    /// Check the settings before starting the engine.
    pub fn validate(&self) -> BsbResult<()> {
        if self.query_interval.is_zero() {
            return Err(BsbError::configuration("query interval must be non-zero"));
        }
        if self.retry_interval < self.query_interval {
            return Err(BsbError::configuration(format!(
                "retry interval {:?} is shorter than query interval {:?}",
                self.retry_interval, self.query_interval
            )));
        }
        if self.address.source > 0x7F {
            return Err(BsbError::configuration(format!(
                "source address 0x{:02X} does not fit in 7 bits",
                self.address.source
            )));
        }
        Ok(())
    }

    /// Log the effective settings.
    pub fn log(&self) {
        info!(
            "BSB: source 0x{:02X}, destination 0x{:02X}",
            self.address.source, self.address.destination
        );
        info!(
            "BSB: query interval {:?}, retry interval {:?}, retry count {}",
            self.query_interval, self.retry_interval, self.retry_count
        );
        if self.listen_to_broadcasts {
            info!("BSB: listening to broadcasts ({})", self.broadcast_layout);
        }
    }
}
