//! # BSB Polling Engine
//!
//! Tick-driven request/response state machine multiplexing many fields
//! over one half-duplex bus.
//!
//! ## States
//!
//! | State | Meaning |
//! |-------|---------|
//! | Idle | free to send the next write or poll |
//! | AwaitingResponse | one request on the bus, waiting until `deadline` |
//! | Backoff | the request timed out, resend at `resume_at` |
//!
//! At most one request is outstanding at any time. Each call to
//! [`PollScheduler::tick`] drains new writes, consumes received bytes,
//! advances the timers and, when idle, sends at most one telegram.
//!
//! ## Example
//!
//! ```rust
//! use voltage_bsb::{
//!     BufferedLink, EngineConfig, FieldDescriptor, FieldRegistry, PollScheduler, TracingSink,
//! };
//!
//! let mut registry = FieldRegistry::new();
//! registry.register(FieldDescriptor::sensor(1, 0x3D2D0215)).unwrap();
//!
//! let mut engine =
//!     PollScheduler::new(EngineConfig::new(), registry, BufferedLink::default()).unwrap();
//! engine.set_default_sink(Box::new(TracingSink));
//!
//! engine.tick(0);
//! assert!(engine.state().is_awaiting());
//! assert!(engine.link_mut().pending_outgoing() > 0);
//! ```

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace, warn};

use crate::codec::ValueCodec;
use crate::config::EngineConfig;
use crate::constants::{MAX_FRAME_LEN, READBACK_DELAY};
use crate::error::{BsbError, BsbResult};
use crate::frame::{Checksum, Crc16Xmodem, FrameCodec, FrameEvent, FrameReader};
use crate::registry::{FieldDescriptor, FieldId, FieldKind, FieldRegistry};
use crate::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::sink::{AutomationHooks, ValueSink};
use crate::telegram::{Command, Telegram};
use crate::transport::TransportLink;
use crate::value::DecodedValue;
use crate::write_queue::{QueuedWrite, WriteQueue};

// ============================================================================
// Engine State
// ============================================================================

/// The request currently on the bus
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    /// Field the request belongs to
    pub field_id: FieldId,
    /// Parameter number of the request
    pub parameter_number: u32,
    /// GET for polls, SET for writes
    pub command: Command,
    /// Time of the first attempt (ms)
    pub issued_at: u64,
    /// Attempt number, starting at 1
    pub attempt: u8,
    /// The write being carried, if any
    pub write: Option<QueuedWrite>,
    /// Telegram to resend on retry
    pub telegram: Telegram,
}

/// Observable engine state
#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    /// Nothing outstanding
    Idle,
    /// Waiting for the answer to `pending`
    AwaitingResponse {
        /// Outstanding request
        pending: PendingRequest,
        /// Timeout (ms)
        deadline: u64,
    },
    /// Waiting before resending `pending`
    Backoff {
        /// Request to resend
        pending: PendingRequest,
        /// Resend time (ms)
        resume_at: u64,
    },
}

impl EngineState {
    /// Whether no request is outstanding
    #[inline]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Whether a request is on the bus
    #[inline]
    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::AwaitingResponse { .. })
    }

    /// The outstanding request, if any
    pub fn pending(&self) -> Option<&PendingRequest> {
        match self {
            Self::Idle => None,
            Self::AwaitingResponse { pending, .. } | Self::Backoff { pending, .. } => Some(pending),
        }
    }
}

/// Engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// GET telegrams sent, retries included
    pub requests_sent: u64,
    /// SET telegrams sent, retries included
    pub writes_sent: u64,
    /// INF telegrams sent
    pub broadcasts_sent: u64,
    /// Responses matched to the outstanding request
    pub responses_matched: u64,
    /// Candidate frames that failed validation
    pub frames_invalid: u64,
    /// Valid telegrams that matched nothing
    pub frames_discarded: u64,
    /// Response timeouts
    pub timeouts: u64,
    /// Resends after a timeout
    pub retries: u64,
    /// Fields given up on
    pub unreachable: u64,
    /// Matched responses that could not be decoded
    pub decode_errors: u64,
    /// Writes refused by the transport
    pub transport_busy: u64,
    /// Completed readout passes
    pub cycles_completed: u64,
    /// Queued writes replaced by a newer value for the same field
    pub writes_coalesced: u64,
}

#[derive(Debug, Clone, Copy)]
struct FieldState {
    last_poll: Option<u64>,
    readback_at: Option<u64>,
    enabled: bool,
    retry: RetryState,
}

type BoxedSink = Box<dyn ValueSink + Send>;

// ============================================================================
// Write Handle
// ============================================================================

/// Cloneable handle for requesting writes from other tasks.
///
/// Writes are validated immediately, with the value codec the engine had
/// when the handle was created, and picked up by the engine on its next
/// tick.
#[derive(Debug, Clone)]
pub struct WriteHandle {
    registry: Arc<FieldRegistry>,
    values: ValueCodec,
    tx: UnboundedSender<QueuedWrite>,
}

impl WriteHandle {
    /// Validate and queue a write.
    ///
    /// Fails with `UnknownField`, `FieldNotWritable` or `OutOfRange`.
    pub fn request_write(&self, field_id: FieldId, value: f64) -> BsbResult<()> {
        let write = validate_write(&self.registry, &self.values, field_id, value)?;
        self.tx
            .send(write)
            .map_err(|_| BsbError::io("polling engine has stopped"))
    }

    /// Switch a field on or off
    pub fn request_switch(&self, field_id: FieldId, on: bool) -> BsbResult<()> {
        let value = switch_value(&self.registry, field_id, on)?;
        self.request_write(field_id, value)
    }
}

fn validate_write(
    registry: &FieldRegistry,
    values: &ValueCodec,
    field_id: FieldId,
    value: f64,
) -> BsbResult<QueuedWrite> {
    let descriptor = registry
        .get(field_id)
        .ok_or(BsbError::UnknownField { field_id })?;
    let value = descriptor.validate_write(values, value)?;
    Ok(QueuedWrite::new(field_id, value))
}

fn switch_value(registry: &FieldRegistry, field_id: FieldId, on: bool) -> BsbResult<f64> {
    match registry.get(field_id).map(|d| d.kind) {
        Some(FieldKind::Switch {
            on_value,
            off_value,
        }) => Ok(if on { on_value } else { off_value }),
        Some(_) => Err(BsbError::FieldNotWritable { field_id }),
        None => Err(BsbError::UnknownField { field_id }),
    }
}

// ============================================================================
// Poll Scheduler
// ============================================================================

/// The polling engine
pub struct PollScheduler<L: TransportLink, C: Checksum + Clone = Crc16Xmodem> {
    config: EngineConfig,
    registry: Arc<FieldRegistry>,
    link: L,
    codec: FrameCodec<C>,
    reader: FrameReader<C>,
    values: ValueCodec,
    fields: Vec<FieldState>,
    sinks: Vec<Option<BoxedSink>>,
    default_sink: Option<BoxedSink>,
    hooks: AutomationHooks,
    writes: WriteQueue,
    write_tx: UnboundedSender<QueuedWrite>,
    write_rx: UnboundedReceiver<QueuedWrite>,
    state: EngineState,
    busy_streak: u32,
    resolved_since_cycle: bool,
    stats: EngineStats,
    rx_buf: [u8; MAX_FRAME_LEN],
    inbox: Vec<FrameEvent>,
}

impl<L: TransportLink> PollScheduler<L, Crc16Xmodem> {
    /// Create an engine using the bus checksum
    pub fn new(config: EngineConfig, registry: FieldRegistry, link: L) -> BsbResult<Self> {
        Self::with_checksum(config, registry, link, Crc16Xmodem)
    }
}

impl<L: TransportLink, C: Checksum + Clone> PollScheduler<L, C> {
    /// Create an engine with a custom checksum strategy
    pub fn with_checksum(
        config: EngineConfig,
        registry: FieldRegistry,
        link: L,
        checksum: C,
    ) -> BsbResult<Self> {
        config.validate()?;
        if let Some(descriptor) = registry
            .iter()
            .find(|d| d.update_interval < config.query_interval)
        {
            return Err(BsbError::configuration(format!(
                "Field 0x{:08X}: update interval {:?} is shorter than query interval {:?}",
                descriptor.field_id, descriptor.update_interval, config.query_interval
            )));
        }

        let fields = registry
            .iter()
            .map(|d| FieldState {
                last_poll: None,
                readback_at: None,
                enabled: true,
                retry: RetryState::new(d.field_id),
            })
            .collect();
        let sinks = registry.iter().map(|_| None).collect();
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            registry: Arc::new(registry),
            link,
            codec: FrameCodec::with_checksum(checksum.clone()),
            reader: FrameReader::new(FrameCodec::with_checksum(checksum)),
            values: ValueCodec::default(),
            fields,
            sinks,
            default_sink: None,
            hooks: AutomationHooks::new(),
            writes: WriteQueue::new(),
            write_tx,
            write_rx,
            state: EngineState::Idle,
            busy_streak: 0,
            resolved_since_cycle: false,
            stats: EngineStats::default(),
            rx_buf: [0u8; MAX_FRAME_LEN],
            inbox: Vec::new(),
        })
    }

    /// Replace the value codec (temperature scales).
    ///
    /// Call before [`write_handle`](Self::write_handle) so handles validate
    /// with the same scales.
    pub fn with_value_codec(mut self, values: ValueCodec) -> Self {
        self.values = values;
        self
    }

    // ------------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------------

    /// Attach the sink of one field
    pub fn attach_sink(&mut self, field_id: FieldId, sink: BoxedSink) -> BsbResult<()> {
        let index = self.index_of(field_id)?;
        self.sinks[index] = Some(sink);
        Ok(())
    }

    /// Sink for fields without their own
    pub fn set_default_sink(&mut self, sink: BoxedSink) {
        self.default_sink = Some(sink);
    }

    /// Automation hooks
    pub fn hooks_mut(&mut self) -> &mut AutomationHooks {
        &mut self.hooks
    }

    /// Handle for queueing writes from elsewhere
    pub fn write_handle(&self) -> WriteHandle {
        WriteHandle {
            registry: Arc::clone(&self.registry),
            values: self.values,
            tx: self.write_tx.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Control
    // ------------------------------------------------------------------------

    /// Validate and queue a write
    pub fn request_write(&mut self, field_id: FieldId, value: f64) -> BsbResult<()> {
        let write = validate_write(&self.registry, &self.values, field_id, value)?;
        let index = self.index_of(field_id)?;
        if self.fields[index].enabled {
            self.writes.push(write);
        } else {
            debug!("Write to disabled field 0x{:08X} dropped", field_id);
        }
        Ok(())
    }

    /// Switch a field on or off
    pub fn request_switch(&mut self, field_id: FieldId, on: bool) -> BsbResult<()> {
        let value = switch_value(&self.registry, field_id, on)?;
        self.request_write(field_id, value)
    }

    /// Enable or disable polling of a field.
    ///
    /// Disabling drops any queued write for the field.
    pub fn set_field_enabled(&mut self, field_id: FieldId, enabled: bool) -> BsbResult<()> {
        let index = self.index_of(field_id)?;
        self.fields[index].enabled = enabled;
        if !enabled && self.writes.remove_field(field_id) {
            debug!("Queued write for disabled field 0x{:08X} dropped", field_id);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Current state
    #[inline]
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Counters
    #[inline]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            writes_coalesced: self.writes.coalesced_count(),
            ..self.stats
        }
    }

    /// Engine configuration
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registered fields
    #[inline]
    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// Underlying transport
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Underlying transport (mutable)
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Time of the last completed poll of a field
    pub fn last_poll(&self, field_id: FieldId) -> Option<u64> {
        let index = self.registry.index_of(field_id)?;
        self.fields[index].last_poll
    }

    /// Failure counter of a field
    pub fn retry_state(&self, field_id: FieldId) -> Option<RetryState> {
        let index = self.registry.index_of(field_id)?;
        Some(self.fields[index].retry)
    }

    /// Whether a field is polled
    pub fn is_field_enabled(&self, field_id: FieldId) -> Option<bool> {
        let index = self.registry.index_of(field_id)?;
        Some(self.fields[index].enabled)
    }

    /// Writes waiting to be sent
    #[inline]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Log the configuration and every registered field
    pub fn log_config(&self) {
        self.config.log();
        for descriptor in self.registry.iter() {
            info!(
                "BSB field 0x{:08X}: parameter {:08X}, {} {}, every {:?}{}",
                descriptor.field_id,
                descriptor.parameter_number,
                descriptor.kind.as_str(),
                descriptor.value_type,
                descriptor.update_interval,
                if descriptor.broadcast { ", broadcast" } else { "" }
            );
        }
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// Advance the engine to `now_ms`.
    ///
    /// Never blocks. Sends at most one telegram.
    pub fn tick(&mut self, now_ms: u64) {
        self.drain_write_channel();
        self.receive(now_ms);
        self.advance_timers(now_ms);

        if self.state.is_idle() {
            self.dispatch(now_ms);
        }
    }

    fn drain_write_channel(&mut self) {
        while let Ok(write) = self.write_rx.try_recv() {
            match self.registry.index_of(write.field_id) {
                Some(index) if self.fields[index].enabled => self.writes.push(write),
                _ => debug!("Write to disabled field 0x{:08X} dropped", write.field_id),
            }
        }
    }

    fn receive(&mut self, now_ms: u64) {
        let inbox = &mut self.inbox;
        loop {
            let n = self.link.read_available(&mut self.rx_buf);
            if n == 0 {
                break;
            }
            self.reader.feed(&self.rx_buf[..n], |event| inbox.push(event));
        }

        let events = std::mem::take(&mut self.inbox);
        for event in events.iter() {
            match event {
                FrameEvent::Telegram(telegram) => self.handle_telegram(telegram, now_ms),
                FrameEvent::Invalid => {
                    self.stats.frames_invalid += 1;
                    trace!("Invalid frame discarded");
                }
            }
        }
        // Keep the allocation for the next tick
        self.inbox = events;
        self.inbox.clear();
    }

    fn handle_telegram(&mut self, telegram: &Telegram, now_ms: u64) {
        if self.config.packet_logging {
            debug!("<<< {}", telegram);
        }

        if telegram.command == Command::Inf {
            if self.config.listen_to_broadcasts && telegram.source != self.config.address.source {
                self.handle_broadcast(telegram, now_ms);
            } else {
                self.stats.frames_discarded += 1;
            }
            return;
        }

        let pending = match &self.state {
            EngineState::AwaitingResponse { pending, .. } | EngineState::Backoff { pending, .. }
                if telegram.answers(&pending.telegram) =>
            {
                pending.clone()
            }
            _ => {
                self.stats.frames_discarded += 1;
                trace!("Unsolicited telegram discarded: {}", telegram);
                return;
            }
        };

        self.stats.responses_matched += 1;
        self.busy_streak = 0;
        self.resolved_since_cycle = true;
        self.state = EngineState::Idle;

        let registry = Arc::clone(&self.registry);
        let Some(index) = registry.index_of(pending.field_id) else {
            return;
        };
        let Some(descriptor) = registry.at(index) else {
            return;
        };

        match telegram.command {
            Command::Ret => {
                match descriptor.decode(&self.values, Command::Ret, telegram.payload()) {
                    Ok(value) => {
                        self.on_success(index, descriptor);
                        self.publish(index, descriptor, &value);
                    }
                    Err(e) => {
                        self.stats.decode_errors += 1;
                        warn!(
                            "Field 0x{:08X}: rejected response {}: {}",
                            descriptor.field_id, telegram, e
                        );
                    }
                }
                self.fields[index].last_poll = Some(now_ms);
            }
            Command::Ack => {
                self.on_success(index, descriptor);
                self.schedule_readback(index, now_ms);
                if let Some(write) = pending.write {
                    debug!("Field 0x{:08X}: write {} accepted", write.field_id, write.value);
                    self.publish_number(index, descriptor, write.value);
                }
            }
            Command::Nack => {
                self.schedule_readback(index, now_ms);
                if let Some(write) = pending.write {
                    warn!(
                        "Field 0x{:08X}: write {} rejected by controller",
                        write.field_id, write.value
                    );
                    self.with_sink(index, |sink| sink.on_write_rejected(write.field_id, write.value));
                }
            }
            _ => {}
        }
    }

    fn handle_broadcast(&mut self, telegram: &Telegram, now_ms: u64) {
        let registry = Arc::clone(&self.registry);
        let parameter_number = telegram.parameter_number_as(self.config.broadcast_layout);
        let mut consumed = false;

        for (index, descriptor) in registry.iter().enumerate() {
            if descriptor.parameter_number != parameter_number || !self.fields[index].enabled {
                continue;
            }
            consumed = true;
            match descriptor.decode(&self.values, Command::Inf, telegram.payload()) {
                Ok(value) => {
                    self.publish(index, descriptor, &value);
                    self.fields[index].last_poll = Some(now_ms);
                }
                Err(e) => {
                    self.stats.decode_errors += 1;
                    debug!("Broadcast for 0x{:08X} not decoded: {}", descriptor.field_id, e);
                }
            }
        }

        if !consumed {
            self.stats.frames_discarded += 1;
        }
    }

    fn advance_timers(&mut self, now_ms: u64) {
        match &self.state {
            EngineState::AwaitingResponse { pending, deadline } if now_ms >= *deadline => {
                let pending = pending.clone();
                self.on_timeout(pending, now_ms);
            }
            EngineState::Backoff { pending, resume_at } if now_ms >= *resume_at => {
                let mut pending = pending.clone();
                pending.attempt = pending.attempt.saturating_add(1);
                match self.send(&pending.telegram) {
                    Ok(()) => {
                        self.stats.retries += 1;
                        let deadline = now_ms.saturating_add(self.policy_for(pending.field_id).interval_ms());
                        debug!(
                            "Field 0x{:08X}: attempt {}",
                            pending.field_id, pending.attempt
                        );
                        self.state = EngineState::AwaitingResponse { pending, deadline };
                    }
                    Err(BsbError::TransportBusy) => {
                        // Stay in backoff, the attempt is not spent
                        if self.busy_exhausted() {
                            self.give_up(&pending, now_ms);
                        }
                    }
                    Err(e) => {
                        warn!("Field 0x{:08X}: resend failed: {}", pending.field_id, e);
                        self.give_up(&pending, now_ms);
                    }
                }
            }
            _ => {}
        }
    }

    fn on_timeout(&mut self, pending: PendingRequest, now_ms: u64) {
        self.stats.timeouts += 1;
        let Some(index) = self.registry.index_of(pending.field_id) else {
            self.state = EngineState::Idle;
            return;
        };

        let policy = self.policy_for(pending.field_id);
        match policy.on_timeout(&mut self.fields[index].retry, pending.attempt, now_ms) {
            RetryDecision::Retry { resume_at } => {
                debug!(
                    "Field 0x{:08X}: no response to attempt {}, retrying",
                    pending.field_id, pending.attempt
                );
                self.state = EngineState::Backoff { pending, resume_at };
            }
            RetryDecision::GiveUp => self.give_up(&pending, now_ms),
        }
    }

    /// Report a field unreachable for this cycle and return to idle
    fn give_up(&mut self, pending: &PendingRequest, now_ms: u64) {
        self.state = EngineState::Idle;
        self.busy_streak = 0;
        self.resolved_since_cycle = true;

        let Some(index) = self.registry.index_of(pending.field_id) else {
            return;
        };
        self.stats.unreachable += 1;
        let reason = BsbError::FieldUnreachable {
            field_id: pending.field_id,
        };
        warn!(
            "{} (parameter {:08X}, {} attempt(s))",
            reason, pending.parameter_number, pending.attempt
        );

        if pending.write.is_none() {
            self.fields[index].last_poll = Some(now_ms);
            self.fields[index].readback_at = None;
        }
        self.with_sink(index, |sink| sink.on_unreachable(pending.field_id));
        self.hooks.fire_bus_timeout(pending.field_id);
    }

    fn dispatch(&mut self, now_ms: u64) {
        if self.dispatch_write(now_ms) {
            return;
        }
        if self.dispatch_poll(now_ms) {
            return;
        }

        if self.resolved_since_cycle && !self.any_due(now_ms) {
            self.resolved_since_cycle = false;
            self.stats.cycles_completed += 1;
            debug!("Readout cycle complete");
            self.hooks.fire_cycle_complete();
        }
    }

    /// Send the oldest queued write; true when the bus was used
    fn dispatch_write(&mut self, now_ms: u64) -> bool {
        let registry = Arc::clone(&self.registry);

        while let Some(write) = self.writes.pop() {
            let Some(index) = registry.index_of(write.field_id) else {
                continue;
            };
            if !self.fields[index].enabled {
                continue;
            }
            let Some(descriptor) = registry.at(index) else {
                continue;
            };

            let (command, payload) = match descriptor.encode_write(&self.values, write.value) {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!("Field 0x{:08X}: write {} dropped: {}", write.field_id, write.value, e);
                    continue;
                }
            };
            let address = if command == Command::Inf {
                self.config.address.broadcast()
            } else {
                self.config.address
            };
            let telegram = match Telegram::new(address, command, descriptor.parameter_number, &payload) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Field 0x{:08X}: write {} dropped: {}", write.field_id, write.value, e);
                    continue;
                }
            };

            return match self.send(&telegram) {
                Ok(()) if command == Command::Inf => {
                    self.stats.broadcasts_sent += 1;
                    self.resolved_since_cycle = true;
                    self.publish_number(index, descriptor, write.value);
                    true
                }
                Ok(()) => {
                    self.stats.writes_sent += 1;
                    let deadline = now_ms.saturating_add(self.policy_for(write.field_id).interval_ms());
                    self.state = EngineState::AwaitingResponse {
                        pending: PendingRequest {
                            field_id: write.field_id,
                            parameter_number: descriptor.parameter_number,
                            command,
                            issued_at: now_ms,
                            attempt: 1,
                            write: Some(write),
                            telegram,
                        },
                        deadline,
                    };
                    true
                }
                Err(BsbError::TransportBusy) => {
                    if self.busy_exhausted() {
                        warn!(
                            "Field 0x{:08X}: write {} dropped, transport busy",
                            write.field_id, write.value
                        );
                    } else {
                        self.writes.requeue_front(write);
                    }
                    true
                }
                Err(e) => {
                    warn!("Field 0x{:08X}: write {} failed: {}", write.field_id, write.value, e);
                    true
                }
            };
        }
        false
    }

    /// Poll the most overdue field; true when a field was due
    fn dispatch_poll(&mut self, now_ms: u64) -> bool {
        let Some(index) = self.next_due(now_ms) else {
            return false;
        };
        let registry = Arc::clone(&self.registry);
        let Some(descriptor) = registry.at(index) else {
            return false;
        };

        let telegram = match Telegram::new(self.config.address, Command::Get, descriptor.parameter_number, &[]) {
            Ok(t) => t,
            Err(_) => return false,
        };
        let pending = PendingRequest {
            field_id: descriptor.field_id,
            parameter_number: descriptor.parameter_number,
            command: Command::Get,
            issued_at: now_ms,
            attempt: 1,
            write: None,
            telegram,
        };

        match self.send(&pending.telegram) {
            Ok(()) => {
                self.stats.requests_sent += 1;
                self.fields[index].readback_at = None;
                let deadline = now_ms.saturating_add(self.policy_for(descriptor.field_id).interval_ms());
                self.state = EngineState::AwaitingResponse { pending, deadline };
            }
            Err(BsbError::TransportBusy) => {
                if self.busy_exhausted() {
                    self.give_up(&pending, now_ms);
                }
            }
            Err(e) => {
                warn!("Field 0x{:08X}: request failed: {}", descriptor.field_id, e);
                self.give_up(&pending, now_ms);
            }
        }
        true
    }

    /// Earliest due field, ties broken by registration order
    fn next_due(&self, now_ms: u64) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (index, descriptor) in self.registry.iter().enumerate() {
            let Some(due_at) = self.due_at(index, descriptor) else {
                continue;
            };
            if due_at > now_ms {
                continue;
            }
            if best.map_or(true, |(_, best_due)| due_at < best_due) {
                best = Some((index, due_at));
            }
        }
        best.map(|(index, _)| index)
    }

    fn any_due(&self, now_ms: u64) -> bool {
        !self.writes.is_empty() || self.next_due(now_ms).is_some()
    }

    fn due_at(&self, index: usize, descriptor: &FieldDescriptor) -> Option<u64> {
        let field = &self.fields[index];
        if !field.enabled || !descriptor.is_pollable() {
            return None;
        }
        let scheduled = match field.last_poll {
            Some(last) => last.saturating_add(descriptor.update_interval.as_millis() as u64),
            None => 0,
        };
        Some(field.readback_at.map_or(scheduled, |at| at.min(scheduled)))
    }

    /// Poll a written field again soon to pick up the controller's value
    fn schedule_readback(&mut self, index: usize, now_ms: u64) {
        let delay = READBACK_DELAY.as_millis() as u64;
        self.fields[index].readback_at = Some(now_ms.saturating_add(delay));
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn send(&mut self, telegram: &Telegram) -> BsbResult<()> {
        let frame = self.codec.encode_telegram(telegram);
        match self.link.write(&frame) {
            Ok(()) => {
                self.busy_streak = 0;
                if self.config.packet_logging {
                    debug!(">>> {}", telegram);
                }
                Ok(())
            }
            Err(BsbError::TransportBusy) => {
                self.stats.transport_busy += 1;
                self.busy_streak += 1;
                trace!("Transport busy ({} in a row)", self.busy_streak);
                Err(BsbError::TransportBusy)
            }
            Err(e) => Err(e),
        }
    }

    /// True once the busy streak reaches the limit; resets the streak
    fn busy_exhausted(&mut self) -> bool {
        if self.busy_streak >= self.config.max_busy_retries.max(1) {
            self.busy_streak = 0;
            true
        } else {
            false
        }
    }

    fn policy_for(&self, field_id: FieldId) -> RetryPolicy {
        let defaults = self.config.default_retry_policy();
        match self.registry.get(field_id) {
            Some(descriptor) => RetryPolicy::for_field(descriptor, defaults),
            None => defaults,
        }
    }

    fn on_success(&mut self, index: usize, descriptor: &FieldDescriptor) {
        let policy = RetryPolicy::for_field(descriptor, self.config.default_retry_policy());
        policy.on_success(&mut self.fields[index].retry);
    }

    fn index_of(&self, field_id: FieldId) -> BsbResult<usize> {
        self.registry
            .index_of(field_id)
            .ok_or(BsbError::UnknownField { field_id })
    }

    fn with_sink<F: FnOnce(&mut dyn ValueSink)>(&mut self, index: usize, f: F) {
        if let Some(sink) = self.sinks[index].as_mut() {
            f(sink.as_mut());
        } else if let Some(sink) = self.default_sink.as_mut() {
            f(sink.as_mut());
        }
    }

    fn publish(&mut self, index: usize, descriptor: &FieldDescriptor, value: &DecodedValue) {
        let field_id = descriptor.field_id;
        if descriptor.kind == FieldKind::Text {
            let text = value.text();
            self.with_sink(index, |sink| sink.on_text(field_id, &text));
        } else if !value.valid {
            self.with_sink(index, |sink| sink.on_null(field_id));
        } else {
            self.publish_number(index, descriptor, value.engineering_value);
        }
    }

    fn publish_number(&mut self, index: usize, descriptor: &FieldDescriptor, value: f64) {
        let field_id = descriptor.field_id;
        let switch_state = match descriptor.kind {
            FieldKind::Switch { on_value, .. } if value == on_value => Some(true),
            FieldKind::Switch { off_value, .. } if value == off_value => Some(false),
            _ => None,
        };
        self.with_sink(index, |sink| {
            sink.on_value(field_id, value);
            if let Some(on) = switch_state {
                sink.on_switch(field_id, on);
            }
        });
    }
}

impl<L: TransportLink + std::fmt::Debug, C: Checksum + Clone> std::fmt::Debug for PollScheduler<L, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("config", &self.config)
            .field("fields", &self.registry.len())
            .field("state", &self.state)
            .field("pending_writes", &self.writes.len())
            .field("stats", &self.stats)
            .field("link", &self.link)
            .finish()
    }
}
