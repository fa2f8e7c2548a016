//! # Async Runtime Driver
//!
//! Pumps bytes between an async byte stream and a [`PollScheduler`] and
//! drives its ticks from a tokio interval.
//!
//! The engine itself never touches the stream: received bytes are pushed
//! into its [`BufferedLink`] and whatever the engine wrote is flushed to
//! the stream after every tick.
//!
//! ```rust,no_run
//! # #[cfg(feature = "serial")]
//! # async fn example() -> voltage_bsb::BsbResult<()> {
//! use tokio::sync::watch;
//! use voltage_bsb::runtime::{open_serial, run_engine};
//! use voltage_bsb::{BufferedLink, EngineConfig, FieldDescriptor, FieldRegistry, PollScheduler};
//!
//! let mut registry = FieldRegistry::new();
//! registry.register(FieldDescriptor::sensor(1, 0x3D2D0215))?;
//! let engine = PollScheduler::new(EngineConfig::new(), registry, BufferedLink::default())?;
//!
//! let port = open_serial("/dev/ttyUSB0")?;
//! let (_stop, shutdown) = watch::channel(false);
//! run_engine(engine, port, shutdown).await?;
//! # Ok(())
//! # }
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{BsbError, BsbResult};
use crate::frame::Checksum;
use crate::scheduler::PollScheduler;
use crate::transport::BufferedLink;

/// Read chunk size
const READ_CHUNK: usize = 64;

/// Run the engine over `stream` until `shutdown` turns true.
///
/// Returns the engine so its statistics can be inspected. Fails when the
/// stream reports an error or is closed by the other side.
pub async fn run_engine<S, C>(
    mut engine: PollScheduler<BufferedLink, C>,
    stream: S,
    mut shutdown: watch::Receiver<bool>,
) -> BsbResult<PollScheduler<BufferedLink, C>>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Checksum + Clone,
{
    let (mut rx, mut tx) = tokio::io::split(stream);
    let start = Instant::now();
    let mut ticker = interval(engine.config().query_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut buf = [0u8; READ_CHUNK];

    info!(
        "BSB engine running, {} field(s), tick {:?}",
        engine.registry().len(),
        engine.config().query_interval
    );

    if *shutdown.borrow() {
        return Ok(engine);
    }

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now_ms = start.elapsed().as_millis() as u64;
                engine.tick(now_ms);

                let outgoing = engine.link_mut().take_outgoing();
                if !outgoing.is_empty() {
                    tx.write_all(&outgoing).await?;
                    tx.flush().await?;
                }
            }
            read = rx.read(&mut buf) => {
                match read? {
                    0 => return Err(BsbError::io("bus stream closed")),
                    n => engine.link_mut().push_incoming(&buf[..n]),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("BSB engine shutting down");
                    break;
                }
            }
        }
    }

    info!("BSB engine stopped: {:?}", engine.stats());
    Ok(engine)
}

/// Open a serial port with the BSB line settings (4800 8O1)
#[cfg(feature = "serial")]
pub fn open_serial(path: &str) -> BsbResult<tokio_serial::SerialStream> {
    use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, StopBits};

    tokio_serial::new(path, crate::constants::BSB_BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::Odd)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|e| BsbError::io(format!("Failed to open {}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::invert_in_place;
    use crate::config::EngineConfig;
    use crate::registry::{FieldDescriptor, FieldId, FieldRegistry};
    use crate::sink::ValueSink;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::duplex;

    #[derive(Clone, Default)]
    struct Values(Arc<Mutex<Vec<(FieldId, f64)>>>);

    impl ValueSink for Values {
        fn on_value(&mut self, field_id: FieldId, value: f64) {
            self.0.lock().unwrap().push((field_id, value));
        }
        fn on_unreachable(&mut self, _field_id: FieldId) {}
    }

    fn engine(values: &Values) -> PollScheduler<BufferedLink> {
        let mut registry = FieldRegistry::new();
        registry
            .register(FieldDescriptor::sensor(1, 0x3D2D0215))
            .unwrap();
        let config = EngineConfig::new()
            .with_query_interval(Duration::from_millis(10))
            .with_retry_interval(Duration::from_secs(1));
        let mut engine = PollScheduler::new(config, registry, BufferedLink::new(true)).unwrap();
        engine.set_default_sink(Box::new(values.clone()));
        engine
    }

    #[tokio::test]
    async fn test_engine_polls_over_stream() {
        let values = Values::default();
        let (engine_io, mut bus) = duplex(256);
        let (stop, shutdown) = watch::channel(false);
        let task = tokio::spawn(run_engine(engine(&values), engine_io, shutdown));

        let mut request = [0u8; 11];
        bus.read_exact(&mut request).await.unwrap();
        invert_in_place(&mut request);
        assert_eq!(
            request,
            [0xDC, 0xC2, 0x00, 0x0B, 0x06, 0x2D, 0x3D, 0x02, 0x15, 0x21, 0x9F]
        );

        let mut response = [
            0xDC, 0x80, 0x42, 0x0E, 0x07, 0x3D, 0x2D, 0x02, 0x15, 0x00, 0x05, 0x60, 0x7F, 0x66,
        ];
        invert_in_place(&mut response);
        // Split write exercises reassembly across reads
        bus.write_all(&response[..6]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.write_all(&response[6..]).await.unwrap();

        for _ in 0..100 {
            if !values.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        stop.send(true).unwrap();
        let engine = tokio_test::assert_ok!(task.await.unwrap());
        assert_eq!(*values.0.lock().unwrap(), vec![(1, 21.5)]);
        assert_eq!(engine.stats().responses_matched, 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let values = Values::default();
        let (engine_io, _bus) = duplex(64);
        let (_stop, shutdown) = watch::channel(true);
        let engine = tokio_test::assert_ok!(run_engine(engine(&values), engine_io, shutdown).await);
        assert_eq!(engine.stats().requests_sent, 0);
    }

    #[tokio::test]
    async fn test_closed_stream_is_an_error() {
        let values = Values::default();
        let (engine_io, bus) = duplex(64);
        let (_stop, shutdown) = watch::channel(false);
        drop(bus);
        let result = run_engine(engine(&values), engine_io, shutdown).await;
        assert!(matches!(result, Err(BsbError::Io { .. })));
    }
}
