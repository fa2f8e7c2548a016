//! Simulated BSB Bus
//!
//! Runs the polling engine against an in-process heating controller that
//! answers every Get with a Ret and every Set with an Ack.
//!
//! Usage: cargo run --example simulated_bus --features std
//! Example: RUST_LOG=debug cargo run --example simulated_bus --features std

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use voltage_bsb::bytes::invert_in_place;
use voltage_bsb::runtime::run_engine;
use voltage_bsb::{
    BsbResult, BufferedLink, BusAddress, Command, EngineConfig, FieldDescriptor, FieldRegistry,
    FrameCodec, FrameEvent, FrameReader, PollScheduler, Telegram, TracingSink, ValueCodec,
    ValueType,
};

const OUTSIDE_TEMP: u32 = 0x3D2D0215;
const COMFORT_SETPOINT: u32 = 0x2D3D058E;
const HEATING_MODE: u32 = 0x2D3D0574;

/// Parameter table of the simulated controller
struct Controller {
    codec: FrameCodec,
    values: ValueCodec,
    table: HashMap<u32, (ValueType, f64)>,
}

impl Controller {
    fn new() -> Self {
        let mut table = HashMap::new();
        table.insert(OUTSIDE_TEMP, (ValueType::Temperature, 7.25));
        table.insert(COMFORT_SETPOINT, (ValueType::Temperature, 20.0));
        table.insert(HEATING_MODE, (ValueType::Int8, 1.0));
        Self {
            codec: FrameCodec::new(),
            values: ValueCodec::default(),
            table,
        }
    }

    /// Build the answer to a request, if the controller knows the parameter
    fn answer(&mut self, request: &Telegram) -> BsbResult<Option<Telegram>> {
        let reply_to = BusAddress::new(0x00, request.source);
        let Some(&(value_type, value)) = self.table.get(&request.parameter_number) else {
            return Ok(None);
        };

        match request.command {
            Command::Get => {
                let raw = self.values.encode(value_type, value)?;
                let mut payload = vec![0x00];
                payload.extend_from_slice(&raw);
                Telegram::new(reply_to, Command::Ret, request.parameter_number, &payload).map(Some)
            }
            Command::Set if request.payload.len() > 1 => {
                let written = self.values.decode(value_type, &request.payload[1..])?;
                tracing::info!(
                    "Controller: {:#010X} set {} -> {}",
                    request.parameter_number,
                    value,
                    written
                );
                self.table
                    .insert(request.parameter_number, (value_type, written));
                Telegram::new(reply_to, Command::Ack, request.parameter_number, &[]).map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn serve(mut self, mut line: DuplexStream) -> BsbResult<()> {
        let mut reader = FrameReader::default();
        let mut buf = [0u8; 64];

        loop {
            let n = line.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            let chunk = &mut buf[..n];
            invert_in_place(chunk);

            let mut requests = Vec::new();
            reader.feed(chunk, |event| {
                if let FrameEvent::Telegram(telegram) = event {
                    requests.push(telegram);
                }
            });

            for request in requests {
                if let Some(reply) = self.answer(&request)? {
                    let mut frame = self.codec.encode_telegram(&reply);
                    invert_in_place(&mut frame);
                    line.write_all(&frame).await?;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut registry = FieldRegistry::new();
    registry.register(
        FieldDescriptor::sensor(8700, OUTSIDE_TEMP).with_update_interval(Duration::from_secs(2)),
    )?;
    registry.register(
        FieldDescriptor::number(710, COMFORT_SETPOINT, 16.0, 35.0, 0.5)
            .with_update_interval(Duration::from_secs(3)),
    )?;
    registry.register(
        FieldDescriptor::switch(700, HEATING_MODE, 1.0, 0.0)
            .with_update_interval(Duration::from_secs(3)),
    )?;

    let config = EngineConfig::new()
        .with_query_interval(Duration::from_millis(50))
        .with_packet_logging(true);
    let mut engine = PollScheduler::new(config, registry, BufferedLink::new(true))?;
    engine.set_default_sink(Box::new(TracingSink));
    engine
        .hooks_mut()
        .on_cycle_complete(|| tracing::info!("Readout cycle complete"));

    let writer = engine.write_handle();
    let (engine_io, controller_io) = duplex(256);
    let controller = tokio::spawn(Controller::new().serve(controller_io));

    let (stop, shutdown) = watch::channel(false);
    let driver = tokio::spawn(run_engine(engine, engine_io, shutdown));

    tokio::time::sleep(Duration::from_secs(1)).await;
    writer.request_write(710, 21.5)?;
    writer.request_switch(700, false)?;

    tokio::time::sleep(Duration::from_secs(4)).await;
    stop.send(true)?;

    let engine = driver.await??;
    controller.abort();

    let stats = engine.stats();
    println!(
        "Requests: {}, responses: {}, writes: {}, timeouts: {}",
        stats.requests_sent, stats.responses_matched, stats.writes_sent, stats.timeouts
    );
    Ok(())
}
