//! Voltage BSB Demo
//!
//! Polls a few well-known parameters of a BSB heating controller over a
//! serial adapter and logs every value.
//!
//! Usage: cargo run --features serial --bin demo [serial_port]
//! Example: RUST_LOG=voltage_bsb=debug cargo run --features serial --bin demo /dev/ttyUSB0

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voltage_bsb::runtime::{open_serial, run_engine};
use voltage_bsb::{
    BufferedLink, EngineConfig, FieldDescriptor, FieldRegistry, PollScheduler, TracingSink,
    ValueType,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("{}", voltage_bsb::info());

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    // =========================================================================
    // Fields
    // =========================================================================
    let mut registry = FieldRegistry::new();

    // Outside temperature
    registry.register(
        FieldDescriptor::sensor(8700, 0x3D2D0215)
            .with_value_type(ValueType::Temperature)
            .with_update_interval(Duration::from_secs(60)),
    )?;
    // Boiler temperature
    registry.register(
        FieldDescriptor::sensor(8310, 0x0D3D0519)
            .with_value_type(ValueType::Temperature)
            .with_update_interval(Duration::from_secs(30)),
    )?;
    // Comfort setpoint, heating circuit 1
    registry.register(
        FieldDescriptor::number(710, 0x2D3D058E, 16.0, 35.0, 0.5)
            .with_value_type(ValueType::Temperature)
            .with_update_interval(Duration::from_secs(300)),
    )?;
    // Operating mode, heating circuit 1
    registry.register(
        FieldDescriptor::sensor(700, 0x2D3D0574)
            .with_value_type(ValueType::UInt8)
            .with_update_interval(Duration::from_secs(300)),
    )?;
    // Device identification
    registry.register(
        FieldDescriptor::text(6224, 0x053D0064).with_update_interval(Duration::from_secs(3600)),
    )?;

    // =========================================================================
    // Engine
    // =========================================================================
    let config = EngineConfig::new().with_packet_logging(true);
    let mut engine = PollScheduler::new(config, registry, BufferedLink::new(true))?;
    engine.set_default_sink(Box::new(TracingSink));
    engine
        .hooks_mut()
        .on_bus_timeout(|field_id| warn!("Bus timeout on field {}", field_id));
    engine
        .hooks_mut()
        .on_cycle_complete(|| info!("Readout cycle complete"));
    engine.log_config();

    let stream = match open_serial(&port) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("{}", e);
            info!("Connect a BSB adapter and pass its port as the first argument");
            return Ok(());
        }
    };

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop.send(true);
        }
    });

    let engine = run_engine(engine, stream, shutdown).await?;
    let stats = engine.stats();
    info!(
        "Requests: {}, responses: {}, timeouts: {}, invalid frames: {}",
        stats.requests_sent, stats.responses_matched, stats.timeouts, stats.frames_invalid
    );

    Ok(())
}
