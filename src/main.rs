mod audio;
mod console;
mod dmx_output;
mod dmx_types;
mod scenes;
mod server;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::console::Console;
use crate::dmx_output::{AdapterFraming, DMX_BAUD, LoopOptions, SerialLink, TransmitLoop};
use crate::dmx_types::FixtureMap;

#[derive(Parser, Debug)]
#[command(
    name = "dmx-bridge",
    about = "Bridges the web lighting controller to a USB-DMX adapter"
)]
struct Args {
    /// Serial port of the adapter; auto-discovered when omitted
    #[arg(long)]
    port: Option<String>,
    /// Serial baud rate
    #[arg(long, default_value_t = DMX_BAUD)]
    baud: u32,
    /// Adapter framing: open or enttec-pro
    #[arg(long, default_value = "open")]
    framing: AdapterFraming,
    /// Fixture DMX start address (1-based)
    #[arg(long, default_value_t = 1)]
    address: usize,
    /// Universe refresh rate in Hz
    #[arg(long, default_value_t = 44.0)]
    rate: f64,
    /// Listen address for the browser controller API
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    anyhow::ensure!(args.rate > 0.0, "refresh rate must be positive");
    let fixture = FixtureMap::new(args.address)?;
    let console = Console::new(fixture, rand::random::<u64>());

    let link = SerialLink::new(args.framing, args.baud);
    let opts = LoopOptions {
        period: Duration::from_secs_f64(1.0 / args.rate),
        // Reconnect/discovery attempts roughly once a second.
        retry_ticks: args.rate.ceil() as u32,
        port_override: args.port.clone(),
    };
    let transmit = TransmitLoop::spawn(console.clone(), Box::new(link), opts);
    tracing::info!(
        rate = args.rate,
        address = args.address,
        framing = %args.framing,
        "dmx transmit loop started"
    );

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    tracing::info!(addr = %args.listen, "control surface listening");

    axum::serve(listener, server::router(console))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    transmit.stop();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
