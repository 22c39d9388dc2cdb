use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dronelander::relay::{self, SharedRegistry};

/// Relays frames between the simulator and any number of controllers.
#[derive(Parser, Debug)]
#[command(about = "WebSocket relay between simulator and controllers", version, author)]
struct RelayArgs {
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value_t = 8765)]
    port: u16,
    /// Log every relayed frame.
    #[arg(long)]
    debug: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = RelayArgs::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
        let registry: SharedRegistry = Arc::default();
        tokio::select! {
            served = relay::serve(listener, registry) => served?,
            _ = tokio::signal::ctrl_c() => info!("relay stopped"),
        }
        Ok::<(), Box<dyn Error>>(())
    })
}
