use std::error::Error;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dronelander::maneuver::{self, smoke_sequence};
use dronelander::telemetry;
use dronelander::{Outbound, TransportConfig, TransportSession, WsConnector};

/// Flies a fixed open-loop routine to check the simulator link end to end.
#[derive(Parser, Debug)]
#[command(about = "Fly a scripted smoke-test routine", version, author)]
struct SmokeArgs {
    #[arg(long, default_value = "ws://localhost:8765")]
    uri: String,
    /// Stick deflection used for the probing moves (0.0 - 1.0).
    #[arg(long, default_value_t = 0.3)]
    intensity: f32,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = SmokeArgs::parse();
    if !(0.0..=1.0).contains(&args.intensity) {
        return Err("intensity must lie in [0, 1]".into());
    }
    let config = TransportConfig {
        url: args.uri.clone(),
        ..TransportConfig::default()
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let (writer, reader) = telemetry::slot();
        let connector = WsConnector::new(config.url.clone());
        let (session, receiver) = TransportSession::start(connector, config, writer).await?;

        {
            let mut session = session.lock().await;
            session.ping().await;
            session.send(&Outbound::reset(false)).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let plan = smoke_sequence(args.intensity);
        let sent = maneuver::fly(&session, &plan).await;
        match reader.latest() {
            Some(state) => info!(
                altitude = state.altitude(),
                x = state.position.x,
                z = state.position.z,
                "final position"
            ),
            None => warn!("no telemetry received during the flight"),
        }
        info!(sent, maneuvers = plan.len(), "smoke flight complete");

        let mut session = session.lock().await;
        session.send(&Outbound::external_control(false)).await;
        session.close().await;
        receiver.abort();
        Ok::<(), Box<dyn Error>>(())
    })
}
