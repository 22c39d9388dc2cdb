use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dronelander::telemetry;
use dronelander::{
    DroneAgent, Mode, Orchestrator, TrainingConfig, TransportSession, WsConnector,
    describe_summary,
};

type FlyBackend = Autodiff<NdArray<f32>>;

/// Flies a trained policy greedily without learning or writing checkpoints.
#[derive(Parser, Debug)]
#[command(about = "Evaluate a trained drone landing policy", version, author)]
struct FlyArgs {
    /// Checkpoint produced by the `train` binary.
    #[arg(long)]
    load: PathBuf,
    /// JSON run configuration; must describe the same network shape.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "ws://localhost:8765")]
    uri: String,
    #[arg(long, default_value_t = 5)]
    episodes: usize,
    #[arg(long)]
    steps: Option<usize>,
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
    let args = FlyArgs::parse();
    let mut config = match &args.config {
        Some(path) => TrainingConfig::from_file(path)?,
        None => TrainingConfig::default(),
    };
    config.transport.url = args.uri.clone();
    config.episode.episodes = args.episodes;
    if let Some(steps) = args.steps {
        config.episode.max_steps = steps;
    }
    config.validate()?;

    let mut agent = DroneAgent::<FlyBackend>::new(config.agent.clone(), config.codec.layout);
    let metadata = agent.load(&args.load)?;
    agent.set_epsilon(0.0);
    info!(path = %args.load.display(), updates = metadata.updates, "policy loaded");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let (writer, _reader) = telemetry::slot();
        let connector = WsConnector::new(config.transport.url.clone());
        let (session, receiver) =
            TransportSession::start(connector, config.transport.clone(), writer.clone()).await?;
        let mut orchestrator =
            Orchestrator::new(&config, Mode::Evaluate, Arc::clone(&session), writer, agent);
        let finished = tokio::select! {
            summary = orchestrator.run() => Some(summary),
            _ = tokio::signal::ctrl_c() => None,
        };
        let summary = finished.unwrap_or_else(|| orchestrator.summary());
        receiver.abort();
        session.lock().await.close().await;
        println!("{}", describe_summary(&summary));
        Ok::<(), Box<dyn Error>>(())
    })
}
