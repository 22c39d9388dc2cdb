use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dronelander::telemetry;
use dronelander::{
    DroneAgent, EpisodeRecord, FeatureLayout, Mode, Orchestrator, TrainingConfig,
    TransportSession, WsConnector, describe_summary, plot_rewards, write_rewards_csv,
};

type TrainBackend = Autodiff<NdArray<f32>>;

const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;

#[derive(Parser, Debug)]
#[command(
    about = "Train a drone landing policy against a live simulator",
    version,
    author
)]
struct TrainArgs {
    /// JSON run configuration; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Simulator WebSocket URL [default: ws://localhost:8765].
    #[arg(long)]
    uri: Option<String>,
    /// Number of training episodes [default: 50].
    #[arg(long)]
    episodes: Option<usize>,
    /// Stop after this many attempted episodes even if fewer were recorded.
    #[arg(long)]
    max_attempts: Option<usize>,
    /// Step limit per episode [default: 1000].
    #[arg(long)]
    steps: Option<usize>,
    /// Checkpoint to resume from. A checkpoint that fails to load is skipped.
    #[arg(long)]
    load: Option<PathBuf>,
    /// Consecutive reconnect attempts before giving up [default: 10].
    #[arg(long)]
    reconnect_attempts: Option<u32>,
    /// Write a numbered checkpoint every N recorded episodes [default: 1].
    #[arg(long)]
    save_interval: Option<usize>,
    /// Directory for checkpoints and the reward report [default: models].
    #[arg(long)]
    output: Option<PathBuf>,
    /// Observation layout fed to the network.
    #[arg(long, value_enum)]
    layout: Option<LayoutArg>,
    /// Seed for exploration and replay sampling.
    #[arg(long)]
    seed: Option<u64>,
    /// Ask the simulator for a forced reset between episodes.
    #[arg(long)]
    force_reset: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LayoutArg {
    Kinematic,
    TargetRelative,
}

impl From<LayoutArg> for FeatureLayout {
    fn from(value: LayoutArg) -> Self {
        match value {
            LayoutArg::Kinematic => FeatureLayout::Kinematic,
            LayoutArg::TargetRelative => FeatureLayout::TargetRelative,
        }
    }
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
    let args = TrainArgs::parse();
    let config = resolve_config(&args)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(train(&args, config))
}

fn resolve_config(args: &TrainArgs) -> Result<TrainingConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => TrainingConfig::from_file(path)?,
        None => {
            let mut config = TrainingConfig::default();
            config.transport.max_reconnect_attempts = DEFAULT_RECONNECT_ATTEMPTS;
            config
        }
    };
    if let Some(uri) = &args.uri {
        config.transport.url = uri.clone();
    }
    if let Some(attempts) = args.reconnect_attempts {
        config.transport.max_reconnect_attempts = attempts;
    }
    if let Some(episodes) = args.episodes {
        config.episode.episodes = episodes;
    }
    if args.max_attempts.is_some() {
        config.episode.max_attempts = args.max_attempts;
    }
    if let Some(steps) = args.steps {
        config.episode.max_steps = steps;
    }
    if let Some(interval) = args.save_interval {
        config.episode.checkpoint_every = interval;
    }
    if let Some(output) = &args.output {
        config.episode.checkpoint_dir = output.clone();
    }
    if let Some(layout) = args.layout {
        config.codec.layout = layout.into();
    }
    if let Some(seed) = args.seed {
        config.agent.seed = seed;
    }
    config.episode.force_reset |= args.force_reset;
    config.validate()?;
    Ok(config)
}

async fn train(args: &TrainArgs, config: TrainingConfig) -> Result<(), Box<dyn Error>> {
    let mut agent = DroneAgent::<TrainBackend>::new(config.agent.clone(), config.codec.layout);
    if let Some(path) = &args.load {
        match agent.load(path) {
            Ok(metadata) => info!(
                path = %path.display(),
                epsilon = metadata.epsilon,
                updates = metadata.updates,
                "resuming from checkpoint"
            ),
            Err(err) => warn!(
                path = %path.display(),
                %err,
                "checkpoint not loaded; starting fresh"
            ),
        }
    }

    info!(url = %config.transport.url, episodes = config.episode.episodes, "connecting");
    let (writer, _reader) = telemetry::slot();
    let connector = WsConnector::new(config.transport.url.clone());
    let (session, receiver) =
        TransportSession::start(connector, config.transport.clone(), writer.clone()).await?;

    let mut orchestrator =
        Orchestrator::new(&config, Mode::Train, Arc::clone(&session), writer, agent);
    let interrupted = tokio::select! {
        summary = orchestrator.run() => {
            info!(episodes = summary.episodes, landings = summary.landings, "training finished");
            false
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                error!(%err, "interrupt handler failed");
            }
            true
        }
    };
    if interrupted {
        warn!("interrupted; saving checkpoint");
        match orchestrator.save_named("drone_model_interrupted") {
            Ok(path) => info!(path = %path.display(), "checkpoint saved"),
            Err(err) => error!(%err, "interrupted checkpoint not saved"),
        }
    }

    receiver.abort();
    session.lock().await.close().await;

    write_report(orchestrator.history(), &config.episode.checkpoint_dir)?;
    println!("{}", describe_summary(&orchestrator.summary()));
    Ok(())
}

fn write_report(history: &[EpisodeRecord], dir: &Path) -> Result<(), Box<dyn Error>> {
    if history.is_empty() {
        warn!("no episodes recorded; skipping report");
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    let csv_path = dir.join("training_rewards.csv");
    write_rewards_csv(history, &csv_path)?;
    info!(path = %csv_path.display(), "rewards written");

    let plot_path = dir.join("training_rewards.png");
    match plot_rewards(history, &plot_path) {
        Ok(()) => info!(path = %plot_path.display(), "reward plot written"),
        Err(err) => warn!(%err, "reward plot not written"),
    }
    Ok(())
}
