//! Episode state machine driving training (or greedy evaluation) against the
//! simulator.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use burn::tensor::backend::AutodiffBackend;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, trace, warn};

use crate::action::{Action, ControlCommand};
use crate::codec::TelemetryCodec;
use crate::config::{EpisodeConfig, TrainingConfig};
use crate::error::{EpisodeAbort, PersistenceError};
use crate::message::Outbound;
use crate::ml::{DroneAgent, ReplayBuffer, Transition};
use crate::state::{EpisodeRecord, TerminationReason, TrainingState, TrainingSummary};
use crate::telemetry::{TelemetryReader, TelemetryWriter};
use crate::transport::{Connector, SharedSession};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Epsilon-greedy control with replay, updates and checkpoints.
    #[default]
    Train,
    /// Greedy control only; nothing is learned or saved.
    Evaluate,
}

/// How an attempted episode ended when it did not abort.
#[derive(Debug)]
enum EpisodeOutcome {
    Recorded(EpisodeRecord),
    /// Ran, but shorter than `min_episode_ms`.
    TooShort,
    /// No telemetry arrived after the reset.
    Skipped,
}

pub struct Orchestrator<B: AutodiffBackend, C: Connector> {
    config: EpisodeConfig,
    mode: Mode,
    session: SharedSession<C>,
    writer: TelemetryWriter,
    reader: TelemetryReader,
    codec: TelemetryCodec,
    replay: ReplayBuffer,
    replay_rng: StdRng,
    batch_size: usize,
    agent: DroneAgent<B>,
    state: TrainingState,
    pending_reset: Option<JoinHandle<()>>,
    history: Vec<EpisodeRecord>,
    best_reward: Option<f32>,
}

impl<B: AutodiffBackend, C: Connector> Orchestrator<B, C> {
    pub fn new(
        config: &TrainingConfig,
        mode: Mode,
        session: SharedSession<C>,
        writer: TelemetryWriter,
        agent: DroneAgent<B>,
    ) -> Self {
        Self {
            config: config.episode.clone(),
            mode,
            session,
            reader: writer.subscribe(),
            writer,
            codec: TelemetryCodec::new(config.codec.clone()),
            replay: ReplayBuffer::new(config.agent.replay_capacity),
            replay_rng: StdRng::seed_from_u64(config.agent.seed.wrapping_add(1)),
            batch_size: config.agent.batch_size,
            agent,
            state: TrainingState::Idle,
            pending_reset: None,
            history: Vec::new(),
            best_reward: None,
        }
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn history(&self) -> &[EpisodeRecord] {
        &self.history
    }

    pub fn agent(&self) -> &DroneAgent<B> {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut DroneAgent<B> {
        &mut self.agent
    }

    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }

    pub fn summary(&self) -> TrainingSummary {
        TrainingSummary::from_records(&self.history)
    }

    /// Runs until `episodes` episodes are recorded, or until `max_attempts`
    /// attempts have been made when a cap is configured. Episode failures are
    /// logged and never stop the run.
    pub async fn run(&mut self) -> TrainingSummary {
        let target = self.config.episodes;
        let mut attempt = 0usize;
        while self.history.len() < target {
            if self.config.max_attempts.is_some_and(|cap| attempt >= cap) {
                warn!(
                    attempt,
                    recorded = self.history.len(),
                    target,
                    "attempt cap reached"
                );
                break;
            }
            attempt += 1;
            match self.run_episode(attempt).await {
                Ok(EpisodeOutcome::Recorded(record)) => self.finish_episode(record),
                Ok(EpisodeOutcome::TooShort) => {}
                Ok(EpisodeOutcome::Skipped) => continue,
                Err(abort) => {
                    error!(attempt, %abort, "episode aborted");
                    self.state = TrainingState::Idle;
                }
            }
            sleep(Duration::from_millis(self.config.cooldown_ms)).await;
        }
        if let Err(abort) = self.await_reset().await {
            warn!(%abort, "final reset failed");
        }
        self.state = TrainingState::Idle;
        self.summary()
    }

    /// One episode from reset to termination.
    async fn run_episode(&mut self, attempt: usize) -> Result<EpisodeOutcome, EpisodeAbort> {
        self.codec.begin_episode();
        self.request_reset();
        self.await_reset().await?;

        let wait = Duration::from_millis(self.config.telemetry_wait_ms);
        if self.reader.wait_for_state(wait).await.is_none() {
            warn!(attempt, "no telemetry after reset; skipping episode");
            self.state = TrainingState::Idle;
            return Ok(EpisodeOutcome::Skipped);
        }

        self.state = TrainingState::EpisodeRunning;
        let max_steps = self.config.max_steps;
        let step_delay = Duration::from_millis(self.config.step_delay_ms);
        let started = Instant::now();
        let mut total_reward = 0.0f32;
        let mut steps = 0usize;
        let mut previous: Option<(Vec<f32>, Action)> = None;
        let mut termination = None;
        debug!(attempt, "episode started");

        for step in 1..=max_steps {
            steps = step;
            let telemetry = self.reader.latest();
            if let Some(reason) = self.codec.is_terminal(telemetry.as_ref(), step, max_steps) {
                if let Some(telemetry) = telemetry.as_ref() {
                    let reward = self.codec.compute_reward(telemetry);
                    total_reward += reward;
                    if let Some((state, action)) = previous.take() {
                        let next_state = self.codec.extract_features(telemetry);
                        self.remember(state, action, reward, next_state, true);
                    }
                }
                if reason.is_success() {
                    info!(step, %reason, "episode finished");
                } else {
                    warn!(step, %reason, "episode finished");
                }
                termination = Some(reason);
                break;
            }
            let Some(telemetry) = telemetry else {
                break;
            };

            let features = self.codec.extract_features(&telemetry);
            let action = match self.mode {
                Mode::Train => self.agent.act(&features)?,
                Mode::Evaluate => self.agent.act_greedy(&features)?,
            };
            // The reward observed now is credited to the previous action.
            let reward = self.codec.compute_reward(&telemetry);
            total_reward += reward;
            if let Some((state, previous_action)) = previous.take() {
                self.remember(state, previous_action, reward, features.clone(), false);
            }
            previous = Some((features, action));

            let command = Outbound::control(action.to_command());
            self.session.lock().await.send(&command).await;

            if self.mode == Mode::Train && self.replay.len() >= self.batch_size {
                let batch = self.replay.sample(self.batch_size, &mut self.replay_rng);
                if let Some(loss) = self.agent.update(&batch)? {
                    trace!(step, loss, "agent updated");
                }
            }
            sleep(step_delay).await;
        }

        self.state = TrainingState::Idle;
        self.request_reset();

        let duration = started.elapsed();
        if duration < Duration::from_millis(self.config.min_episode_ms) {
            info!(attempt, ?duration, "episode too short; not recorded");
            return Ok(EpisodeOutcome::TooShort);
        }
        Ok(EpisodeOutcome::Recorded(EpisodeRecord {
            episode: self.history.len() + 1,
            total_reward,
            steps,
            duration_secs: duration.as_secs_f32(),
            termination: termination.unwrap_or(TerminationReason::NoTelemetry),
            epsilon: self.agent.epsilon(),
        }))
    }

    fn remember(
        &mut self,
        state: Vec<f32>,
        action: Action,
        reward: f32,
        next_state: Vec<f32>,
        done: bool,
    ) {
        if self.mode != Mode::Train {
            return;
        }
        self.replay.push(Transition {
            state,
            action,
            reward,
            next_state,
            done,
        });
    }

    fn finish_episode(&mut self, record: EpisodeRecord) {
        info!(
            episode = record.episode,
            reward = record.total_reward,
            steps = record.steps,
            epsilon = record.epsilon,
            reason = record.termination.label(),
            "episode recorded"
        );
        let is_best = self.best_reward.is_none_or(|best| record.total_reward > best);
        if is_best {
            self.best_reward = Some(record.total_reward);
        }
        if self.mode == Mode::Train {
            if record.episode % self.config.checkpoint_every == 0 {
                self.save_logged(&format!("drone_model_episode_{}", record.episode));
            }
            self.save_logged("drone_model_latest");
            if is_best {
                self.save_logged("drone_model_best");
            }
        }
        self.history.push(record);
    }

    pub fn checkpoint_path(&self, name: &str) -> PathBuf {
        self.config.checkpoint_dir.join(format!("{name}.bin"))
    }

    /// Writes the agent to `<checkpoint_dir>/<name>.bin`.
    pub fn save_named(&self, name: &str) -> Result<PathBuf, PersistenceError> {
        let path = self.checkpoint_path(name);
        self.agent.save(&path)?;
        Ok(path)
    }

    fn save_logged(&self, name: &str) {
        match self.save_named(name) {
            Ok(path) => debug!(path = %path.display(), "checkpoint saved"),
            Err(err) => error!(name, %err, "checkpoint not saved"),
        }
    }

    /// Starts the reset sequence in the background unless one is already in
    /// flight.
    fn request_reset(&mut self) {
        if self.pending_reset.is_some() {
            trace!("reset already in flight");
            return;
        }
        self.state = TrainingState::Resetting;
        let session = Arc::clone(&self.session);
        let writer = self.writer.clone();
        let stop_delay = Duration::from_millis(self.config.stop_delay_ms);
        let settle = Duration::from_millis(self.config.reset_settle_ms);
        let force = self.config.force_reset;
        self.pending_reset = Some(tokio::spawn(async move {
            reset_sequence(session, writer, stop_delay, settle, force).await;
        }));
    }

    async fn await_reset(&mut self) -> Result<(), EpisodeAbort> {
        let Some(handle) = self.pending_reset.take() else {
            return Ok(());
        };
        handle
            .await
            .map_err(|err| EpisodeAbort::Reset(err.to_string()))
    }
}

/// Releases the controls, asks the simulator to reset, drops the stale state
/// and waits for the vehicle to settle.
async fn reset_sequence<C: Connector>(
    session: SharedSession<C>,
    writer: TelemetryWriter,
    stop_delay: Duration,
    settle: Duration,
    force: bool,
) {
    session
        .lock()
        .await
        .send(&Outbound::control(ControlCommand::STOP))
        .await;
    sleep(stop_delay).await;
    if !session.lock().await.send(&Outbound::reset(force)).await {
        warn!("reset request was not delivered");
    }
    writer.clear();
    debug!(force, "reset requested");
    sleep(settle).await;
}
