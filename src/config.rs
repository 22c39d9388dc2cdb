use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::message::Vec3;
use crate::ml::FeatureLayout;

/// Complete run configuration, loadable from a JSON file. Missing fields fall
/// back to their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub transport: TransportConfig,
    pub codec: CodecConfig,
    pub agent: AgentConfig,
    pub episode: EpisodeConfig,
}

impl TrainingConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.transport.validate()?;
        self.codec.validate()?;
        self.agent.validate()?;
        self.episode.validate()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    /// Minimum spacing between two outbound control commands.
    pub control_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: String::from("ws://localhost:8765"),
            max_reconnect_attempts: 5,
            connect_timeout_ms: 10_000,
            reconnect_backoff_ms: 500,
            reconnect_backoff_max_ms: 8_000,
            control_interval_ms: 50,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn control_interval(&self) -> Duration {
        Duration::from_millis(self.control_interval_ms)
    }

    /// Backoff slept before the given (1-based) retry.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.reconnect_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.reconnect_backoff_max_ms))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_reconnect_attempts must be positive",
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid("connect_timeout_ms must be positive"));
        }
        Ok(())
    }
}

/// Weights of the shaped reward.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardWeights {
    pub time_penalty: f32,
    pub proximity_scale: f32,
    pub progress_scale: f32,
    pub landing_bonus: f32,
    pub landing_penalty: f32,
    pub reward_bound: f32,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            time_penalty: -0.1,
            proximity_scale: 5.0,
            progress_scale: 10.0,
            landing_bonus: 200.0,
            landing_penalty: 200.0,
            reward_bound: 1000.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub layout: FeatureLayout,
    pub target: Vec3,
    pub target_radius: f32,
    pub min_altitude: f32,
    pub grace_steps: usize,
    pub max_tilt_deg: f32,
    pub reward: RewardWeights,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            layout: FeatureLayout::TargetRelative,
            target: Vec3::new(30.0, 0.0, 30.0),
            target_radius: 2.5,
            min_altitude: 0.5,
            grace_steps: 20,
            max_tilt_deg: 75.0,
            reward: RewardWeights::default(),
        }
    }
}

impl CodecConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.target_radius > 0.0) {
            return Err(ConfigError::Invalid("target_radius must be positive"));
        }
        if !(self.max_tilt_deg > 0.0) {
            return Err(ConfigError::Invalid("max_tilt_deg must be positive"));
        }
        if !(self.reward.reward_bound > 0.0) {
            return Err(ConfigError::Invalid("reward_bound must be positive"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub learning_rate: f64,
    pub gamma: f32,
    pub epsilon: f32,
    pub epsilon_min: f32,
    pub epsilon_decay: f32,
    /// Updates between two hard copies of the online network into the target.
    pub target_sync_period: u64,
    pub replay_capacity: usize,
    pub batch_size: usize,
    pub hidden: usize,
    pub seed: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1.0e-3,
            gamma: 0.95,
            epsilon: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 0.995,
            target_sync_period: 10,
            replay_capacity: 10_000,
            batch_size: 32,
            hidden: 64,
            seed: 0x0D20_4E5E,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.epsilon_min) || !(0.0..=1.0).contains(&self.epsilon) {
            return Err(ConfigError::Invalid("epsilon must lie in [0, 1]"));
        }
        if self.epsilon_min > self.epsilon {
            return Err(ConfigError::Invalid("epsilon_min must not exceed epsilon"));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(ConfigError::Invalid("gamma must lie in (0, 1]"));
        }
        if !(self.epsilon_decay > 0.0 && self.epsilon_decay <= 1.0) {
            return Err(ConfigError::Invalid("epsilon_decay must lie in (0, 1]"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ConfigError::Invalid("learning_rate must be positive"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive"));
        }
        if self.replay_capacity <= self.batch_size {
            return Err(ConfigError::Invalid(
                "replay_capacity must exceed batch_size",
            ));
        }
        if self.target_sync_period == 0 {
            return Err(ConfigError::Invalid("target_sync_period must be positive"));
        }
        if self.hidden == 0 {
            return Err(ConfigError::Invalid("hidden width must be positive"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    /// Recorded episodes to collect. Skipped and too-short attempts do not
    /// count.
    pub episodes: usize,
    /// Upper bound on attempted episodes; unbounded when absent.
    pub max_attempts: Option<usize>,
    pub max_steps: usize,
    pub step_delay_ms: u64,
    pub telemetry_wait_ms: u64,
    /// Episodes shorter than this are not recorded.
    pub min_episode_ms: u64,
    pub cooldown_ms: u64,
    pub stop_delay_ms: u64,
    pub reset_settle_ms: u64,
    pub force_reset: bool,
    pub checkpoint_dir: PathBuf,
    pub checkpoint_every: usize,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            episodes: 50,
            max_attempts: None,
            max_steps: 1000,
            step_delay_ms: 100,
            telemetry_wait_ms: 5_000,
            min_episode_ms: 1_000,
            cooldown_ms: 2_000,
            stop_delay_ms: 200,
            reset_settle_ms: 3_000,
            force_reset: false,
            checkpoint_dir: PathBuf::from("models"),
            checkpoint_every: 1,
        }
    }
}

impl EpisodeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::Invalid("max_steps must be positive"));
        }
        if self.checkpoint_every == 0 {
            return Err(ConfigError::Invalid("checkpoint_every must be positive"));
        }
        if self.max_attempts.is_some_and(|cap| cap < self.episodes) {
            return Err(ConfigError::Invalid(
                "max_attempts must not be below episodes",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TrainingConfig::default().validate().expect("defaults");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let text = r#"{ "agent": { "gamma": 0.9 }, "transport": { "url": "ws://sim:9000" } }"#;
        let config: TrainingConfig = serde_json::from_str(text).expect("parse");
        assert_eq!(config.agent.gamma, 0.9);
        assert_eq!(config.agent.batch_size, 32);
        assert_eq!(config.transport.url, "ws://sim:9000");
        assert_eq!(config.episode.max_steps, 1000);
    }

    #[test]
    fn rejects_capacity_not_above_batch() {
        let mut agent = AgentConfig::default();
        agent.replay_capacity = agent.batch_size;
        assert!(matches!(agent.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_epsilon_floor_above_start() {
        let mut agent = AgentConfig::default();
        agent.epsilon = 0.1;
        agent.epsilon_min = 0.2;
        assert!(agent.validate().is_err());
    }

    #[test]
    fn attempt_cap_must_cover_the_episode_budget() {
        let mut episode = EpisodeConfig {
            episodes: 5,
            max_attempts: Some(4),
            ..EpisodeConfig::default()
        };
        assert!(matches!(episode.validate(), Err(ConfigError::Invalid(_))));
        episode.max_attempts = Some(5);
        assert!(episode.validate().is_ok());
        episode.max_attempts = None;
        assert!(episode.validate().is_ok());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let transport = TransportConfig::default();
        assert_eq!(transport.backoff(1), Duration::from_millis(500));
        assert_eq!(transport.backoff(2), Duration::from_millis(1_000));
        assert_eq!(transport.backoff(3), Duration::from_millis(2_000));
        assert_eq!(transport.backoff(30), Duration::from_millis(8_000));
    }
}
