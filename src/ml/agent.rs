use std::fs;
use std::path::Path;

use burn::module::{AutodiffModule, Module};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::encoding::{FeatureLayout, StateEncoder};
use super::network::ValueNetwork;
use super::replay::Transition;
use crate::action::{ACTION_DIM, Action};
use crate::config::AgentConfig;
use crate::error::{AgentError, PersistenceError};

type NetworkRecord<B> = <ValueNetwork<B> as Module<B>>::Record;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub layout: FeatureLayout,
    pub features: usize,
    pub hidden: usize,
    pub epsilon: f32,
    pub updates: u64,
}

#[derive(Serialize, Deserialize)]
struct AgentCheckpoint {
    metadata: CheckpointMetadata,
    weights: Vec<u8>,
}

fn tensor_error<E: std::fmt::Debug>(err: E) -> AgentError {
    AgentError::Tensor(format!("{err:?}"))
}

/// Epsilon-greedy learner with an online network trained by Adam and a
/// target network that is hard-synced every `target_sync_period` updates.
pub struct DroneAgent<B: AutodiffBackend> {
    config: AgentConfig,
    layout: FeatureLayout,
    online: ValueNetwork<B>,
    target: ValueNetwork<B::InnerBackend>,
    optimizer: OptimizerAdaptor<Adam, ValueNetwork<B>, B>,
    rng: StdRng,
    epsilon: f32,
    updates: u64,
}

impl<B: AutodiffBackend> DroneAgent<B> {
    pub fn new(config: AgentConfig, layout: FeatureLayout) -> Self {
        let online = ValueNetwork::<B>::new(layout.width(), config.hidden);
        let target = online.clone().valid();
        Self {
            layout,
            target,
            online,
            optimizer: AdamConfig::new().init(),
            rng: StdRng::seed_from_u64(config.seed),
            epsilon: config.epsilon,
            updates: 0,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn layout(&self) -> FeatureLayout {
        self.layout
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f32) {
        self.epsilon = epsilon.clamp(0.0, 1.0);
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Explores with probability epsilon, otherwise exploits.
    pub fn act(&mut self, features: &[f32]) -> Result<Action, AgentError> {
        if self.rng.r#gen::<f32>() < self.epsilon {
            return Ok(Action::random(&mut self.rng));
        }
        self.act_greedy(features)
    }

    pub fn act_greedy(&self, features: &[f32]) -> Result<Action, AgentError> {
        Ok(Action::new(self.predict(features)?))
    }

    /// Online network output for one observation.
    pub fn predict(&self, features: &[f32]) -> Result<[f32; ACTION_DIM], AgentError> {
        let network = self.online.clone().valid();
        Self::single_row(&network, features, self.layout.width())
    }

    /// Target network output for one observation.
    pub fn predict_target(&self, features: &[f32]) -> Result<[f32; ACTION_DIM], AgentError> {
        Self::single_row(&self.target, features, self.layout.width())
    }

    fn single_row(
        network: &ValueNetwork<B::InnerBackend>,
        features: &[f32],
        width: usize,
    ) -> Result<[f32; ACTION_DIM], AgentError> {
        check_width(features, width)?;
        let input = StateEncoder::batch_tensor::<B::InnerBackend>(&[features], width);
        let values = network
            .forward(input)
            .into_data()
            .to_vec::<f32>()
            .map_err(tensor_error)?;
        let mut out = [0.0; ACTION_DIM];
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = value;
        }
        Ok(out)
    }

    /// One gradient step on the batch. Targets bootstrap from the target
    /// network and are blended per action dimension by how close the taken
    /// action was to the current prediction. Returns the loss, or `None` for an
    /// empty batch.
    pub fn update(&mut self, batch: &[Transition]) -> Result<Option<f32>, AgentError> {
        if batch.is_empty() {
            return Ok(None);
        }
        let width = self.layout.width();
        for transition in batch {
            check_width(&transition.state, width)?;
            check_width(&transition.next_state, width)?;
        }
        let rows = batch.len();
        let states: Vec<&[f32]> = batch.iter().map(|t| t.state.as_slice()).collect();
        let next_states: Vec<&[f32]> = batch.iter().map(|t| t.next_state.as_slice()).collect();

        let next_max = self
            .target
            .forward(StateEncoder::batch_tensor::<B::InnerBackend>(&next_states, width))
            .max_dim(1)
            .into_data()
            .to_vec::<f32>()
            .map_err(tensor_error)?;

        let predictions = self
            .online
            .forward(StateEncoder::batch_tensor::<B>(&states, width));
        let predicted = predictions
            .clone()
            .detach()
            .into_data()
            .to_vec::<f32>()
            .map_err(tensor_error)?;

        let mut targets = Vec::with_capacity(rows * ACTION_DIM);
        for (row, transition) in batch.iter().enumerate() {
            let bootstrap = if transition.done {
                transition.reward
            } else {
                transition.reward + self.config.gamma * next_max[row]
            };
            for dim in 0..ACTION_DIM {
                let current = predicted[row * ACTION_DIM + dim];
                let similarity = 1.0 - (transition.action.0[dim] - current).abs();
                targets.push(current + similarity * (bootstrap - current));
            }
        }
        let targets = Tensor::<B, 2>::from_data(
            TensorData::new(targets, [rows, ACTION_DIM]),
            &<B as Backend>::Device::default(),
        );

        let loss = (predictions - targets).powf_scalar(2.0).mean();
        let loss_value = loss
            .clone()
            .detach()
            .into_data()
            .to_vec::<f32>()
            .map_err(tensor_error)?
            .pop()
            .unwrap_or_default();
        let grads = GradientsParams::from_grads(loss.backward(), &self.online);
        let model = self.online.clone();
        self.online = self
            .optimizer
            .step(self.config.learning_rate, model, grads);

        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        self.updates += 1;
        if self.updates % self.config.target_sync_period == 0 {
            self.sync_target();
            debug!(updates = self.updates, "target network synced");
        }
        Ok(Some(loss_value))
    }

    /// Overwrites the target network with the online parameters.
    pub fn sync_target(&mut self) {
        self.target = self.online.clone().valid();
    }

    pub fn metadata(&self) -> CheckpointMetadata {
        CheckpointMetadata {
            layout: self.layout,
            features: self.layout.width(),
            hidden: self.config.hidden,
            epsilon: self.epsilon,
            updates: self.updates,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let record = self.online.clone().valid().into_record();
        let weights = BinBytesRecorder::<FullPrecisionSettings>::new()
            .record(record, ())
            .map_err(|err| PersistenceError::Record(err.to_string()))?;
        let checkpoint = AgentCheckpoint {
            metadata: self.metadata(),
            weights,
        };
        let bytes = bincode::serde::encode_to_vec(&checkpoint, bincode::config::standard())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        debug!(path = %path.display(), "checkpoint written");
        Ok(())
    }

    /// Restores weights, epsilon and the update counter, then resyncs the
    /// target network. The optimiser state starts fresh.
    pub fn load(&mut self, path: &Path) -> Result<CheckpointMetadata, PersistenceError> {
        let bytes = fs::read(path)?;
        let (checkpoint, _): (AgentCheckpoint, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        let expected = self.metadata();
        let found = &checkpoint.metadata;
        if found.layout != expected.layout
            || found.features != expected.features
            || found.hidden != expected.hidden
        {
            return Err(PersistenceError::Incompatible {
                expected: describe_shape(&expected),
                found: describe_shape(found),
            });
        }
        let device = <B as Backend>::Device::default();
        let record = BinBytesRecorder::<FullPrecisionSettings>::new()
            .load::<NetworkRecord<B>>(checkpoint.weights, &device)
            .map_err(|err| PersistenceError::Record(err.to_string()))?;
        self.online = self.online.clone().load_record(record);
        self.optimizer = AdamConfig::new().init();
        self.sync_target();
        self.epsilon = checkpoint.metadata.epsilon;
        self.updates = checkpoint.metadata.updates;
        info!(
            path = %path.display(),
            epsilon = self.epsilon,
            updates = self.updates,
            "checkpoint loaded"
        );
        Ok(checkpoint.metadata)
    }
}

fn check_width(features: &[f32], expected: usize) -> Result<(), AgentError> {
    if features.len() != expected {
        return Err(AgentError::FeatureWidth {
            expected,
            found: features.len(),
        });
    }
    Ok(())
}

fn describe_shape(metadata: &CheckpointMetadata) -> String {
    format!(
        "{:?}/{} features/{} hidden",
        metadata.layout, metadata.features, metadata.hidden
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;
    use tempdir::TempDir;

    type TrainBackend = Autodiff<NdArray<f32>>;

    fn config() -> AgentConfig {
        AgentConfig {
            batch_size: 4,
            replay_capacity: 64,
            hidden: 16,
            target_sync_period: 3,
            ..AgentConfig::default()
        }
    }

    fn features(seed: f32) -> Vec<f32> {
        (0..FeatureLayout::TargetRelative.width())
            .map(|i| ((i as f32 + seed) * 0.37).sin())
            .collect()
    }

    fn batch(size: usize) -> Vec<Transition> {
        (0..size)
            .map(|i| Transition {
                state: features(i as f32),
                action: Action::new([0.5, -0.2, 0.1, 0.0]),
                reward: 1.0 + i as f32,
                next_state: features(i as f32 + 0.5),
                done: i % 3 == 0,
            })
            .collect()
    }

    fn outputs_match(a: [f32; ACTION_DIM], b: [f32; ACTION_DIM]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6)
    }

    #[test]
    fn epsilon_decays_monotonically_to_floor() {
        let mut agent = DroneAgent::<TrainBackend>::new(
            AgentConfig {
                epsilon_decay: 0.5,
                epsilon_min: 0.1,
                ..config()
            },
            FeatureLayout::TargetRelative,
        );
        let transitions = batch(4);
        let mut previous = agent.epsilon();
        for _ in 0..10 {
            agent.update(&transitions).expect("update");
            assert!(agent.epsilon() <= previous);
            assert!(agent.epsilon() >= 0.1);
            previous = agent.epsilon();
        }
        assert!((agent.epsilon() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let mut agent = DroneAgent::<TrainBackend>::new(config(), FeatureLayout::TargetRelative);
        assert_eq!(agent.update(&[]).expect("update"), None);
        assert_eq!(agent.updates(), 0);
        assert_eq!(agent.epsilon(), 1.0);
    }

    #[test]
    fn update_reports_finite_loss() {
        let mut agent = DroneAgent::<TrainBackend>::new(config(), FeatureLayout::TargetRelative);
        let loss = agent.update(&batch(4)).expect("update").expect("loss");
        assert!(loss.is_finite());
        assert_eq!(agent.updates(), 1);
    }

    #[test]
    fn target_is_frozen_between_syncs_and_matches_after() {
        let mut agent = DroneAgent::<TrainBackend>::new(config(), FeatureLayout::TargetRelative);
        let observation = features(42.0);
        let transitions = batch(4);
        let initial_target = agent.predict_target(&observation).expect("target");
        assert!(outputs_match(initial_target, agent.predict(&observation).expect("online")));

        for _ in 0..2 {
            agent.update(&transitions).expect("update");
            assert!(outputs_match(
                agent.predict_target(&observation).expect("target"),
                initial_target
            ));
        }
        assert!(!outputs_match(agent.predict(&observation).expect("online"), initial_target));

        agent.update(&transitions).expect("update");
        assert_eq!(agent.updates(), 3);
        assert!(outputs_match(
            agent.predict_target(&observation).expect("target"),
            agent.predict(&observation).expect("online"),
        ));
    }

    #[test]
    fn exploit_only_when_epsilon_is_zero() {
        let mut agent = DroneAgent::<TrainBackend>::new(config(), FeatureLayout::TargetRelative);
        agent.set_epsilon(0.0);
        let observation = features(1.0);
        let greedy = agent.act_greedy(&observation).expect("greedy");
        for _ in 0..5 {
            assert_eq!(agent.act(&observation).expect("act"), greedy);
        }
    }

    #[test]
    fn wrong_feature_width_is_rejected() {
        let mut agent = DroneAgent::<TrainBackend>::new(config(), FeatureLayout::Kinematic);
        assert!(matches!(
            agent.act_greedy(&features(0.0)),
            Err(AgentError::FeatureWidth { expected: 12, found: 15 })
        ));
        assert!(agent.update(&batch(2)).is_err());
    }

    #[test]
    fn save_then_load_reproduces_greedy_actions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("agent_checkpoint")?;
        let path = dir.path().join("nested").join("drone_model_latest.bin");
        let mut trained = DroneAgent::<TrainBackend>::new(config(), FeatureLayout::TargetRelative);
        for _ in 0..4 {
            trained.update(&batch(4))?;
        }
        trained.save(&path)?;

        let mut restored = DroneAgent::<TrainBackend>::new(
            AgentConfig {
                seed: 99,
                ..config()
            },
            FeatureLayout::TargetRelative,
        );
        let metadata = restored.load(&path)?;
        assert_eq!(metadata.updates, 4);
        assert_eq!(restored.updates(), 4);
        assert_eq!(restored.epsilon(), trained.epsilon());

        trained.set_epsilon(0.0);
        restored.set_epsilon(0.0);
        for seed in 0..5 {
            let observation = features(seed as f32 * 3.0);
            let expected = trained.act(&observation)?;
            let actual = restored.act(&observation)?;
            assert!(outputs_match(expected.0, actual.0));
            assert!(outputs_match(
                restored.predict_target(&observation)?,
                restored.predict(&observation)?
            ));
        }
        Ok(())
    }

    #[test]
    fn load_rejects_mismatched_shape() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("agent_mismatch")?;
        let path = dir.path().join("model.bin");
        DroneAgent::<TrainBackend>::new(config(), FeatureLayout::TargetRelative).save(&path)?;
        let mut other = DroneAgent::<TrainBackend>::new(config(), FeatureLayout::Kinematic);
        assert!(matches!(
            other.load(&path),
            Err(PersistenceError::Incompatible { .. })
        ));
        Ok(())
    }
}
