use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ml::encoding::bounded;

/// Number of continuous action dimensions produced by the network.
pub const ACTION_DIM: usize = 4;

/// Network-space action, every component in [-1, 1]:
/// `[thrust, pitch, roll, yaw]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action(pub [f32; ACTION_DIM]);

impl Action {
    pub fn new(values: [f32; ACTION_DIM]) -> Self {
        Self(values.map(|value| bounded(value, -1.0, 1.0)))
    }

    pub fn from_slice(values: &[f32]) -> Self {
        let mut out = [0.0; ACTION_DIM];
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = *value;
        }
        Self::new(out)
    }

    /// Uniform sample over [-1, 1]^4.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self([(); ACTION_DIM].map(|_| rng.gen_range(-1.0..=1.0)))
    }

    pub fn values(&self) -> &[f32; ACTION_DIM] {
        &self.0
    }

    pub fn to_command(&self) -> ControlCommand {
        ControlCommand::from_action(self)
    }
}

/// Simulator-space command: thrust in [0, 1], attitude rates in [-1, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlCommand {
    pub thrust: f32,
    pub pitch: f32,
    pub roll: f32,
    pub yaw: f32,
}

impl ControlCommand {
    /// All controls released; sent before a reset.
    pub const STOP: ControlCommand = ControlCommand {
        thrust: 0.0,
        pitch: 0.0,
        roll: 0.0,
        yaw: 0.0,
    };

    pub fn from_action(action: &Action) -> Self {
        let [thrust, pitch, roll, yaw] = action.0;
        Self {
            thrust: bounded((thrust + 1.0) * 0.5, 0.0, 1.0),
            pitch: bounded(pitch, -1.0, 1.0),
            roll: bounded(roll, -1.0, 1.0),
            yaw: bounded(yaw, -1.0, 1.0),
        }
    }

    pub fn new(thrust: f32, pitch: f32, roll: f32, yaw: f32) -> Self {
        Self {
            thrust: bounded(thrust, 0.0, 1.0),
            pitch: bounded(pitch, -1.0, 1.0),
            roll: bounded(roll, -1.0, 1.0),
            yaw: bounded(yaw, -1.0, 1.0),
        }
    }
}
