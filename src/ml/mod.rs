pub mod agent;
pub mod encoding;
pub mod network;
pub mod replay;

pub use agent::{CheckpointMetadata, DroneAgent};
pub use encoding::{FeatureLayout, KINEMATIC_FEATURES, StateEncoder, TARGET_RELATIVE_FEATURES};
pub use network::{DEFAULT_HIDDEN, ValueNetwork};
pub use replay::{ReplayBuffer, Transition};
