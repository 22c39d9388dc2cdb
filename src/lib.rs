//! Online reinforcement learning for landing a simulated drone, driven over a
//! WebSocket session with the simulator.

pub mod action;
pub mod codec;
pub mod config;
pub mod error;
pub mod maneuver;
pub mod message;
pub mod ml;
pub mod orchestrator;
pub mod relay;
pub mod state;
pub mod telemetry;
pub mod transport;
pub mod visualize;

pub use crate::action::{ACTION_DIM, Action, ControlCommand};
pub use crate::codec::TelemetryCodec;
pub use crate::config::{
    AgentConfig, CodecConfig, EpisodeConfig, RewardWeights, TrainingConfig, TransportConfig,
};
pub use crate::error::{
    AgentError, ConfigError, ConnectionError, EpisodeAbort, PersistenceError, ProtocolError,
};
pub use crate::message::{Inbound, Outbound, Telemetry, Vec3};
pub use crate::ml::{DroneAgent, FeatureLayout, ReplayBuffer, Transition, ValueNetwork};
pub use crate::orchestrator::{Mode, Orchestrator};
pub use crate::relay::SessionRegistry;
pub use crate::state::{EpisodeRecord, TerminationReason, TrainingState, TrainingSummary};
pub use crate::telemetry::{TelemetryReader, TelemetryWriter};
pub use crate::transport::{Connector, SharedSession, TransportSession, WsConnector};
pub use crate::visualize::{describe_summary, plot_rewards, write_rewards_csv};
