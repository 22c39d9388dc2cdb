use std::time::Duration;

use thiserror::Error;

/// Failures while opening or re-establishing the simulator channel.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("channel is closed")]
    Closed,
    #[error("write failed: {0}")]
    Write(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("gave up after {attempts} reconnection attempts")]
    Exhausted { attempts: u32 },
}

/// Inbound frames that cannot be interpreted.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("frame has no `type` field")]
    MissingType,
}

/// Failures inside the learning agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("tensor conversion failed: {0}")]
    Tensor(String),
    #[error("expected {expected} features, got {found}")]
    FeatureWidth { expected: usize, found: usize },
}

/// Checkpoint save or load failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("checkpoint io: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("checkpoint decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("weight record: {0}")]
    Record(String),
    #[error("checkpoint shape {found} does not match agent shape {expected}")]
    Incompatible { expected: String, found: String },
}

/// An episode that had to be discarded.
#[derive(Debug, Error)]
pub enum EpisodeAbort {
    #[error("agent failure: {0}")]
    Agent(#[from] AgentError),
    #[error("reset task failed: {0}")]
    Reset(String),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
