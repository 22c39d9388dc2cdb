//! JSON frames exchanged with the simulator. Every frame carries a `type`
//! discriminator and a millisecond `timestamp`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::ControlCommand;
use crate::error::ProtocolError;

/// Milliseconds since the unix epoch.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Distance in the ground plane (x/z), ignoring altitude.
    pub fn horizontal_distance(self, other: Vec3) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }
}

/// One vehicle state report. Rotation is in degrees (x = pitch, y = yaw,
/// z = roll); absent sections decode as zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Telemetry {
    pub position: Vec3,
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controls: Option<ControlCommand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_position: Option<Vec3>,
}

impl Telemetry {
    pub fn pitch(&self) -> f32 {
        self.rotation.x
    }

    pub fn yaw(&self) -> f32 {
        self.rotation.y
    }

    pub fn roll(&self) -> f32 {
        self.rotation.z
    }

    pub fn altitude(&self) -> f32 {
        self.position.y
    }
}

/// Frames sent to the simulator.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Config {
        #[serde(rename = "externalControl")]
        external_control: bool,
        timestamp: u64,
    },
    Reset {
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        force: bool,
        timestamp: u64,
    },
    Control {
        #[serde(flatten)]
        command: ControlCommand,
        timestamp: u64,
    },
    Ping {
        timestamp: u64,
    },
}

impl Outbound {
    pub fn config() -> Self {
        Self::external_control(true)
    }

    /// Hands control to (or takes it back from) the simulator's own pilot.
    pub fn external_control(enabled: bool) -> Self {
        Outbound::Config {
            external_control: enabled,
            timestamp: timestamp_ms(),
        }
    }

    pub fn reset(force: bool) -> Self {
        Outbound::Reset {
            force,
            timestamp: timestamp_ms(),
        }
    }

    pub fn control(command: ControlCommand) -> Self {
        Outbound::Control {
            command,
            timestamp: timestamp_ms(),
        }
    }

    pub fn ping() -> Self {
        Outbound::Ping {
            timestamp: timestamp_ms(),
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Outbound::Control { .. })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames received from the simulator.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    State(Telemetry),
    ConfigAck {
        #[serde(default)]
        settings: Value,
    },
    ResetAck {
        #[serde(default)]
        timestamp: f64,
    },
    Pong {
        #[serde(default)]
        timestamp: f64,
    },
}

impl Inbound {
    pub const TYPES: [&'static str; 4] = ["state", "config_ack", "reset_ack", "pong"];

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;
        if !Self::TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_owned()));
        }
        Ok(serde_json::from_value(value)?)
    }
}
