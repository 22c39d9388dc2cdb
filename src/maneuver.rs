use std::time::Duration;

use tokio::time::sleep;
use tracing::info;

use crate::action::ControlCommand;
use crate::message::Outbound;
use crate::transport::{Connector, SharedSession};

/// Commands per second issued while flying a scripted maneuver.
pub const COMMAND_RATE_HZ: u32 = 10;
const HOVER_THRUST: f32 = 0.5;

/// Open-loop flight primitive used to exercise the simulator without a model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Maneuver {
    Takeoff { secs: f32 },
    Hover { secs: f32 },
    /// Negative pitch flies forward, negative roll flies left.
    Translate { pitch: f32, roll: f32, secs: f32 },
    /// Negative yaw turns counter-clockwise.
    Rotate { yaw: f32, secs: f32 },
    Land { secs: f32 },
}

impl Maneuver {
    pub fn label(&self) -> &'static str {
        match self {
            Maneuver::Takeoff { .. } => "takeoff",
            Maneuver::Hover { .. } => "hover",
            Maneuver::Translate { .. } => "translate",
            Maneuver::Rotate { .. } => "rotate",
            Maneuver::Land { .. } => "land",
        }
    }

    fn secs(&self) -> f32 {
        match *self {
            Maneuver::Takeoff { secs }
            | Maneuver::Hover { secs }
            | Maneuver::Translate { secs, .. }
            | Maneuver::Rotate { secs, .. }
            | Maneuver::Land { secs } => secs,
        }
    }

    /// Command schedule at [`COMMAND_RATE_HZ`].
    pub fn commands(&self) -> Vec<ControlCommand> {
        let ticks = (self.secs().max(0.0) * COMMAND_RATE_HZ as f32).round() as usize;
        let mut out: Vec<ControlCommand> = (0..ticks)
            .map(|tick| {
                let progress = tick as f32 / ticks as f32;
                let (thrust, pitch, roll, yaw) = match *self {
                    Maneuver::Takeoff { .. } => (0.4 + progress * 0.2, 0.0, 0.0, 0.0),
                    Maneuver::Hover { .. } => (HOVER_THRUST, 0.0, 0.0, 0.0),
                    Maneuver::Translate { pitch, roll, .. } => (HOVER_THRUST, pitch, roll, 0.0),
                    Maneuver::Rotate { yaw, .. } => (HOVER_THRUST, 0.0, 0.0, yaw),
                    Maneuver::Land { .. } => (0.5 - progress * 0.4, 0.0, 0.0, 0.0),
                };
                ControlCommand::new(thrust, pitch, roll, yaw)
            })
            .collect();
        if matches!(self, Maneuver::Land { .. }) {
            out.push(ControlCommand::STOP);
        }
        out
    }
}

/// Takeoff, probing moves in every direction, a square and a landing.
pub fn smoke_sequence(intensity: f32) -> Vec<Maneuver> {
    let square = intensity * 0.8;
    let mut plan = vec![
        Maneuver::Takeoff { secs: 3.0 },
        Maneuver::Hover { secs: 2.0 },
    ];
    let moves = [
        (-intensity, 0.0),
        (intensity, 0.0),
        (0.0, -intensity),
        (0.0, intensity),
    ];
    for (pitch, roll) in moves {
        plan.push(Maneuver::Translate { pitch, roll, secs: 1.5 });
        plan.push(Maneuver::Hover { secs: 1.0 });
    }
    for yaw in [-intensity * 0.7, intensity * 0.7] {
        plan.push(Maneuver::Rotate { yaw, secs: 2.0 });
        plan.push(Maneuver::Hover { secs: 1.0 });
    }
    for (pitch, roll) in [(-square, 0.0), (0.0, square), (square, 0.0), (0.0, -square)] {
        plan.push(Maneuver::Translate { pitch, roll, secs: 1.5 });
        plan.push(Maneuver::Hover { secs: 1.0 });
    }
    plan.push(Maneuver::Land { secs: 3.0 });
    plan
}

/// Flies `plan` through the session, returning how many commands were written.
pub async fn fly<C: Connector>(session: &SharedSession<C>, plan: &[Maneuver]) -> usize {
    let tick = Duration::from_secs(1) / COMMAND_RATE_HZ;
    let mut sent = 0;
    for maneuver in plan {
        info!(maneuver = maneuver.label(), "flying");
        for command in maneuver.commands() {
            if session.lock().await.send(&Outbound::control(command)).await {
                sent += 1;
            }
            sleep(tick).await;
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takeoff_ramps_thrust_up() {
        let commands = Maneuver::Takeoff { secs: 3.0 }.commands();
        assert_eq!(commands.len(), 30);
        assert!((commands[0].thrust - 0.4).abs() < 1e-6);
        assert!(commands.windows(2).all(|pair| pair[1].thrust > pair[0].thrust));
        assert!(commands.iter().all(|c| c.thrust < 0.6));
    }

    #[test]
    fn landing_ends_with_controls_released() {
        let commands = Maneuver::Land { secs: 1.0 }.commands();
        assert_eq!(commands.len(), 11);
        assert_eq!(commands.last(), Some(&ControlCommand::STOP));
        assert!(commands[..10].windows(2).all(|pair| pair[1].thrust < pair[0].thrust));
    }

    #[test]
    fn translate_holds_hover_thrust() {
        let commands = Maneuver::Translate { pitch: -0.3, roll: 0.0, secs: 0.5 }.commands();
        assert_eq!(commands.len(), 5);
        assert!(commands.iter().all(|c| c.thrust == 0.5 && c.pitch == -0.3));
    }

    #[test]
    fn smoke_sequence_starts_with_takeoff_and_ends_with_landing() {
        let plan = smoke_sequence(0.3);
        assert_eq!(plan.first().map(Maneuver::label), Some("takeoff"));
        assert_eq!(plan.last().map(Maneuver::label), Some("land"));
        assert!(plan.iter().any(|m| matches!(m, Maneuver::Rotate { .. })));
    }
}
