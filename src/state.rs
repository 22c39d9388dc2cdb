use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of the episode state machine.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum TrainingState {
    #[default]
    Idle,
    Resetting,
    EpisodeRunning,
}

/// Why an episode ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TerminationReason {
    NoTelemetry,
    ExtremeTilt { pitch: f32, roll: f32 },
    LandedOnTarget { distance: f32 },
    MissedTarget { distance: f32 },
    StepLimit { max_steps: usize },
}

impl TerminationReason {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminationReason::LandedOnTarget { .. })
    }

    /// Short machine-friendly label, used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            TerminationReason::NoTelemetry => "no_telemetry",
            TerminationReason::ExtremeTilt { .. } => "extreme_tilt",
            TerminationReason::LandedOnTarget { .. } => "landed_on_target",
            TerminationReason::MissedTarget { .. } => "missed_target",
            TerminationReason::StepLimit { .. } => "step_limit",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::NoTelemetry => write!(f, "no telemetry available"),
            TerminationReason::ExtremeTilt { pitch, roll } => {
                write!(f, "extreme tilt (pitch {pitch:.1}°, roll {roll:.1}°)")
            }
            TerminationReason::LandedOnTarget { distance } => {
                write!(f, "landed on target ({distance:.2} m from centre)")
            }
            TerminationReason::MissedTarget { distance } => {
                write!(f, "missed target ({distance:.2} m from centre)")
            }
            TerminationReason::StepLimit { max_steps } => {
                write!(f, "step limit reached ({max_steps})")
            }
        }
    }
}

/// One finished, counted episode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub episode: usize,
    pub total_reward: f32,
    pub steps: usize,
    pub duration_secs: f32,
    pub termination: TerminationReason,
    pub epsilon: f32,
}

/// Aggregate over a run, consumed by sweep drivers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub episodes: usize,
    pub best_reward: Option<f32>,
    pub average_reward: Option<f32>,
    pub landings: usize,
}

impl TrainingSummary {
    pub fn from_records(records: &[EpisodeRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let total: f32 = records.iter().map(|record| record.total_reward).sum();
        let best = records
            .iter()
            .map(|record| record.total_reward)
            .fold(f32::NEG_INFINITY, f32::max);
        Self {
            episodes: records.len(),
            best_reward: Some(best),
            average_reward: Some(total / records.len() as f32),
            landings: records
                .iter()
                .filter(|record| record.termination.is_success())
                .count(),
        }
    }
}
