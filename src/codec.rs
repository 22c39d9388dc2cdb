use tracing::debug;

use crate::config::CodecConfig;
use crate::message::{Telemetry, Vec3};
use crate::ml::encoding::{StateEncoder, bounded};
use crate::state::TerminationReason;

/// Turns raw telemetry into features, shaped rewards and termination
/// decisions. The only state carried across calls is the distance to target
/// observed by the previous reward computation.
#[derive(Clone, Debug)]
pub struct TelemetryCodec {
    config: CodecConfig,
    encoder: StateEncoder,
    prev_distance: Option<f32>,
}

impl TelemetryCodec {
    pub fn new(config: CodecConfig) -> Self {
        let encoder = StateEncoder::new(config.layout, config.min_altitude);
        Self {
            config,
            encoder,
            prev_distance: None,
        }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn feature_width(&self) -> usize {
        self.encoder.width()
    }

    /// Landing target, preferring one reported by the simulator.
    pub fn target_for(&self, telemetry: &Telemetry) -> Vec3 {
        telemetry.target_position.unwrap_or(self.config.target)
    }

    pub fn begin_episode(&mut self) {
        self.prev_distance = None;
    }

    pub fn extract_features(&self, telemetry: &Telemetry) -> Vec<f32> {
        self.encoder.encode(telemetry, self.target_for(telemetry))
    }

    pub fn compute_reward(&mut self, telemetry: &Telemetry) -> f32 {
        let weights = &self.config.reward;
        let target = self.target_for(telemetry);
        let distance = telemetry.position.sub(target).length();
        let horizontal = telemetry.position.horizontal_distance(target);

        let proximity = weights.proximity_scale / (distance + 1.0);
        let progress = match self.prev_distance {
            Some(previous) => (previous - distance) * weights.progress_scale,
            None => 0.0,
        };
        if distance.is_finite() {
            self.prev_distance = Some(distance);
        }
        let landing = if telemetry.altitude() < self.config.min_altitude {
            if horizontal < self.config.target_radius {
                weights.landing_bonus
            } else {
                -weights.landing_penalty
            }
        } else {
            0.0
        };

        let bound = weights.reward_bound;
        let total = bounded(
            weights.time_penalty + proximity + progress + landing,
            -bound,
            bound,
        );
        if total.abs() > 10.0 {
            debug!(total, proximity, progress, landing, "significant reward");
        }
        total
    }

    /// Checks, in order: missing telemetry, excessive tilt, touchdown and the
    /// step limit. Tilt and touchdown are ignored during the first
    /// `grace_steps` steps while the vehicle settles after a reset.
    pub fn is_terminal(
        &self,
        telemetry: Option<&Telemetry>,
        step: usize,
        max_steps: usize,
    ) -> Option<TerminationReason> {
        let Some(telemetry) = telemetry else {
            return Some(TerminationReason::NoTelemetry);
        };
        let grace = self.config.grace_steps;
        if step >= grace {
            let (pitch, roll) = (telemetry.pitch(), telemetry.roll());
            if pitch.abs() > self.config.max_tilt_deg || roll.abs() > self.config.max_tilt_deg {
                return Some(TerminationReason::ExtremeTilt { pitch, roll });
            }
        }
        if step > grace && telemetry.altitude() < self.config.min_altitude {
            let distance = telemetry
                .position
                .horizontal_distance(self.target_for(telemetry));
            return Some(if distance < self.config.target_radius {
                TerminationReason::LandedOnTarget { distance }
            } else {
                TerminationReason::MissedTarget { distance }
            });
        }
        if step >= max_steps {
            return Some(TerminationReason::StepLimit { max_steps });
        }
        None
    }
}
