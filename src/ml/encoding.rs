use burn::tensor::{Tensor, TensorData, backend::Backend};
use serde::{Deserialize, Serialize};

use crate::message::{Telemetry, Vec3};

pub const POSITION_SCALE: f32 = 50.0;
pub const ROTATION_SCALE: f32 = 180.0;
pub const VELOCITY_SCALE: f32 = 10.0;
pub const ANGULAR_SCALE: f32 = 180.0;
pub const TARGET_SCALE: f32 = 100.0;

pub const KINEMATIC_FEATURES: usize = 12;
pub const TARGET_RELATIVE_FEATURES: usize = 15;

/// Which observation vector the encoder produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureLayout {
    /// Position, rotation, velocity and angular velocity.
    Kinematic,
    /// Position, rotation, velocity, offset to target, distance terms and a
    /// near-ground flag.
    #[default]
    TargetRelative,
}

impl FeatureLayout {
    pub const fn width(self) -> usize {
        match self {
            FeatureLayout::Kinematic => KINEMATIC_FEATURES,
            FeatureLayout::TargetRelative => TARGET_RELATIVE_FEATURES,
        }
    }
}

/// Clamps into `[lo, hi]`; NaN maps to zero.
#[inline]
pub fn bounded(value: f32, lo: f32, hi: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(lo, hi)
    }
}

#[inline]
fn unit(value: f32, scale: f32) -> f32 {
    bounded(value / scale, -1.0, 1.0)
}

#[derive(Clone, Copy, Debug)]
pub struct StateEncoder {
    pub layout: FeatureLayout,
    pub min_altitude: f32,
}

impl StateEncoder {
    pub fn new(layout: FeatureLayout, min_altitude: f32) -> Self {
        Self {
            layout,
            min_altitude,
        }
    }

    pub fn width(&self) -> usize {
        self.layout.width()
    }

    pub fn encode(&self, telemetry: &Telemetry, target: Vec3) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.width());
        let Telemetry {
            position,
            rotation,
            velocity,
            angular_velocity,
            ..
        } = telemetry;

        out.extend([position.x, position.y, position.z].map(|v| unit(v, POSITION_SCALE)));
        out.extend([rotation.x, rotation.y, rotation.z].map(|v| unit(v, ROTATION_SCALE)));
        out.extend([velocity.x, velocity.y, velocity.z].map(|v| unit(v, VELOCITY_SCALE)));

        match self.layout {
            FeatureLayout::Kinematic => {
                out.extend(
                    [angular_velocity.x, angular_velocity.y, angular_velocity.z]
                        .map(|v| unit(v, ANGULAR_SCALE)),
                );
            }
            FeatureLayout::TargetRelative => {
                let offset = position.sub(target);
                out.extend([offset.x, offset.y, offset.z].map(|v| unit(v, TARGET_SCALE)));
                let distance = bounded(offset.length() / TARGET_SCALE, 0.0, 1.0);
                out.push(distance);
                out.push(distance * 0.5);
                out.push(if position.y < self.min_altitude { 1.0 } else { 0.0 });
            }
        }
        out
    }

    /// Stacks equally sized feature rows into a `[rows, width]` tensor.
    pub fn batch_tensor<B: Backend>(rows: &[&[f32]], width: usize) -> Tensor<B, 2> {
        let mut data = Vec::with_capacity(rows.len() * width);
        for row in rows {
            data.extend_from_slice(row);
        }
        Tensor::<B, 2>::from_data(
            TensorData::new(data, [rows.len(), width]),
            &B::Device::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use proptest::prelude::*;

    fn telemetry(position: Vec3, rotation: Vec3, velocity: Vec3) -> Telemetry {
        Telemetry {
            position,
            rotation,
            velocity,
            angular_velocity: Vec3::new(90.0, -360.0, 0.0),
            ..Telemetry::default()
        }
    }

    #[test]
    fn target_relative_layout_matches_reference_values() {
        let encoder = StateEncoder::new(FeatureLayout::TargetRelative, 0.5);
        let state = telemetry(
            Vec3::new(-30.0, 1.0, -30.0),
            Vec3::new(90.0, 0.0, -45.0),
            Vec3::new(5.0, -20.0, 0.0),
        );
        let features = encoder.encode(&state, Vec3::new(30.0, 0.0, 30.0));
        assert_eq!(features.len(), TARGET_RELATIVE_FEATURES);
        assert!((features[0] + 0.6).abs() < 1e-6);
        assert!((features[1] - 0.02).abs() < 1e-6);
        assert!((features[3] - 0.5).abs() < 1e-6);
        assert!((features[5] + 0.25).abs() < 1e-6);
        assert!((features[6] - 0.5).abs() < 1e-6);
        assert_eq!(features[7], -1.0);
        assert!((features[9] + 0.6).abs() < 1e-6);
        let expected_distance = (60.0f32 * 60.0 * 2.0 + 1.0).sqrt() / 100.0;
        assert!((features[12] - expected_distance).abs() < 1e-5);
        assert!((features[13] - expected_distance * 0.5).abs() < 1e-5);
        assert_eq!(features[14], 0.0);
    }

    #[test]
    fn near_ground_flag_uses_min_altitude() {
        let encoder = StateEncoder::new(FeatureLayout::TargetRelative, 0.5);
        let low = telemetry(Vec3::new(0.0, 0.3, 0.0), Vec3::ZERO, Vec3::ZERO);
        assert_eq!(encoder.encode(&low, Vec3::ZERO)[14], 1.0);
    }

    #[test]
    fn kinematic_layout_appends_angular_velocity() {
        let encoder = StateEncoder::new(FeatureLayout::Kinematic, 0.5);
        let state = telemetry(Vec3::ZERO, Vec3::ZERO, Vec3::ZERO);
        let features = encoder.encode(&state, Vec3::ZERO);
        assert_eq!(features.len(), KINEMATIC_FEATURES);
        assert_eq!(&features[9..], &[0.5, -1.0, 0.0]);
    }

    #[test]
    fn batch_tensor_has_row_major_shape() {
        let rows: [&[f32]; 2] = [&[0.0, 1.0, 2.0], &[3.0, 4.0, 5.0]];
        let tensor = StateEncoder::batch_tensor::<NdArray<f32>>(&rows, 3);
        assert_eq!(tensor.shape().dims, [2, 3]);
    }

    fn any_component() -> impl Strategy<Value = f32> {
        prop_oneof![
            -1.0e9f32..1.0e9f32,
            Just(f32::NAN),
            Just(f32::INFINITY),
            Just(f32::NEG_INFINITY),
        ]
    }

    fn any_vec3() -> impl Strategy<Value = Vec3> {
        (any_component(), any_component(), any_component())
            .prop_map(|(x, y, z)| Vec3::new(x, y, z))
    }

    proptest! {
        #[test]
        fn features_stay_in_declared_ranges(
            position in any_vec3(),
            rotation in any_vec3(),
            velocity in any_vec3(),
            angular in any_vec3(),
            kinematic in any::<bool>(),
        ) {
            let layout = if kinematic {
                FeatureLayout::Kinematic
            } else {
                FeatureLayout::TargetRelative
            };
            let encoder = StateEncoder::new(layout, 0.5);
            let state = Telemetry {
                position,
                rotation,
                velocity,
                angular_velocity: angular,
                ..Telemetry::default()
            };
            let features = encoder.encode(&state, Vec3::new(30.0, 0.0, 30.0));
            prop_assert_eq!(features.len(), layout.width());
            for (index, value) in features.iter().enumerate() {
                prop_assert!(value.is_finite(), "feature {} is {}", index, value);
                prop_assert!((-1.0..=1.0).contains(value), "feature {} is {}", index, value);
            }
            if layout == FeatureLayout::TargetRelative {
                for value in &features[12..] {
                    prop_assert!((0.0..=1.0).contains(value));
                }
            }
        }
    }
}
