//! Tracked-device input.

use glam::{Quat, Vec2, Vec3};

/// World pose of one tracked device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevicePose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl DevicePose {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }
}

/// Everything sampled from the devices for one frame. A device with no
/// tracking this frame is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackedInput {
    pub headset: Option<DevicePose>,
    pub left_controller: Option<DevicePose>,
    pub right_controller: Option<DevicePose>,
    /// Locomotion thumbstick, each axis in `[-1, 1]`.
    pub left_stick: Vec2,
}

pub trait InputSource {
    /// Samples the devices at `elapsed` seconds since the session started.
    fn sample(&mut self, elapsed: f64) -> TrackedInput;
}

const HEAD_HEIGHT: f32 = 1.6;

/// Synthetic input for headless sessions: an idle head sway and slowly
/// circling hands. Optionally walks forward.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    walk: Vec2,
}

impl ScriptedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn walking(stick: Vec2) -> Self {
        Self { walk: stick }
    }
}

impl InputSource for ScriptedInput {
    fn sample(&mut self, elapsed: f64) -> TrackedInput {
        let t = elapsed as f32;
        let yaw = 0.3 * (0.4 * t).sin();
        let pitch = 0.1 * (0.7 * t).sin();
        let headset = DevicePose::new(
            Vec3::new(0.05 * (0.5 * t).sin(), HEAD_HEIGHT, 0.0),
            Quat::from_rotation_y(yaw) * Quat::from_rotation_x(pitch),
        );

        let hand = |side: f32, phase: f32| {
            let angle = 1.2 * t + phase;
            DevicePose::new(
                Vec3::new(
                    side * (0.3 + 0.05 * angle.cos()),
                    1.1 + 0.1 * angle.sin(),
                    -0.3,
                ),
                Quat::from_rotation_z(side * 0.2 * angle.sin()),
            )
        };

        TrackedInput {
            headset: Some(headset),
            // tracking space faces -z, so the left hand sits at -x
            left_controller: Some(hand(-1.0, 0.0)),
            right_controller: Some(hand(1.0, std::f32::consts::PI)),
            left_stick: self.walk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_input_tracks_all_devices() {
        let mut input = ScriptedInput::new();
        for step in 0..20 {
            let frame = input.sample(step as f64 * 0.25);
            let head = frame.headset.unwrap();
            assert!((head.position.y - HEAD_HEIGHT).abs() < 1e-6);
            assert!(head.orientation.is_normalized());
            assert!(frame.left_controller.unwrap().position.x < 0.0);
            assert!(frame.right_controller.unwrap().position.x > 0.0);
            assert_eq!(frame.left_stick, Vec2::ZERO);
        }
    }
}
