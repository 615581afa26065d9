use glam::{Quat, Vec2, Vec3};

pub const DEFAULT_DEADZONE: f32 = 0.1;
/// Metres per second at full stick.
pub const DEFAULT_WALK_SPEED: f32 = 2.0;

/// Thumbstick-driven drift of the tracking space across the ground.
#[derive(Debug, Clone)]
pub struct Locomotion {
    ground_offset: Vec3,
    speed: f32,
    deadzone: f32,
}

impl Default for Locomotion {
    fn default() -> Self {
        Self::new(DEFAULT_WALK_SPEED)
    }
}

impl Locomotion {
    pub fn new(speed: f32) -> Self {
        Self {
            ground_offset: Vec3::ZERO,
            speed,
            deadzone: DEFAULT_DEADZONE,
        }
    }

    /// Accumulated drift. World position is tracking position minus this.
    pub fn ground_offset(&self) -> Vec3 {
        self.ground_offset
    }

    /// Moves along the stick direction as seen from the headset, flattened
    /// onto the ground plane.
    pub fn update(&mut self, stick: Vec2, headset: Quat, dt: f32) {
        if stick.x.abs() <= self.deadzone && stick.y.abs() <= self.deadzone {
            return;
        }
        if !stick.is_finite() || !headset.is_finite() || !dt.is_finite() {
            return;
        }

        let mut direction = headset * Vec3::new(stick.x, 0.0, stick.y);
        direction.y = 0.0;
        let Some(direction) = direction.try_normalize() else {
            return;
        };
        self.ground_offset -= direction * self.speed * dt;
    }
}
