use bevy::math::{EulerRot, Quat, Vec3};

/// Head gaze towards a world-space target, clamped and smoothed.
#[derive(Debug, Clone)]
pub struct LookAt {
    pub enabled: bool,
    pub yaw_limit: f32,
    pub pitch_limit: f32,
    /// Exponential approach rate, 1/s.
    pub smoothing: f32,
    /// How much of the gaze the head bone takes.
    pub head_weight: f32,
    yaw: f32,
    pitch: f32,
    target_yaw: f32,
    target_pitch: f32,
}

impl Default for LookAt {
    fn default() -> Self {
        Self {
            enabled: true,
            yaw_limit: 40f32.to_radians(),
            pitch_limit: 25f32.to_radians(),
            smoothing: 6.0,
            head_weight: 0.6,
            yaw: 0.0,
            pitch: 0.0,
            target_yaw: 0.0,
            target_pitch: 0.0,
        }
    }
}

impl LookAt {
    /// Sets the gaze target. `body_rotation` is the world rotation the
    /// angles are measured against; the rig faces +Z in that frame.
    pub fn aim(&mut self, head: Vec3, body_rotation: Quat, target: Vec3) {
        let local = body_rotation.inverse() * (target - head);
        let flat = Vec3::new(local.x, 0.0, local.z).length();
        if flat < 1e-6 && local.y.abs() < 1e-6 {
            return;
        }
        self.target_yaw = local.x.atan2(local.z).clamp(-self.yaw_limit, self.yaw_limit);
        self.target_pitch = local.y.atan2(flat).clamp(-self.pitch_limit, self.pitch_limit);
    }

    pub fn clear_target(&mut self) {
        self.target_yaw = 0.0;
        self.target_pitch = 0.0;
    }

    pub fn update(&mut self, delta: f32) {
        let (target_yaw, target_pitch) = if self.enabled {
            (self.target_yaw, self.target_pitch)
        } else {
            (0.0, 0.0)
        };
        let t = 1.0 - (-self.smoothing * delta.max(0.0)).exp();
        self.yaw += (target_yaw - self.yaw) * t;
        self.pitch += (target_pitch - self.pitch) * t;
    }

    pub fn angles(&self) -> (f32, f32) {
        (self.yaw, self.pitch)
    }

    /// Extra local rotation for the head bone.
    pub fn head_rotation(&self) -> Quat {
        Quat::from_euler(
            EulerRot::YXZ,
            self.yaw * self.head_weight,
            -self.pitch * self.head_weight,
            0.0,
        )
    }
}
