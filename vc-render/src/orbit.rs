use bevy::prelude::*;
use vc_utils::{CameraConfig, OrbitConfig};

/// Spherical camera state around a target. `polar` is measured from +Y.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct OrbitState {
    pub target: Vec3,
    pub radius: f32,
    pub azimuth: f32,
    pub polar: f32,
}

impl OrbitState {
    pub fn from_pose(position: Vec3, target: Vec3) -> Self {
        let offset = position - target;
        let radius = offset.length().max(1e-4);
        Self {
            target,
            radius,
            azimuth: offset.x.atan2(offset.z),
            polar: (offset.y / radius).clamp(-1.0, 1.0).acos(),
        }
    }

    /// Starting pose from configuration, already inside the orbit limits.
    pub fn from_config(camera: &CameraConfig, orbit: &OrbitConfig) -> Self {
        let mut state = Self::from_pose(
            Vec3::from_array(camera.position),
            Vec3::from_array(camera.target),
        );
        state.clamp(orbit);
        state
    }

    pub fn clamp(&mut self, config: &OrbitConfig) {
        self.radius = self.radius.clamp(config.min_distance, config.max_distance);
        self.polar = self.polar.clamp(
            config.min_polar_deg.to_radians(),
            config.max_polar_deg.to_radians(),
        );
    }

    /// Drag in logical pixels.
    pub fn rotate(&mut self, drag: Vec2, config: &OrbitConfig) {
        if !config.enabled || !config.enable_rotate {
            return;
        }
        self.azimuth -= drag.x * config.rotate_speed;
        self.polar -= drag.y * config.rotate_speed;
        self.clamp(config);
    }

    /// Positive `scroll` zooms in.
    pub fn zoom(&mut self, scroll: f32, config: &OrbitConfig) {
        if !config.enabled || !config.enable_zoom || scroll == 0.0 {
            return;
        }
        self.radius *= (1.0 - config.zoom_speed).powf(scroll);
        self.clamp(config);
    }

    pub fn position(&self) -> Vec3 {
        let (sin_p, cos_p) = self.polar.sin_cos();
        let (sin_a, cos_a) = self.azimuth.sin_cos();
        self.target + Vec3::new(sin_p * sin_a, cos_p, sin_p * cos_a) * self.radius
    }

    pub fn transform(&self) -> Transform {
        Transform::from_translation(self.position()).looking_at(self.target, Vec3::Y)
    }
}
