use std::path::Path;

use bevy::ecs::resource::Resource;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Options recognised when an avatar instance is created.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    pub humanoid_url: String,
    pub animation_url: Option<String>,
    /// Clip started (looping) once the animation asset is decoded. Falls
    /// back to the first clip in the file.
    pub idle_clip: Option<String>,
    pub auto_blink: bool,
    pub point_cloud: PointCloudConfig,
    pub camera: CameraConfig,
    pub orbit: OrbitConfig,
    pub sky: SkyConfig,
    pub debug_overlay: bool,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            humanoid_url: "models/avatar.vrm".into(),
            animation_url: Some("animations/idle.vrma".into()),
            idle_clip: None,
            auto_blink: true,
            point_cloud: PointCloudConfig::default(),
            camera: CameraConfig::default(),
            orbit: OrbitConfig::default(),
            sky: SkyConfig::default(),
            debug_overlay: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointCloudConfig {
    pub url: Option<String>,
    pub position: [f32; 3],
    pub scale: [f32; 3],
    /// Splats with alpha (0-255) below this value are dropped at parse time.
    pub alpha_cutoff: u8,
}

impl Default for PointCloudConfig {
    fn default() -> Self {
        Self {
            url: Some("scenes/room.splat".into()),
            position: [0.0, 0.0, 0.0],
            scale: [1.0, 1.0, 1.0],
            alpha_cutoff: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub fov_deg: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 1.4, 1.6],
            target: [0.0, 1.2, 0.0],
            fov_deg: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitConfig {
    pub enabled: bool,
    pub enable_rotate: bool,
    pub enable_zoom: bool,
    pub min_distance: f32,
    pub max_distance: f32,
    /// Polar angle limits measured from +Y, in degrees.
    pub min_polar_deg: f32,
    pub max_polar_deg: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
}

impl Default for OrbitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_rotate: true,
            enable_zoom: true,
            min_distance: 0.6,
            max_distance: 4.0,
            min_polar_deg: 45.0,
            max_polar_deg: 100.0,
            rotate_speed: 0.005,
            zoom_speed: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyStop {
    /// Normalised height on the backdrop, 0 = bottom, 1 = top.
    pub at: f32,
    /// Linear RGB.
    pub color: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkyConfig {
    pub stops: Vec<SkyStop>,
}

impl Default for SkyConfig {
    fn default() -> Self {
        Self {
            stops: vec![
                SkyStop {
                    at: 0.0,
                    color: [0.93, 0.89, 0.85],
                },
                SkyStop {
                    at: 0.55,
                    color: [0.62, 0.76, 0.92],
                },
                SkyStop {
                    at: 1.0,
                    color: [0.25, 0.45, 0.78],
                },
            ],
        }
    }
}

impl CompanionConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.humanoid_url.trim().is_empty() {
            return Err(ConfigError::Invalid("humanoid_url is empty".into()));
        }
        if !(1.0..=179.0).contains(&self.camera.fov_deg) {
            return Err(ConfigError::Invalid(format!(
                "camera.fov_deg {} outside 1..=179",
                self.camera.fov_deg
            )));
        }
        let orbit = &self.orbit;
        if orbit.min_distance <= 0.0 || orbit.min_distance > orbit.max_distance {
            return Err(ConfigError::Invalid(format!(
                "orbit distance range {}..{} is empty",
                orbit.min_distance, orbit.max_distance
            )));
        }
        if orbit.min_polar_deg < 0.0
            || orbit.max_polar_deg > 180.0
            || orbit.min_polar_deg > orbit.max_polar_deg
        {
            return Err(ConfigError::Invalid(format!(
                "orbit polar range {}..{} is invalid",
                orbit.min_polar_deg, orbit.max_polar_deg
            )));
        }
        if self.sky.stops.is_empty() {
            return Err(ConfigError::Invalid("sky.stops is empty".into()));
        }
        if self.sky.stops.windows(2).any(|w| w[0].at > w[1].at) {
            return Err(ConfigError::Invalid("sky.stops must be sorted by `at`".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_defaults() {
        let config = CompanionConfig::from_toml_str("").unwrap();
        assert_eq!(config, CompanionConfig::default());
    }

    #[test]
    fn partial_override() {
        let config = CompanionConfig::from_toml_str(
            r#"
            humanoid_url = "https://example.com/alice.vrm"
            debug_overlay = true

            [point_cloud]
            url = "scenes/park.splat"
            alpha_cutoff = 20

            [orbit]
            enable_zoom = false
            "#,
        )
        .unwrap();
        assert_eq!(config.humanoid_url, "https://example.com/alice.vrm");
        assert!(config.debug_overlay);
        assert_eq!(config.point_cloud.url.as_deref(), Some("scenes/park.splat"));
        assert_eq!(config.point_cloud.alpha_cutoff, 20);
        assert_eq!(config.point_cloud.scale, [1.0, 1.0, 1.0]);
        assert!(!config.orbit.enable_zoom);
        assert!(config.orbit.enable_rotate);
    }

    #[test]
    fn rejects_inverted_ranges() {
        let err = CompanionConfig::from_toml_str(
            r#"
            [orbit]
            min_distance = 5.0
            max_distance = 1.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CompanionConfig::from_toml_str(
            r#"
            [[sky.stops]]
            at = 0.8
            color = [1.0, 1.0, 1.0]
            [[sky.stops]]
            at = 0.2
            color = [0.0, 0.0, 0.0]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("companion.toml");
        std::fs::write(&path, "[camera]\nfov_deg = 55.0\n").unwrap();
        let config = CompanionConfig::load(&path).unwrap();
        assert_eq!(config.camera.fov_deg, 55.0);

        let missing = CompanionConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
