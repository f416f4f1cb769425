//! `.splat` point clouds and the progressive-reveal viewer.

use bevy::ecs::resource::Resource;
use bevy::math::Vec3;
use thiserror::Error;
use vc_utils::PointCloudConfig;

/// position f32x3, scale f32x3, rgba u8x4, rotation u8x4
pub const SPLAT_RECORD_SIZE: usize = 32;
/// Share of the cloud revealed per frame.
pub const REVEAL_FRACTION_PER_FRAME: f32 = 1.0 / 45.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplatParseError {
    #[error("splat payload of {len} bytes is not a multiple of {SPLAT_RECORD_SIZE}")]
    Truncated { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatPoint {
    pub position: Vec3,
    pub scale: Vec3,
    pub color: [u8; 4],
    pub rotation: [u8; 4],
}

impl SplatPoint {
    pub fn linear_color(&self) -> [f32; 4] {
        self.color.map(|c| c as f32 / 255.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplatTransform {
    pub position: Vec3,
    pub scale: Vec3,
    pub alpha_cutoff: u8,
}

impl Default for SplatTransform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            scale: Vec3::ONE,
            alpha_cutoff: 0,
        }
    }
}

impl From<&PointCloudConfig> for SplatTransform {
    fn from(config: &PointCloudConfig) -> Self {
        Self {
            position: Vec3::from_array(config.position),
            scale: Vec3::from_array(config.scale),
            alpha_cutoff: config.alpha_cutoff,
        }
    }
}

fn f32_le(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn vec3_le(bytes: &[u8], at: usize) -> Vec3 {
    Vec3::new(f32_le(bytes, at), f32_le(bytes, at + 4), f32_le(bytes, at + 8))
}

/// Parses a `.splat` payload. Splats whose alpha is below the cutoff are
/// dropped and the transform is applied to the survivors.
pub fn parse_splat(bytes: &[u8], transform: &SplatTransform) -> Result<Vec<SplatPoint>, SplatParseError> {
    if bytes.len() % SPLAT_RECORD_SIZE != 0 {
        return Err(SplatParseError::Truncated { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(SPLAT_RECORD_SIZE)
        .filter(|record| record[27] >= transform.alpha_cutoff)
        .map(|record| SplatPoint {
            position: vec3_le(record, 0) * transform.scale + transform.position,
            scale: vec3_le(record, 12) * transform.scale,
            color: [record[24], record[25], record[26], record[27]],
            rotation: [record[28], record[29], record[30], record[31]],
        })
        .filter(|point| point.position.is_finite())
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointCloudFormat {
    Splat,
    /// Formats the viewer does not draw.
    Opaque,
}

impl PointCloudFormat {
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.to_ascii_lowercase().ends_with(".splat") {
            Self::Splat
        } else {
            Self::Opaque
        }
    }
}

/// Reveals a parsed cloud over several frames, then raises `ready`.
#[derive(Resource, Debug, Clone, Default)]
pub struct PointCloudViewer {
    points: Vec<SplatPoint>,
    revealed: usize,
    per_frame: usize,
    ready: bool,
}

impl PointCloudViewer {
    pub fn new(points: Vec<SplatPoint>) -> Self {
        let per_frame = ((points.len() as f32 * REVEAL_FRACTION_PER_FRAME).ceil() as usize).max(1);
        let ready = points.is_empty();
        Self {
            points,
            revealed: 0,
            per_frame,
            ready,
        }
    }

    /// Nothing to draw; ready immediately.
    pub fn opaque() -> Self {
        Self::new(Vec::new())
    }

    pub fn points(&self) -> &[SplatPoint] {
        &self.points
    }

    pub fn revealed(&self) -> usize {
        self.revealed
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Advances the reveal by one frame. Returns true when the revealed count
    /// changed.
    pub fn advance(&mut self) -> bool {
        if self.revealed >= self.points.len() {
            self.ready = true;
            return false;
        }
        self.revealed = (self.revealed + self.per_frame).min(self.points.len());
        if self.revealed == self.points.len() {
            self.ready = true;
        }
        true
    }
}
