//! Frame scheduling for the split environment / humanoid passes.
//!
//! The environment pass renders into an off-screen image and is only redrawn
//! when it is stale. The humanoid pass draws every unsuspended frame on top
//! of that image.

use bevy::ecs::resource::Resource;
use bevy::math::{Quat, UVec2, Vec3};
use tracing::debug;

pub const POSITION_THRESHOLD: f32 = 1e-3;
pub const ROTATION_THRESHOLD: f32 = 1e-3;
/// Forced environment repaints after the point cloud reports ready.
pub const SETTLE_BURST_FRAMES: u32 = 60;
const FALLBACK_DELTA: f32 = 1.0 / 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl CameraPose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }
}

/// Caches the pose the environment image was last rendered from.
#[derive(Debug, Clone)]
pub struct CameraTracker {
    snapshot: Option<CameraPose>,
    position_threshold: f32,
    rotation_threshold: f32,
}

impl Default for CameraTracker {
    fn default() -> Self {
        Self::new(POSITION_THRESHOLD, ROTATION_THRESHOLD)
    }
}

impl CameraTracker {
    pub fn new(position_threshold: f32, rotation_threshold: f32) -> Self {
        Self {
            snapshot: None,
            position_threshold,
            rotation_threshold,
        }
    }

    pub fn snapshot(&self) -> Option<CameraPose> {
        self.snapshot
    }

    /// Returns true when `pose` moved past either threshold since the last
    /// snapshot, and takes a new snapshot in that case.
    pub fn observe(&mut self, pose: CameraPose) -> bool {
        let moved = match self.snapshot {
            None => true,
            Some(prev) => {
                prev.position.distance(pose.position) > self.position_threshold
                    || prev.rotation.angle_between(pose.rotation) > self.rotation_threshold
            }
        };
        if moved {
            self.snapshot = Some(pose);
        }
        moved
    }
}

/// Wall-clock delta source that can forget its last sample.
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    last: Option<f64>,
    last_delta: Option<f32>,
}

impl FrameClock {
    /// `now` is monotonic seconds. The first sample after construction or
    /// [`discard`](Self::discard) reuses the previous frame cadence.
    pub fn tick(&mut self, now: f64) -> f32 {
        let delta = match self.last {
            Some(last) => (now - last).max(0.0) as f32,
            None => self.last_delta.unwrap_or(FALLBACK_DELTA),
        };
        self.last = Some(now);
        self.last_delta = Some(delta);
        delta
    }

    pub fn discard(&mut self) {
        self.last = None;
    }
}

/// What to render this frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FramePlan {
    pub delta: f32,
    pub render_environment: bool,
    pub render_humanoid: bool,
    /// Set on the first environment render after its content was attached.
    pub first_environment_paint: bool,
}

impl FramePlan {
    pub fn skipped() -> Self {
        Self::default()
    }

    pub fn is_skipped(&self) -> bool {
        !self.render_humanoid
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositorStats {
    pub frames: u64,
    pub environment_repaints: u64,
    pub environment_skipped: u64,
    pub suspended_frames: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSize {
    pub logical: UVec2,
    pub physical: UVec2,
    pub scale_factor: f32,
}

#[derive(Resource, Debug, Clone, Default)]
pub struct Compositor {
    clock: FrameClock,
    camera: CameraTracker,
    needs_environment_repaint: bool,
    settle_frames_remaining: u32,
    point_cloud_ready: bool,
    environment_attached: bool,
    first_paint_done: bool,
    hidden: bool,
    host_paused: bool,
    viewport: Option<ViewportSize>,
    stats: CompositorStats,
}

impl Compositor {
    pub fn stats(&self) -> CompositorStats {
        self.stats
    }

    pub fn settle_frames_remaining(&self) -> u32 {
        self.settle_frames_remaining
    }

    pub fn needs_environment_repaint(&self) -> bool {
        self.needs_environment_repaint
    }

    pub fn camera_snapshot(&self) -> Option<CameraPose> {
        self.camera.snapshot()
    }

    pub fn viewport(&self) -> Option<ViewportSize> {
        self.viewport
    }

    pub fn is_suspended(&self) -> bool {
        self.hidden || self.host_paused
    }

    pub fn has_painted_environment(&self) -> bool {
        self.first_paint_done
    }

    /// Marks the environment scene as populated. The next environment render
    /// counts as its first paint.
    pub fn attach_environment(&mut self) {
        if !self.environment_attached {
            self.environment_attached = true;
            self.needs_environment_repaint = true;
        }
    }

    pub fn force_background_repaint(&mut self) {
        self.needs_environment_repaint = true;
    }

    pub fn pause(&mut self) {
        self.host_paused = true;
    }

    pub fn resume(&mut self) {
        if self.host_paused {
            self.host_paused = false;
            self.clock.discard();
            self.needs_environment_repaint = true;
        }
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        if self.hidden == hidden {
            return;
        }
        self.hidden = hidden;
        if !hidden {
            self.clock.discard();
            self.needs_environment_repaint = true;
        }
        debug!(hidden, "compositor visibility changed");
    }

    /// Returns the device-pixel size both the canvas and the off-screen
    /// target should take.
    pub fn resize(&mut self, logical: UVec2, scale_factor: f32) -> ViewportSize {
        let scale_factor = if scale_factor > 0.0 { scale_factor } else { 1.0 };
        let physical = (logical.as_vec2() * scale_factor).round().as_uvec2().max(UVec2::ONE);
        let size = ViewportSize {
            logical,
            physical,
            scale_factor,
        };
        self.viewport = Some(size);
        self.needs_environment_repaint = true;
        size
    }

    pub fn frame(&mut self, now: f64, camera: CameraPose, point_cloud_ready: bool) -> FramePlan {
        if self.is_suspended() {
            self.stats.suspended_frames += 1;
            return FramePlan::skipped();
        }
        self.stats.frames += 1;
        let delta = self.clock.tick(now);

        if self.camera.observe(camera) {
            self.needs_environment_repaint = true;
        }

        if point_cloud_ready && !self.point_cloud_ready {
            debug!("point cloud ready, starting settle burst");
            self.settle_frames_remaining = SETTLE_BURST_FRAMES;
        }
        self.point_cloud_ready = point_cloud_ready;

        let render_environment = self.needs_environment_repaint || self.settle_frames_remaining > 0;
        self.settle_frames_remaining = self.settle_frames_remaining.saturating_sub(1);
        self.needs_environment_repaint = false;

        let first_environment_paint =
            render_environment && self.environment_attached && !self.first_paint_done;
        if first_environment_paint {
            self.first_paint_done = true;
        }

        if render_environment {
            self.stats.environment_repaints += 1;
        } else {
            self.stats.environment_skipped += 1;
        }

        FramePlan {
            delta,
            render_environment,
            render_humanoid: true,
            first_environment_paint,
        }
    }
}
