use bevy::input::InputSystem;
use bevy::prelude::*;
use vc_utils::{CompanionConfig, FrameTick, HostCommand, HostState};

pub mod compositor;
pub mod orbit;
mod scene;
pub mod sky;
pub mod splat;
pub mod teardown;

pub use compositor::{CameraPose, Compositor, CompositorStats, FramePlan, SETTLE_BURST_FRAMES};
pub use scene::{
    AttachEnvironment, CurrentFramePlan, EnvironmentCamera, HumanoidCamera, PointCloudPayload,
    ENVIRONMENT_LAYER,
};
pub use splat::{PointCloudFormat, PointCloudViewer};
pub use teardown::{ResourceKind, TeardownError, TeardownLedger};

/// Split-scene compositor: environment pass into an off-screen image,
/// humanoid pass onto the window with that image as its backdrop.
pub struct CompositorPlugin;

impl Plugin for CompositorPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<Compositor>()
            .init_resource::<CurrentFramePlan>()
            .init_resource::<TeardownLedger>()
            .init_resource::<FrameTick>()
            .init_resource::<HostState>()
            .init_resource::<CompanionConfig>()
            .add_event::<HostCommand>()
            .add_event::<AttachEnvironment>()
            .add_systems(Startup, scene::setup_compositor)
            .add_systems(
                PreUpdate,
                (
                    scene::handle_host_commands,
                    scene::handle_window_events,
                    scene::orbit_camera,
                    scene::plan_frame,
                )
                    .chain()
                    .after(InputSystem),
            )
            .add_systems(
                Update,
                (scene::attach_environment, scene::reveal_point_cloud).chain(),
            )
            .add_systems(Last, scene::teardown_on_exit);
    }
}
