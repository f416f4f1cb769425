use std::path::{Path, PathBuf};

use bevy::ecs::event::Event;
use bevy::ecs::resource::Resource;

pub mod asset;
pub mod config;
pub mod protocol;

pub use asset::{AssetDescriptor, AssetKind};
pub use config::{
    CameraConfig, CompanionConfig, ConfigError, OrbitConfig, PointCloudConfig, SkyConfig,
    SkyStop,
};
pub use protocol::{FromFetchMessage, ResourceSpec, ToFetchMessage};

pub const VC_ASSETS_ROOT_ENV: &str = "VC_ASSETS_ROOT";

/// Name under which the humanoid model is registered with the preloader.
pub const HUMANOID_ASSET: &str = "humanoid";
pub const ANIMATION_ASSET: &str = "animation";
pub const POINT_CLOUD_ASSET: &str = "point_cloud";

pub fn companion_assets_root() -> PathBuf {
    if let Ok(explicit) = std::env::var(VC_ASSETS_ROOT_ENV) {
        let path = PathBuf::from(explicit);
        if path.exists() {
            return path;
        }
    }

    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        let sibling_assets = exe_dir.join("assets");
        if sibling_assets.exists() {
            return sibling_assets;
        }
    }

    let repo_assets = Path::new(env!("CARGO_MANIFEST_DIR")).join("../vc-client/assets");
    if repo_assets.exists() {
        return repo_assets;
    }

    PathBuf::from("assets")
}

/// Host-facing pause state. `hidden` follows window occlusion, `paused`
/// follows explicit host commands; rendering stops while either is set.
#[derive(Resource, Debug, Default, Clone, Copy)]
pub struct HostState {
    pub hidden: bool,
    pub paused: bool,
    pub debug_open: bool,
}

impl HostState {
    pub fn is_suspended(&self) -> bool {
        self.hidden || self.paused
    }
}

/// Per-frame clock published by the compositor. `delta` already excludes
/// time spent suspended; `running` is false on skipped frames.
#[derive(Resource, Debug, Default, Clone, Copy)]
pub struct FrameTick {
    pub delta: f32,
    pub running: bool,
    pub frame: u64,
}

/// Commands the embedding host can send to the renderer.
#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Pause,
    Resume,
    ForceBackgroundRepaint,
}
