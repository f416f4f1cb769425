use std::sync::{Arc, Mutex};

use bevy::input::InputSystem;
use bevy::prelude::*;
use bevy_egui::{EguiPlugin, EguiPrimaryContextPass};
use vc_avatar::AvatarSettings;
use vc_net::AssetSource;
use vc_utils::{CompanionConfig, HostState};

use crate::debug_ui;
use crate::decode;
use crate::host::{self, LifecycleEvent, LoadProgress};
use crate::loader::{self, AssetPreloader, LoadCompleted, LoadFailed, LoadProgressed};

pub struct ClientCorePlugin {
    config: Mutex<Option<CompanionConfig>>,
    source: Mutex<Option<Arc<dyn AssetSource>>>,
}

impl ClientCorePlugin {
    pub fn new(config: CompanionConfig, source: Arc<dyn AssetSource>) -> Self {
        Self {
            config: Mutex::new(Some(config)),
            source: Mutex::new(Some(source)),
        }
    }
}

impl Plugin for ClientCorePlugin {
    fn build(&self, app: &mut App) {
        let config = self
            .config
            .lock()
            .expect("CompanionConfig lock poisoned")
            .take()
            .expect("CompanionConfig already consumed");
        let source = self
            .source
            .lock()
            .expect("AssetSource lock poisoned")
            .take()
            .expect("AssetSource already consumed");

        app.insert_resource(AvatarSettings {
            idle_clip: config.idle_clip.clone(),
            auto_blink: config.auto_blink,
        })
        .insert_resource(HostState {
            debug_open: config.debug_overlay,
            ..default()
        })
        .insert_resource(config)
        .insert_resource(AssetPreloader::new(source))
        .insert_resource(LoadProgress::default())
        .add_event::<LoadProgressed>()
        .add_event::<LoadCompleted>()
        .add_event::<LoadFailed>()
        .add_event::<LifecycleEvent>()
        .add_systems(
            Startup,
            (decode::init_decode_stage, loader::start_preload).chain(),
        )
        .add_systems(PreUpdate, host::host_hotkeys.after(InputSystem))
        .add_systems(
            Update,
            (
                loader::poll_preloader,
                loader::install_loaded_assets,
                host::track_lifecycle,
                loader::tag_look_target,
            )
                .chain(),
        )
        .add_systems(Last, loader::cancel_on_exit);
    }
}

pub struct ClientDebugPlugin;

impl Plugin for ClientDebugPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(EguiPlugin::default())
            .add_systems(EguiPrimaryContextPass, debug_ui::debug_overlay);
    }
}
