use std::sync::Arc;

use bevy::gltf::Gltf;
use bevy::prelude::*;
use crossbeam::channel::{Receiver, unbounded};
use tracing::{info, warn};
use vc_avatar::rig::ClipInfo;
use vc_avatar::{AnimationController, AvatarBindings, AvatarClipHandles, AvatarRoot, LookTarget};
use vc_net::AssetSource;
use vc_render::{AttachEnvironment, HumanoidCamera, PointCloudFormat, PointCloudPayload};
use vc_utils::{
    ANIMATION_ASSET, AssetDescriptor, AssetKind, CompanionConfig, HUMANOID_ASSET,
    POINT_CLOUD_ASSET,
};

use crate::decode::{DecodedAsset, GltfDecodeStage};
use crate::preloader::{AssetPayload, LoadFailure, LoadStatus, Preloader};

#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgressed(pub u8);

#[derive(Event, Debug, Clone, Copy)]
pub struct LoadCompleted;

#[derive(Event, Debug, Clone)]
pub struct LoadFailed(pub LoadFailure);

enum PreloadSignal {
    Progress(u8),
    Completed,
    Failed(LoadFailure),
}

/// The preloader as a Bevy resource. Observer callbacks are forwarded over
/// a channel and re-emitted as Bevy events by [`poll_preloader`].
#[derive(Resource)]
pub struct AssetPreloader {
    preloader: Preloader,
    signals: Receiver<PreloadSignal>,
}

impl AssetPreloader {
    pub fn new(source: Arc<dyn AssetSource>) -> Self {
        let (tx, signals) = unbounded();
        let mut preloader = Preloader::new(source);

        let sender = tx.clone();
        preloader.on_progress(move |percent| {
            let _ = sender.send(PreloadSignal::Progress(percent));
        });
        let sender = tx.clone();
        preloader.on_completed(move |_| {
            let _ = sender.send(PreloadSignal::Completed);
        });
        preloader.on_error(move |failure| {
            let _ = tx.send(PreloadSignal::Failed(failure.clone()));
        });

        Self { preloader, signals }
    }

    pub fn status(&self) -> LoadStatus {
        self.preloader.status()
    }

    pub fn percent(&self) -> u8 {
        self.preloader.percent()
    }

    pub fn failure(&self) -> Option<&LoadFailure> {
        self.preloader.failure()
    }

    /// `(loaded, known total)` in bytes.
    pub fn bytes(&self) -> (u64, Option<u64>) {
        (
            self.preloader.total_bytes_loaded(),
            self.preloader.total_bytes_known(),
        )
    }
}

/// Assets requested for a configuration, in load order.
pub fn descriptors_from_config(config: &CompanionConfig) -> Vec<AssetDescriptor> {
    let mut descriptors = vec![AssetDescriptor::with_kind(
        HUMANOID_ASSET,
        config.humanoid_url.clone(),
        AssetKind::Humanoid,
    )];
    if let Some(url) = config.animation_url.as_deref().filter(|u| !u.is_empty()) {
        descriptors.push(AssetDescriptor::with_kind(
            ANIMATION_ASSET,
            url,
            AssetKind::Animation,
        ));
    }
    if let Some(url) = config.point_cloud.url.as_deref().filter(|u| !u.is_empty()) {
        descriptors.push(AssetDescriptor::with_kind(
            POINT_CLOUD_ASSET,
            url,
            AssetKind::PointCloud,
        ));
    }
    descriptors
}

pub(crate) fn start_preload(config: Res<CompanionConfig>, mut assets: ResMut<AssetPreloader>) {
    for descriptor in descriptors_from_config(&config) {
        if let Err(err) = assets.preloader.add(descriptor) {
            warn!("asset not registered: {err}");
        }
    }
    if let Err(err) = assets.preloader.load() {
        warn!("preload not started: {err}");
    }
}

pub(crate) fn poll_preloader(
    mut assets: ResMut<AssetPreloader>,
    decoder: Option<ResMut<GltfDecodeStage>>,
    mut progressed: EventWriter<LoadProgressed>,
    mut completed: EventWriter<LoadCompleted>,
    mut failed: EventWriter<LoadFailed>,
) {
    let assets = &mut *assets;
    if let Some(mut decoder) = decoder {
        assets.preloader.poll(&mut *decoder);
    }
    for signal in assets.signals.try_iter() {
        match signal {
            PreloadSignal::Progress(percent) => {
                progressed.write(LoadProgressed(percent));
            }
            PreloadSignal::Completed => {
                completed.write(LoadCompleted);
            }
            PreloadSignal::Failed(failure) => {
                failed.write(LoadFailed(failure));
            }
        }
    }
}

fn named_clips(infos: &[ClipInfo], model: &Gltf) -> Vec<(String, Handle<AnimationClip>)> {
    infos
        .iter()
        .zip(&model.animations)
        .map(|(info, handle)| (info.name.clone(), handle.clone()))
        .collect()
}

/// Hands decoded assets to the avatar and compositor once the session
/// completes.
pub(crate) fn install_loaded_assets(
    mut commands: Commands,
    mut completed: EventReader<LoadCompleted>,
    mut assets: ResMut<AssetPreloader>,
    mut controller: ResMut<AnimationController>,
    mut bindings: ResMut<AvatarBindings>,
    mut clip_handles: ResMut<AvatarClipHandles>,
    gltfs: Res<Assets<Gltf>>,
    roots: Query<Entity, With<AvatarRoot>>,
    mut environment: EventWriter<AttachEnvironment>,
) {
    if completed.read().last().is_none() {
        return;
    }
    let preloader = &mut assets.preloader;
    let mut clips = Vec::new();

    match preloader.take_payload(HUMANOID_ASSET) {
        Some(AssetPayload::Decoded(DecodedAsset::Humanoid { rig, gltf })) => {
            match gltfs.get(&gltf) {
                Some(model) => {
                    clips.extend(named_clips(&rig.clips, model));
                    let scene = model
                        .default_scene
                        .clone()
                        .or_else(|| model.scenes.first().cloned());
                    for root in &roots {
                        commands.entity(root).despawn();
                    }
                    if controller.set_rig(rig).is_some() {
                        info!("previous humanoid rig replaced");
                    }
                    bindings.clear();
                    match scene {
                        Some(scene) => {
                            commands.spawn((
                                Name::new("humanoid"),
                                AvatarRoot,
                                SceneRoot(scene),
                                Transform::default(),
                            ));
                        }
                        None => warn!("humanoid model has no scene"),
                    }
                }
                None => warn!("humanoid glTF missing after decode"),
            }
        }
        Some(_) => warn!("humanoid payload has an unexpected shape"),
        None => {}
    }

    if let Some(AssetPayload::Decoded(DecodedAsset::Animation { clips: infos, gltf })) =
        preloader.take_payload(ANIMATION_ASSET)
    {
        match gltfs.get(&gltf) {
            Some(model) => clips.extend(named_clips(&infos, model)),
            None => warn!("animation glTF missing after decode"),
        }
    }
    info!(clips = clips.len(), "animation clips ready");
    clip_handles.clips = clips;

    let cloud = match preloader.take_payload(POINT_CLOUD_ASSET) {
        Some(AssetPayload::Raw(bytes)) => {
            let format = preloader
                .get_by_name(POINT_CLOUD_ASSET)
                .map(|record| PointCloudFormat::from_url(&record.descriptor.url))
                .unwrap_or(PointCloudFormat::Splat);
            Some(PointCloudPayload { bytes, format })
        }
        _ => None,
    };
    environment.write(AttachEnvironment(cloud));
}

pub(crate) fn tag_look_target(
    mut commands: Commands,
    cameras: Query<Entity, (With<HumanoidCamera>, Without<LookTarget>)>,
) {
    for camera in &cameras {
        commands.entity(camera).insert(LookTarget);
    }
}

pub(crate) fn cancel_on_exit(
    mut exits: EventReader<AppExit>,
    mut assets: ResMut<AssetPreloader>,
    decoder: Option<ResMut<GltfDecodeStage>>,
) {
    if exits.read().next().is_none() {
        return;
    }
    assets.preloader.cancel();
    if let Some(mut decoder) = decoder {
        // Releases the cancelled session's glTF handles and memory files.
        assets.preloader.poll(&mut *decoder);
    }
}
