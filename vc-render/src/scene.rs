use bevy::app::AppExit;
use bevy::input::mouse::{AccumulatedMouseMotion, AccumulatedMouseScroll, MouseScrollUnit};
use bevy::prelude::*;
use bevy::render::camera::RenderTarget;
use bevy::render::mesh::{Indices, PrimitiveTopology};
use bevy::render::render_asset::RenderAssetUsages;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat, TextureUsages};
use bevy::render::view::RenderLayers;
use bevy::window::{PrimaryWindow, WindowOccluded, WindowResized};
use tracing::{error, info, warn};
use vc_utils::{CompanionConfig, FrameTick, HostCommand, HostState};

use crate::compositor::{CameraPose, Compositor, FramePlan};
use crate::orbit::OrbitState;
use crate::sky::{sky_sphere_mesh, SKY_RADIUS};
use crate::splat::{parse_splat, PointCloudFormat, PointCloudViewer, SplatTransform};
use crate::teardown::{ResourceKind, TeardownLedger};

pub const ENVIRONMENT_LAYER: usize = 1;
/// Distance of the background quad in front of the humanoid camera.
const BACKDROP_DISTANCE: f32 = 200.0;
const DEFAULT_VIEWPORT: UVec2 = UVec2::new(1280, 720);

#[derive(Component, Debug, Clone, Copy)]
pub struct HumanoidCamera;

#[derive(Component, Debug, Clone, Copy)]
pub struct EnvironmentCamera;

#[derive(Component, Debug, Clone, Copy)]
pub struct BackdropQuad;

#[derive(Component, Debug, Clone, Copy)]
pub struct SkyBackdrop;

#[derive(Component, Debug, Clone, Copy)]
pub struct PointCloudEntity;

/// Plan produced for the current frame.
#[derive(Resource, Debug, Default, Clone, Copy)]
pub struct CurrentFramePlan(pub FramePlan);

#[derive(Debug, Clone)]
pub struct PointCloudPayload {
    pub bytes: Vec<u8>,
    pub format: PointCloudFormat,
}

/// Populates the environment scene. `None` means no point cloud is
/// configured and the sky alone is the environment.
#[derive(Event, Debug, Clone)]
pub struct AttachEnvironment(pub Option<PointCloudPayload>);

#[derive(Resource, Debug)]
pub(crate) struct CompositorTargets {
    image: Handle<Image>,
    point_mesh: Option<Handle<Mesh>>,
}

fn environment_target(size: UVec2) -> Image {
    let mut image = Image::new_fill(
        Extent3d {
            width: size.x,
            height: size.y,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        &[0, 0, 0, 255],
        TextureFormat::Bgra8UnormSrgb,
        RenderAssetUsages::default(),
    );
    image.texture_descriptor.usage =
        TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST | TextureUsages::RENDER_ATTACHMENT;
    image
}

fn backdrop_scale(fov: f32, aspect: f32) -> Vec3 {
    let height = 2.0 * BACKDROP_DISTANCE * (fov * 0.5).tan();
    Vec3::new(height * aspect, height, 1.0)
}

fn camera_pose(transform: &Transform) -> CameraPose {
    CameraPose::new(transform.translation, transform.rotation)
}

pub(crate) fn setup_compositor(
    mut commands: Commands,
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    mut compositor: ResMut<Compositor>,
    mut ledger: ResMut<TeardownLedger>,
    config: Res<CompanionConfig>,
    windows: Query<&Window, With<PrimaryWindow>>,
) {
    ledger.acquire(ResourceKind::RenderContext);

    let (logical, scale_factor) = windows
        .iter()
        .next()
        .map(|w| (UVec2::new(w.width() as u32, w.height() as u32), w.scale_factor()))
        .unwrap_or((DEFAULT_VIEWPORT, 1.0));
    let viewport = compositor.resize(logical, scale_factor);
    let aspect = viewport.physical.x as f32 / viewport.physical.y.max(1) as f32;

    let image = images.add(environment_target(viewport.physical));
    ledger.acquire(ResourceKind::OffscreenTarget);

    let fov = config.camera.fov_deg.to_radians();
    let orbit = OrbitState::from_config(&config.camera, &config.orbit);
    let camera_transform = orbit.transform();
    let projection = Projection::Perspective(PerspectiveProjection {
        fov,
        ..default()
    });

    commands.spawn((
        EnvironmentCamera,
        Camera3d::default(),
        Camera {
            target: RenderTarget::Image(image.clone().into()),
            order: -1,
            is_active: false,
            clear_color: ClearColorConfig::Custom(Color::BLACK),
            ..default()
        },
        projection.clone(),
        camera_transform,
        RenderLayers::layer(ENVIRONMENT_LAYER),
    ));
    ledger.acquire(ResourceKind::EnvironmentScene);

    commands
        .spawn((
            HumanoidCamera,
            Camera3d::default(),
            Camera {
                order: 0,
                ..default()
            },
            projection,
            camera_transform,
        ))
        .with_children(|parent| {
            parent.spawn((
                BackdropQuad,
                Mesh3d(meshes.add(Rectangle::new(1.0, 1.0))),
                MeshMaterial3d(materials.add(StandardMaterial {
                    base_color: Color::WHITE,
                    base_color_texture: Some(image.clone()),
                    unlit: true,
                    ..default()
                })),
                Transform::from_xyz(0.0, 0.0, -BACKDROP_DISTANCE)
                    .with_scale(backdrop_scale(fov, aspect)),
            ));
        });
    ledger.acquire(ResourceKind::HumanoidScene);
    ledger.acquire(ResourceKind::BackdropQuad);

    commands.spawn((
        SkyBackdrop,
        Mesh3d(meshes.add(sky_sphere_mesh(SKY_RADIUS, &config.sky.stops))),
        MeshMaterial3d(materials.add(StandardMaterial {
            base_color: Color::WHITE,
            unlit: true,
            ..default()
        })),
        Transform::default(),
        RenderLayers::layer(ENVIRONMENT_LAYER),
    ));
    ledger.acquire(ResourceKind::SkyBackdrop);

    commands.insert_resource(AmbientLight {
        color: Color::WHITE,
        brightness: 400.0,
        ..default()
    });
    commands.spawn((
        DirectionalLight {
            illuminance: 8_000.0,
            ..default()
        },
        Transform::from_xyz(1.0, 3.0, 2.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));

    commands.insert_resource(orbit);
    ledger.acquire(ResourceKind::OrbitController);

    commands.insert_resource(CompositorTargets {
        image,
        point_mesh: None,
    });
    info!(
        width = viewport.physical.x,
        height = viewport.physical.y,
        "compositor ready"
    );
}

pub(crate) fn handle_host_commands(
    mut commands: EventReader<HostCommand>,
    mut compositor: ResMut<Compositor>,
    mut host: ResMut<HostState>,
) {
    for command in commands.read() {
        match command {
            HostCommand::Pause => {
                compositor.pause();
                host.paused = true;
            }
            HostCommand::Resume => {
                compositor.resume();
                host.paused = false;
            }
            HostCommand::ForceBackgroundRepaint => compositor.force_background_repaint(),
        }
    }
}

pub(crate) fn handle_window_events(
    mut resized: EventReader<WindowResized>,
    mut occluded: EventReader<WindowOccluded>,
    windows: Query<&Window>,
    mut compositor: ResMut<Compositor>,
    mut host: ResMut<HostState>,
    targets: Option<Res<CompositorTargets>>,
    mut images: ResMut<Assets<Image>>,
    cameras: Query<&Projection, With<HumanoidCamera>>,
    mut backdrops: Query<&mut Transform, With<BackdropQuad>>,
) {
    for event in occluded.read() {
        compositor.set_hidden(event.occluded);
        host.hidden = event.occluded;
    }

    let Some(event) = resized.read().last() else {
        return;
    };
    let scale_factor = windows.get(event.window).map_or(1.0, Window::scale_factor);
    let logical = UVec2::new(event.width.max(1.0) as u32, event.height.max(1.0) as u32);
    let viewport = compositor.resize(logical, scale_factor);

    if let Some(image) = targets.as_ref().and_then(|t| images.get_mut(&t.image)) {
        image.resize(Extent3d {
            width: viewport.physical.x,
            height: viewport.physical.y,
            depth_or_array_layers: 1,
        });
    }
    let fov = match cameras.iter().next() {
        Some(Projection::Perspective(p)) => p.fov,
        _ => return,
    };
    let aspect = viewport.physical.x as f32 / viewport.physical.y.max(1) as f32;
    for mut transform in &mut backdrops {
        transform.scale = backdrop_scale(fov, aspect);
    }
}

pub(crate) fn orbit_camera(
    config: Res<CompanionConfig>,
    host: Res<HostState>,
    buttons: Res<ButtonInput<MouseButton>>,
    motion: Res<AccumulatedMouseMotion>,
    scroll: Res<AccumulatedMouseScroll>,
    orbit: Option<ResMut<OrbitState>>,
    mut cameras: Query<&mut Transform, With<HumanoidCamera>>,
) {
    let Some(mut orbit) = orbit else {
        return;
    };
    if !config.orbit.enabled || host.is_suspended() || host.debug_open {
        return;
    }
    let before = *orbit;
    if buttons.pressed(MouseButton::Left) {
        orbit.rotate(motion.delta, &config.orbit);
    }
    let lines = match scroll.unit {
        MouseScrollUnit::Line => scroll.delta.y,
        MouseScrollUnit::Pixel => scroll.delta.y / 40.0,
    };
    orbit.zoom(lines, &config.orbit);
    if *orbit == before {
        return;
    }
    for mut transform in &mut cameras {
        *transform = orbit.transform();
    }
}

pub(crate) fn plan_frame(
    time: Res<Time<Real>>,
    mut compositor: ResMut<Compositor>,
    mut current: ResMut<CurrentFramePlan>,
    mut tick: ResMut<FrameTick>,
    viewer: Option<Res<PointCloudViewer>>,
    mut humanoid: Query<(&Transform, &mut Camera), (With<HumanoidCamera>, Without<EnvironmentCamera>)>,
    mut environment: Query<
        (&mut Transform, &mut Camera),
        (With<EnvironmentCamera>, Without<HumanoidCamera>),
    >,
) {
    let Ok((humanoid_transform, mut humanoid_camera)) = humanoid.single_mut() else {
        return;
    };
    let ready = viewer.as_ref().is_some_and(|v| v.is_ready());
    let plan = compositor.frame(
        time.elapsed_secs_f64(),
        camera_pose(humanoid_transform),
        ready,
    );
    current.0 = plan;
    tick.delta = plan.delta;
    tick.running = !plan.is_skipped();
    if tick.running {
        tick.frame += 1;
    }

    // A window with no active camera gets cleared, so the humanoid camera
    // stays on while suspended and keeps the last composited frame visible.
    if !humanoid_camera.is_active {
        humanoid_camera.is_active = true;
    }
    for (mut transform, mut camera) in &mut environment {
        if plan.render_environment {
            *transform = *humanoid_transform;
        }
        if camera.is_active != plan.render_environment {
            camera.is_active = plan.render_environment;
        }
    }
}

pub(crate) fn attach_environment(
    mut commands: Commands,
    mut events: EventReader<AttachEnvironment>,
    mut compositor: ResMut<Compositor>,
    mut ledger: ResMut<TeardownLedger>,
    mut targets: ResMut<CompositorTargets>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    config: Res<CompanionConfig>,
    existing: Query<Entity, With<PointCloudEntity>>,
) {
    let Some(AttachEnvironment(payload)) = events.read().last() else {
        return;
    };
    for entity in &existing {
        commands.entity(entity).despawn();
    }
    if let Some(mesh) = targets.point_mesh.take() {
        meshes.remove(&mesh);
    }

    let viewer = match payload {
        Some(PointCloudPayload {
            bytes,
            format: PointCloudFormat::Splat,
        }) => match parse_splat(bytes, &SplatTransform::from(&config.point_cloud)) {
            Ok(points) => {
                info!(points = points.len(), "point cloud parsed");
                PointCloudViewer::new(points)
            }
            Err(err) => {
                error!("point cloud payload rejected: {err}");
                PointCloudViewer::opaque()
            }
        },
        Some(PointCloudPayload { bytes, .. }) => {
            warn!(bytes = bytes.len(), "point cloud format is not drawn");
            PointCloudViewer::opaque()
        }
        None => PointCloudViewer::opaque(),
    };

    if !viewer.points().is_empty() {
        let mut mesh = Mesh::new(PrimitiveTopology::PointList, RenderAssetUsages::default());
        let positions: Vec<[f32; 3]> = viewer.points().iter().map(|p| p.position.to_array()).collect();
        let colors: Vec<[f32; 4]> = viewer.points().iter().map(|p| p.linear_color()).collect();
        mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, positions);
        mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, colors);
        mesh.insert_indices(Indices::U32(Vec::new()));
        let handle = meshes.add(mesh);
        commands.spawn((
            PointCloudEntity,
            Mesh3d(handle.clone()),
            MeshMaterial3d(materials.add(StandardMaterial {
                base_color: Color::WHITE,
                unlit: true,
                ..default()
            })),
            Transform::default(),
            Visibility::Hidden,
            RenderLayers::layer(ENVIRONMENT_LAYER),
        ));
        targets.point_mesh = Some(handle);
    }

    commands.insert_resource(viewer);
    ledger.acquire(ResourceKind::PointCloudViewer);
    compositor.attach_environment();
}

pub(crate) fn reveal_point_cloud(
    current: Res<CurrentFramePlan>,
    mut compositor: ResMut<Compositor>,
    viewer: Option<ResMut<PointCloudViewer>>,
    targets: Option<Res<CompositorTargets>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut clouds: Query<&mut Visibility, With<PointCloudEntity>>,
) {
    let Some(mut viewer) = viewer else {
        return;
    };
    if current.0.is_skipped() || viewer.is_ready() {
        return;
    }
    if !viewer.advance() {
        return;
    }
    let revealed = viewer.revealed() as u32;
    if let Some(mesh) = targets
        .as_ref()
        .and_then(|t| t.point_mesh.as_ref())
        .and_then(|h| meshes.get_mut(h))
    {
        mesh.insert_indices(Indices::U32((0..revealed).collect()));
    }
    for mut visibility in &mut clouds {
        *visibility = Visibility::Inherited;
    }
    // Newly revealed points only show up if the environment is redrawn.
    compositor.force_background_repaint();
}

/// Releases compositor resources in dependency order when the app exits.
pub(crate) fn teardown_on_exit(
    mut exits: EventReader<AppExit>,
    mut commands: Commands,
    mut ledger: ResMut<TeardownLedger>,
    targets: Option<Res<CompositorTargets>>,
    mut images: ResMut<Assets<Image>>,
    mut meshes: ResMut<Assets<Mesh>>,
    quads: Query<Entity, With<BackdropQuad>>,
    skies: Query<Entity, With<SkyBackdrop>>,
    clouds: Query<Entity, With<PointCloudEntity>>,
    env_cameras: Query<Entity, With<EnvironmentCamera>>,
    humanoid_cameras: Query<Entity, With<HumanoidCamera>>,
) {
    if exits.read().next().is_none() {
        return;
    }
    for kind in ResourceKind::RELEASE_ORDER {
        if !ledger.is_live(kind) {
            continue;
        }
        match kind {
            ResourceKind::OffscreenTarget => {
                if let Some(targets) = &targets {
                    images.remove(&targets.image);
                }
            }
            ResourceKind::BackdropQuad => quads.iter().for_each(|e| commands.entity(e).despawn()),
            ResourceKind::SkyBackdrop => skies.iter().for_each(|e| commands.entity(e).despawn()),
            ResourceKind::OrbitController => commands.remove_resource::<OrbitState>(),
            ResourceKind::PointCloudViewer => {
                clouds.iter().for_each(|e| commands.entity(e).despawn());
                if let Some(mesh) = targets.as_ref().and_then(|t| t.point_mesh.as_ref()) {
                    meshes.remove(mesh);
                }
                commands.remove_resource::<PointCloudViewer>();
            }
            ResourceKind::EnvironmentScene => {
                env_cameras.iter().for_each(|e| commands.entity(e).despawn())
            }
            ResourceKind::HumanoidScene => {
                humanoid_cameras.iter().for_each(|e| commands.entity(e).despawn())
            }
            ResourceKind::RenderContext => commands.remove_resource::<CompositorTargets>(),
        }
        if let Err(err) = ledger.release(kind) {
            error!("teardown failed: {err}");
            return;
        }
    }
    info!("compositor torn down");
}
