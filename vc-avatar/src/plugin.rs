use std::collections::HashMap;

use bevy::animation::AnimationPlayer;
use bevy::app::Animation;
use bevy::prelude::*;
use bevy::render::mesh::morph::MorphWeights;
use bevy::transform::TransformSystem;
use tracing::{debug, info, warn};
use vc_utils::FrameTick;

use crate::controller::{AnimationController, ClipEvent, PlayOptions};
use crate::rig::{HumanBone, NodeId};

/// Root of the spawned humanoid scene.
#[derive(Component, Debug, Clone, Copy)]
pub struct AvatarRoot;

/// The gaze follows the first entity carrying this.
#[derive(Component, Debug, Clone, Copy)]
pub struct LookTarget;

#[derive(Event, Debug, Clone)]
pub struct AvatarClipEvent(pub ClipEvent);

/// Decoded animation clips waiting to be bound to the rig's player.
#[derive(Resource, Debug, Default, Clone)]
pub struct AvatarClipHandles {
    pub clips: Vec<(String, Handle<AnimationClip>)>,
}

#[derive(Resource, Debug, Clone)]
pub struct AvatarSettings {
    pub idle_clip: Option<String>,
    pub auto_blink: bool,
}

impl Default for AvatarSettings {
    fn default() -> Self {
        Self {
            idle_clip: None,
            auto_blink: true,
        }
    }
}

/// Entity handles for the attached rig's nodes. Cleared when the rig is
/// swapped so the next scene is bound from scratch.
#[derive(Resource, Debug, Default)]
pub struct AvatarBindings {
    root: Option<Entity>,
    player: Option<Entity>,
    nodes: HashMap<NodeId, Entity>,
    clip_nodes: HashMap<String, AnimationNodeIndex>,
    head_offset: Quat,
    head_written: Option<Quat>,
}

impl AvatarBindings {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_bound(&self) -> bool {
        self.root.is_some()
    }

    pub fn root(&self) -> Option<Entity> {
        self.root
    }

    pub fn entity(&self, node: NodeId) -> Option<Entity> {
        self.nodes.get(&node).copied()
    }
}

pub struct AvatarPlugin;

impl Plugin for AvatarPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<AnimationController>()
            .init_resource::<AvatarBindings>()
            .init_resource::<AvatarClipHandles>()
            .init_resource::<AvatarSettings>()
            .init_resource::<FrameTick>()
            .add_event::<AvatarClipEvent>()
            .add_systems(
                Update,
                (
                    apply_avatar_settings,
                    bind_avatar_scene,
                    bind_avatar_clips,
                    drive_controller,
                    apply_clip_poses,
                )
                    .chain(),
            )
            .add_systems(
                PostUpdate,
                (apply_expressions, apply_look_at, step_spring_bones)
                    .chain()
                    .after(Animation)
                    .before(TransformSystem::TransformPropagate),
            );
    }
}

fn apply_avatar_settings(
    settings: Res<AvatarSettings>,
    mut controller: ResMut<AnimationController>,
) {
    if settings.is_changed() && controller.blink().is_enabled() != settings.auto_blink {
        controller.set_auto_blink(settings.auto_blink);
    }
}

fn bind_avatar_scene(
    controller: Res<AnimationController>,
    mut bindings: ResMut<AvatarBindings>,
    roots: Query<Entity, With<AvatarRoot>>,
    children: Query<&Children>,
    names: Query<&Name>,
    players: Query<(), With<AnimationPlayer>>,
) {
    if bindings.is_bound() {
        return;
    }
    let Some(rig) = controller.rig() else {
        return;
    };
    let Some(root) = roots.iter().next() else {
        return;
    };

    let mut by_name: HashMap<&str, Entity> = HashMap::new();
    let mut player = None;
    for entity in children.iter_descendants(root) {
        if let Ok(name) = names.get(entity) {
            by_name.entry(name.as_str()).or_insert(entity);
        }
        if player.is_none() && players.contains(entity) {
            player = Some(entity);
        }
    }
    if by_name.is_empty() {
        // Scene not spawned yet.
        return;
    }

    let nodes: HashMap<NodeId, Entity> = rig
        .graph
        .iter()
        .filter_map(|(id, node)| Some((id, *by_name.get(node.name.as_str())?)))
        .collect();
    info!(
        bound = nodes.len(),
        total = rig.graph.len(),
        has_player = player.is_some(),
        "bound humanoid scene"
    );
    bindings.root = Some(root);
    bindings.player = player;
    bindings.nodes = nodes;
}

fn bind_avatar_clips(
    mut commands: Commands,
    mut controller: ResMut<AnimationController>,
    mut bindings: ResMut<AvatarBindings>,
    handles: Res<AvatarClipHandles>,
    settings: Res<AvatarSettings>,
    clips: Res<Assets<AnimationClip>>,
    mut graphs: ResMut<Assets<AnimationGraph>>,
) {
    if !bindings.clip_nodes.is_empty() || handles.clips.is_empty() {
        return;
    }
    let Some(player) = bindings.player else {
        return;
    };
    // Durations come from the loaded assets; wait until all of them are in.
    let mut durations = Vec::with_capacity(handles.clips.len());
    for (_, handle) in &handles.clips {
        match clips.get(handle) {
            Some(clip) => durations.push(clip.duration()),
            None => return,
        }
    }

    let (graph, indices) =
        AnimationGraph::from_clips(handles.clips.iter().map(|(_, handle)| handle.clone()));
    commands
        .entity(player)
        .insert(AnimationGraphHandle(graphs.add(graph)));

    for ((name, _), (index, duration)) in handles.clips.iter().zip(indices.into_iter().zip(durations)) {
        if let Err(err) = controller.register_clip(name, duration) {
            warn!("failed to register clip {name}: {err}");
            continue;
        }
        bindings.clip_nodes.insert(name.clone(), index);
    }

    let idle = settings
        .idle_clip
        .clone()
        .or_else(|| handles.clips.first().map(|(name, _)| name.clone()));
    if let Some(idle) = idle {
        match controller.play(&idle, PlayOptions::looped()) {
            Ok(_) => debug!(clip = idle, "idle clip started"),
            Err(err) => warn!("failed to start idle clip: {err}"),
        }
    }
}

fn drive_controller(
    tick: Res<FrameTick>,
    mut controller: ResMut<AnimationController>,
    mut events: EventWriter<AvatarClipEvent>,
) {
    if !tick.running {
        return;
    }
    for event in controller.update(tick.delta) {
        events.write(AvatarClipEvent(event));
    }
}

/// The controller owns clip time; the player only samples at it.
fn apply_clip_poses(
    controller: Res<AnimationController>,
    bindings: Res<AvatarBindings>,
    mut players: Query<&mut AnimationPlayer>,
) {
    let Some(mut player) = bindings.player.and_then(|e| players.get_mut(e).ok()) else {
        return;
    };
    let poses: HashMap<String, (f32, f32)> = controller
        .clip_poses()
        .into_iter()
        .map(|pose| (pose.name, (pose.time, pose.weight)))
        .collect();
    for (name, &index) in &bindings.clip_nodes {
        match poses.get(name) {
            Some(&(time, weight)) => {
                let active = if player.is_playing_animation(index) {
                    match player.animation_mut(index) {
                        Some(active) => active,
                        None => continue,
                    }
                } else {
                    player.play(index)
                };
                active.set_speed(0.0).set_weight(weight).seek_to(time);
            }
            None => {
                if player.is_playing_animation(index) {
                    player.stop(index);
                }
            }
        }
    }
}

fn apply_expressions(
    controller: Res<AnimationController>,
    bindings: Res<AvatarBindings>,
    mut morphs: Query<&mut MorphWeights>,
) {
    let Some(rig) = controller.rig() else {
        return;
    };
    for (node, weights) in controller.expressions().morph_weights(rig) {
        let Some(mut morph) = bindings.entity(node).and_then(|e| morphs.get_mut(e).ok()) else {
            continue;
        };
        for (slot, value) in morph.weights_mut().iter_mut().zip(weights) {
            *slot = value;
        }
    }
}

fn apply_look_at(
    mut controller: ResMut<AnimationController>,
    mut bindings: ResMut<AvatarBindings>,
    targets: Query<&GlobalTransform, With<LookTarget>>,
    globals: Query<&GlobalTransform>,
    mut transforms: Query<&mut Transform>,
) {
    let Some(head_node) = controller.rig().and_then(|rig| rig.bone(HumanBone::Head)) else {
        return;
    };
    let Some(head) = bindings.entity(head_node) else {
        return;
    };
    if let (Some(target), Some(root), Ok(head_global)) = (
        targets.iter().next(),
        bindings.root.and_then(|e| globals.get(e).ok()),
        globals.get(head),
    ) {
        controller.look_at_mut().aim(
            head_global.translation(),
            root.rotation(),
            target.translation(),
        );
    }

    let Ok(mut transform) = transforms.get_mut(head) else {
        return;
    };
    // Undo last frame's offset unless the animation already rewrote the bone.
    let base = if bindings.head_written == Some(transform.rotation) {
        transform.rotation * bindings.head_offset.inverse()
    } else {
        transform.rotation
    };
    let offset = controller.look_at().head_rotation();
    transform.rotation = (base * offset).normalize();
    bindings.head_offset = offset;
    bindings.head_written = Some(transform.rotation);
}

fn step_spring_bones(
    tick: Res<FrameTick>,
    mut controller: ResMut<AnimationController>,
    bindings: Res<AvatarBindings>,
    globals: Query<&GlobalTransform>,
    mut transforms: Query<&mut Transform>,
) {
    if !tick.running || !bindings.is_bound() {
        return;
    }
    let parents: HashMap<NodeId, Option<NodeId>> = match controller.rig() {
        Some(rig) => rig.graph.iter().map(|(id, node)| (id, node.parent)).collect(),
        None => return,
    };
    let Some(solver) = controller.springs_mut() else {
        return;
    };
    let root_pose = |node: NodeId| {
        let joint = globals.get(bindings.entity(node)?).ok()?;
        let parent_rotation = parents
            .get(&node)
            .copied()
            .flatten()
            .and_then(|p| bindings.entity(p))
            .and_then(|e| globals.get(e).ok())
            .map_or(Quat::IDENTITY, GlobalTransform::rotation);
        Some((joint.translation(), parent_rotation))
    };
    for (node, rotation) in solver.step(tick.delta, root_pose) {
        if let Some(mut transform) = bindings.entity(node).and_then(|e| transforms.get_mut(e).ok()) {
            transform.rotation = rotation;
        }
    }
}
