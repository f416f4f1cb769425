//! Verlet spring-bone chains in world space.
//!
//! Each joint except a chain's last one is simulated as a segment pointing
//! at the next joint. Inputs are the chain root's world position and its
//! parent's world rotation; outputs are local rotations per joint.

use bevy::math::{Quat, Vec3};

use crate::rig::{HumanoidRig, NodeId, SpringParams};

const MIN_SEGMENT_LENGTH: f32 = 1e-5;

#[derive(Debug, Clone)]
struct Segment {
    node: NodeId,
    rest_local: Quat,
    child_offset: Vec3,
    params: SpringParams,
    prev_tail: Vec3,
    tail: Vec3,
    initialized: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SpringBoneSolver {
    chains: Vec<Vec<Segment>>,
    resets: u32,
}

impl SpringBoneSolver {
    pub fn from_rig(rig: &HumanoidRig) -> Self {
        let chains = rig
            .springs
            .iter()
            .map(|chain| {
                chain
                    .joints
                    .windows(2)
                    .filter_map(|pair| {
                        let joint = rig.graph.get(pair[0].node)?;
                        let child = rig.graph.get(pair[1].node)?;
                        Some(Segment {
                            node: pair[0].node,
                            rest_local: joint.rotation,
                            child_offset: child.translation * joint.scale,
                            params: pair[0].params,
                            prev_tail: Vec3::ZERO,
                            tail: Vec3::ZERO,
                            initialized: false,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|chain| !chain.is_empty())
            .collect();
        Self { chains, resets: 0 }
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Root joint of every chain, in chain order.
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.chains.iter().filter_map(|c| c.first()).map(|s| s.node)
    }

    pub fn reset_count(&self) -> u32 {
        self.resets
    }

    /// Snaps every tail back onto the current pose on the next step.
    pub fn reset(&mut self) {
        self.resets += 1;
        for segment in self.chains.iter_mut().flatten() {
            segment.initialized = false;
        }
    }

    /// `root_pose(node)` yields the world position of a chain root joint and
    /// its parent's world rotation.
    pub fn step(
        &mut self,
        delta: f32,
        root_pose: impl Fn(NodeId) -> Option<(Vec3, Quat)>,
    ) -> Vec<(NodeId, Quat)> {
        let mut out = Vec::new();
        for chain in &mut self.chains {
            let Some(first) = chain.first() else {
                continue;
            };
            let Some((mut head, mut parent_rot)) = root_pose(first.node) else {
                continue;
            };
            for segment in chain.iter_mut() {
                let rest_world = parent_rot * segment.rest_local;
                let length = segment.child_offset.length();
                if length < MIN_SEGMENT_LENGTH {
                    out.push((segment.node, segment.rest_local));
                    parent_rot = rest_world;
                    continue;
                }
                let rest_dir = (rest_world * segment.child_offset) / length;
                let rest_tail = head + rest_dir * length;

                if !segment.initialized {
                    segment.prev_tail = rest_tail;
                    segment.tail = rest_tail;
                    segment.initialized = true;
                }

                let params = segment.params;
                let inertia = (segment.tail - segment.prev_tail) * (1.0 - params.drag);
                let stiffness = rest_dir * params.stiffness * delta;
                let gravity = params.gravity_dir * params.gravity_power * delta;
                let next = segment.tail + inertia + stiffness + gravity;
                let dir = (next - head).try_normalize().unwrap_or(rest_dir);
                let next = head + dir * length;

                segment.prev_tail = segment.tail;
                segment.tail = next;

                let world_new = Quat::from_rotation_arc(rest_dir, dir) * rest_world;
                out.push((segment.node, parent_rot.inverse() * world_new));

                head = next;
                parent_rot = world_new;
            }
        }
        out
    }
}
