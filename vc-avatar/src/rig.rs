//! Humanoid rig metadata read from a VRM / glTF JSON chunk.
//!
//! The scene graph is an arena: nodes are owned by [`SceneGraph`] and
//! everything else (expression binds, spring joints, human bones) refers to
//! them through [`NodeId`] handles.

use std::collections::HashMap;

use bevy::math::{Quat, Vec3};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RigParseError {
    #[error("invalid GLB container: {0}")]
    Glb(String),
    #[error("invalid glTF JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("glTF document has no nodes")]
    NoNodes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone)]
pub struct RigNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub morph_target_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    nodes: Vec<RigNode>,
}

impl SceneGraph {
    pub fn get(&self, id: NodeId) -> Option<&RigNode> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &RigNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphBind {
    pub node: NodeId,
    pub index: usize,
    /// 0..=1
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionDef {
    pub name: String,
    pub binds: Vec<MorphBind>,
    pub is_binary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringParams {
    pub stiffness: f32,
    pub drag: f32,
    pub gravity_power: f32,
    pub gravity_dir: Vec3,
}

impl Default for SpringParams {
    fn default() -> Self {
        Self {
            stiffness: 1.0,
            drag: 0.4,
            gravity_power: 0.0,
            gravity_dir: Vec3::NEG_Y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpringJoint {
    pub node: NodeId,
    pub params: SpringParams,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpringChain {
    pub joints: Vec<SpringJoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HumanBone {
    Hips,
    Spine,
    Chest,
    Neck,
    Head,
    LeftEye,
    RightEye,
}

impl HumanBone {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "hips" => Some(Self::Hips),
            "spine" => Some(Self::Spine),
            "chest" => Some(Self::Chest),
            "neck" => Some(Self::Neck),
            "head" => Some(Self::Head),
            "leftEye" => Some(Self::LeftEye),
            "rightEye" => Some(Self::RightEye),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VrmVersion {
    V0,
    V1,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClipInfo {
    pub name: String,
    pub duration: f32,
}

#[derive(Debug, Clone, Default)]
pub struct HumanoidRig {
    pub graph: SceneGraph,
    pub expressions: HashMap<String, ExpressionDef>,
    pub springs: Vec<SpringChain>,
    pub human_bones: HashMap<HumanBone, NodeId>,
    pub clips: Vec<ClipInfo>,
    pub vrm: Option<VrmVersion>,
}

impl HumanoidRig {
    pub fn has_expression(&self, name: &str) -> bool {
        self.expressions.contains_key(name)
    }

    pub fn bone(&self, bone: HumanBone) -> Option<NodeId> {
        self.human_bones.get(&bone).copied()
    }

    pub fn from_gltf_bytes(bytes: &[u8]) -> Result<Self, RigParseError> {
        let json = gltf_json_chunk(bytes)?;
        let root: Value = serde_json::from_slice(&json)?;
        let rig = Self::from_json(&root);
        if rig.graph.is_empty() {
            return Err(RigParseError::NoNodes);
        }
        Ok(rig)
    }

    /// Clip table of an animation-only file. Such files may legitimately
    /// carry no VRM extensions.
    pub fn clips_from_gltf_bytes(bytes: &[u8]) -> Result<Vec<ClipInfo>, RigParseError> {
        let json = gltf_json_chunk(bytes)?;
        let root: Value = serde_json::from_slice(&json)?;
        Ok(parse_clips(&root))
    }

    fn from_json(root: &Value) -> Self {
        let graph = parse_graph(root);
        let clips = parse_clips(root);
        let extensions = root.get("extensions");

        let mut rig = Self {
            graph,
            clips,
            ..Default::default()
        };

        if let Some(vrm1) = extensions.and_then(|e| e.get("VRMC_vrm")) {
            rig.vrm = Some(VrmVersion::V1);
            rig.expressions = parse_vrm1_expressions(vrm1, &rig.graph);
            rig.human_bones = parse_vrm1_bones(vrm1, &rig.graph);
            if let Some(springs) = extensions.and_then(|e| e.get("VRMC_springBone")) {
                rig.springs = parse_vrm1_springs(springs, &rig.graph);
            }
        } else if let Some(vrm0) = extensions.and_then(|e| e.get("VRM")) {
            rig.vrm = Some(VrmVersion::V0);
            rig.expressions = parse_vrm0_expressions(vrm0, root, &rig.graph);
            rig.human_bones = parse_vrm0_bones(vrm0, &rig.graph);
            rig.springs = parse_vrm0_springs(vrm0, &rig.graph);
        }
        rig
    }
}

fn gltf_json_chunk(bytes: &[u8]) -> Result<Vec<u8>, RigParseError> {
    if bytes.starts_with(b"glTF") {
        let glb = gltf::Glb::from_slice(bytes).map_err(|e| RigParseError::Glb(e.to_string()))?;
        Ok(glb.json.into_owned())
    } else {
        Ok(bytes.to_vec())
    }
}

fn f32_at(value: &Value, idx: usize) -> Option<f32> {
    value.get(idx)?.as_f64().map(|v| v as f32)
}

fn vec3(value: Option<&Value>, default: Vec3) -> Vec3 {
    match value {
        Some(v) => Vec3::new(
            f32_at(v, 0).unwrap_or(default.x),
            f32_at(v, 1).unwrap_or(default.y),
            f32_at(v, 2).unwrap_or(default.z),
        ),
        None => default,
    }
}

fn index(value: Option<&Value>) -> Option<usize> {
    value?.as_u64().map(|v| v as usize)
}

fn node_ref(value: Option<&Value>, graph: &SceneGraph) -> Option<NodeId> {
    index(value).filter(|i| *i < graph.len()).map(NodeId)
}

fn parse_graph(root: &Value) -> SceneGraph {
    let Some(nodes) = root.get("nodes").and_then(Value::as_array) else {
        return SceneGraph::default();
    };
    let meshes = root.get("meshes").and_then(Value::as_array);

    let mut out: Vec<RigNode> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let rotation = match node.get("rotation") {
                Some(r) => Quat::from_xyzw(
                    f32_at(r, 0).unwrap_or(0.0),
                    f32_at(r, 1).unwrap_or(0.0),
                    f32_at(r, 2).unwrap_or(0.0),
                    f32_at(r, 3).unwrap_or(1.0),
                ),
                None => Quat::IDENTITY,
            };
            let morph_target_count = index(node.get("mesh"))
                .and_then(|m| meshes?.get(m))
                .and_then(|mesh| mesh.get("primitives")?.get(0)?.get("targets")?.as_array())
                .map_or(0, Vec::len);
            RigNode {
                name: node
                    .get("name")
                    .and_then(Value::as_str)
                    .map_or_else(|| format!("node{i}"), str::to_string),
                parent: None,
                children: node
                    .get("children")
                    .and_then(Value::as_array)
                    .map(|c| c.iter().filter_map(|v| index(Some(v))).map(NodeId).collect())
                    .unwrap_or_default(),
                translation: vec3(node.get("translation"), Vec3::ZERO),
                rotation,
                scale: vec3(node.get("scale"), Vec3::ONE),
                morph_target_count,
            }
        })
        .collect();

    let len = out.len();
    for parent in 0..len {
        let children = std::mem::take(&mut out[parent].children);
        let children: Vec<NodeId> = children.into_iter().filter(|c| c.0 < len).collect();
        for child in &children {
            out[child.0].parent = Some(NodeId(parent));
        }
        out[parent].children = children;
    }
    SceneGraph { nodes: out }
}

fn parse_clips(root: &Value) -> Vec<ClipInfo> {
    let Some(animations) = root.get("animations").and_then(Value::as_array) else {
        return Vec::new();
    };
    let accessors = root.get("accessors").and_then(Value::as_array);
    animations
        .iter()
        .enumerate()
        .map(|(i, anim)| {
            let samplers = anim.get("samplers").and_then(Value::as_array);
            let duration = samplers
                .into_iter()
                .flatten()
                .filter_map(|sampler| {
                    let input = index(sampler.get("input"))?;
                    let accessor = accessors?.get(input)?;
                    f32_at(accessor.get("max")?, 0)
                })
                .fold(0.0f32, f32::max);
            ClipInfo {
                name: anim
                    .get("name")
                    .and_then(Value::as_str)
                    .map_or_else(|| format!("clip{i}"), str::to_string),
                duration,
            }
        })
        .collect()
}

fn parse_vrm1_expressions(vrm: &Value, graph: &SceneGraph) -> HashMap<String, ExpressionDef> {
    let mut out = HashMap::new();
    let Some(expressions) = vrm.get("expressions") else {
        return out;
    };
    for group in ["preset", "custom"] {
        let Some(table) = expressions.get(group).and_then(Value::as_object) else {
            continue;
        };
        for (name, def) in table {
            let binds = def
                .get("morphTargetBinds")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|bind| {
                    Some(MorphBind {
                        node: node_ref(bind.get("node"), graph)?,
                        index: index(bind.get("index"))?,
                        weight: bind.get("weight").and_then(Value::as_f64).unwrap_or(1.0) as f32,
                    })
                })
                .collect();
            out.insert(
                name.clone(),
                ExpressionDef {
                    name: name.clone(),
                    binds,
                    is_binary: def.get("isBinary").and_then(Value::as_bool).unwrap_or(false),
                },
            );
        }
    }
    out
}

fn parse_vrm1_bones(vrm: &Value, graph: &SceneGraph) -> HashMap<HumanBone, NodeId> {
    let mut out = HashMap::new();
    let Some(bones) = vrm
        .get("humanoid")
        .and_then(|h| h.get("humanBones"))
        .and_then(Value::as_object)
    else {
        return out;
    };
    for (name, bone) in bones {
        if let (Some(kind), Some(node)) = (HumanBone::from_name(name), node_ref(bone.get("node"), graph)) {
            out.insert(kind, node);
        }
    }
    out
}

fn parse_vrm1_springs(ext: &Value, graph: &SceneGraph) -> Vec<SpringChain> {
    ext.get("springs")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|spring| SpringChain {
            joints: spring
                .get("joints")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|joint| {
                    let defaults = SpringParams::default();
                    Some(SpringJoint {
                        node: node_ref(joint.get("node"), graph)?,
                        params: SpringParams {
                            stiffness: joint
                                .get("stiffness")
                                .and_then(Value::as_f64)
                                .map_or(defaults.stiffness, |v| v as f32),
                            drag: joint
                                .get("dragForce")
                                .and_then(Value::as_f64)
                                .map_or(defaults.drag, |v| v as f32),
                            gravity_power: joint
                                .get("gravityPower")
                                .and_then(Value::as_f64)
                                .map_or(defaults.gravity_power, |v| v as f32),
                            gravity_dir: vec3(joint.get("gravityDir"), defaults.gravity_dir),
                        },
                    })
                })
                .collect(),
        })
        .filter(|chain| !chain.joints.is_empty())
        .collect()
}

/// VRM 0.x preset names mapped onto the 1.0 vocabulary.
fn vrm0_preset_name(preset: &str) -> Option<&'static str> {
    Some(match preset {
        "joy" => "happy",
        "angry" => "angry",
        "sorrow" => "sad",
        "fun" => "relaxed",
        "surprised" => "surprised",
        "neutral" => "neutral",
        "blink" => "blink",
        "blink_l" => "blinkLeft",
        "blink_r" => "blinkRight",
        "a" => "aa",
        "i" => "ih",
        "u" => "ou",
        "e" => "ee",
        "o" => "oh",
        "lookup" => "lookUp",
        "lookdown" => "lookDown",
        "lookleft" => "lookLeft",
        "lookright" => "lookRight",
        _ => return None,
    })
}

fn parse_vrm0_expressions(
    vrm: &Value,
    root: &Value,
    graph: &SceneGraph,
) -> HashMap<String, ExpressionDef> {
    // 0.x binds reference meshes, not nodes.
    let mut mesh_to_node: HashMap<usize, NodeId> = HashMap::new();
    if let Some(nodes) = root.get("nodes").and_then(Value::as_array) {
        for (i, node) in nodes.iter().enumerate() {
            if let Some(mesh) = index(node.get("mesh")) {
                mesh_to_node.entry(mesh).or_insert(NodeId(i));
            }
        }
    }

    let mut out = HashMap::new();
    let groups = vrm
        .get("blendShapeMaster")
        .and_then(|m| m.get("blendShapeGroups"))
        .and_then(Value::as_array);
    for group in groups.into_iter().flatten() {
        let preset = group
            .get("presetName")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let name = match vrm0_preset_name(preset) {
            Some(mapped) => mapped.to_string(),
            None => match group.get("name").and_then(Value::as_str) {
                Some(custom) => custom.to_string(),
                None => continue,
            },
        };
        let binds = group
            .get("binds")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|bind| {
                let node = *mesh_to_node.get(&index(bind.get("mesh"))?)?;
                let _ = graph.get(node)?;
                Some(MorphBind {
                    node,
                    index: index(bind.get("index"))?,
                    weight: bind.get("weight").and_then(Value::as_f64).unwrap_or(100.0) as f32
                        / 100.0,
                })
            })
            .collect();
        out.insert(
            name.clone(),
            ExpressionDef {
                name,
                binds,
                is_binary: group.get("isBinary").and_then(Value::as_bool).unwrap_or(false),
            },
        );
    }
    out
}

fn parse_vrm0_bones(vrm: &Value, graph: &SceneGraph) -> HashMap<HumanBone, NodeId> {
    let mut out = HashMap::new();
    let bones = vrm
        .get("humanoid")
        .and_then(|h| h.get("humanBones"))
        .and_then(Value::as_array);
    for bone in bones.into_iter().flatten() {
        let kind = bone.get("bone").and_then(Value::as_str).and_then(HumanBone::from_name);
        if let (Some(kind), Some(node)) = (kind, node_ref(bone.get("node"), graph)) {
            out.insert(kind, node);
        }
    }
    out
}

fn parse_vrm0_springs(vrm: &Value, graph: &SceneGraph) -> Vec<SpringChain> {
    let mut chains = Vec::new();
    let groups = vrm
        .get("secondaryAnimation")
        .and_then(|s| s.get("boneGroups"))
        .and_then(Value::as_array);
    for group in groups.into_iter().flatten() {
        let get = |key: &str| group.get(key).and_then(Value::as_f64).map(|v| v as f32);
        let params = SpringParams {
            // The 0.x schema spells it this way.
            stiffness: get("stiffiness").unwrap_or(1.0),
            drag: get("dragForce").unwrap_or(0.4),
            gravity_power: get("gravityPower").unwrap_or(0.0),
            gravity_dir: group
                .get("gravityDir")
                .map(|d| {
                    let axis = |k: &str| d.get(k).and_then(Value::as_f64).unwrap_or(0.0) as f32;
                    Vec3::new(axis("x"), axis("y"), axis("z"))
                })
                .unwrap_or(Vec3::NEG_Y),
        };
        let roots = group.get("bones").and_then(Value::as_array);
        for root in roots.into_iter().flatten() {
            let Some(mut current) = node_ref(Some(root), graph) else {
                continue;
            };
            let mut chain = SpringChain::default();
            loop {
                chain.joints.push(SpringJoint {
                    node: current,
                    params,
                });
                match graph.get(current).and_then(|n| n.children.first()) {
                    Some(next) => current = *next,
                    None => break,
                }
            }
            chains.push(chain);
        }
    }
    chains
}
