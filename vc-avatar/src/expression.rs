use std::collections::HashMap;

use crate::rig::{HumanoidRig, NodeId};

/// The emotion channels whose sum drives `neutral`.
pub const EMOTION_CHANNELS: [&str; 5] = ["happy", "angry", "sad", "relaxed", "surprised"];
pub const NEUTRAL_CHANNEL: &str = "neutral";

/// Current expression values. Channels that were never written, or that the
/// rig does not define, read as 0.
#[derive(Debug, Clone, Default)]
pub struct ExpressionSet {
    values: HashMap<String, f32>,
}

impl ExpressionSet {
    pub fn get(&self, name: &str) -> f32 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, name: &str, value: f32) {
        let value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        match self.values.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.values.insert(name.to_string(), value);
            }
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// `neutral` is never an input: it is always `1 - sum(emotions)`,
    /// floored at zero.
    pub fn recompute_neutral(&mut self) -> f32 {
        let neutral = derive_neutral(EMOTION_CHANNELS.map(|name| self.get(name)));
        self.values.insert(NEUTRAL_CHANNEL.to_string(), neutral);
        neutral
    }

    /// Folds the expression values into per-node morph weights using the
    /// rig's bind table. Weights are clamped to 1.
    pub fn morph_weights(&self, rig: &HumanoidRig) -> Vec<(NodeId, Vec<f32>)> {
        let mut per_node: HashMap<NodeId, Vec<f32>> = HashMap::new();
        for (name, def) in &rig.expressions {
            let value = self.get(name);
            for bind in &def.binds {
                let Some(node) = rig.graph.get(bind.node) else {
                    continue;
                };
                let weights = per_node
                    .entry(bind.node)
                    .or_insert_with(|| vec![0.0; node.morph_target_count]);
                if let Some(slot) = weights.get_mut(bind.index) {
                    let effective = if def.is_binary {
                        if value > 0.5 { 1.0 } else { 0.0 }
                    } else {
                        value
                    };
                    *slot = (*slot + effective * bind.weight).min(1.0);
                }
            }
        }
        let mut out: Vec<_> = per_node.into_iter().collect();
        out.sort_by_key(|(node, _)| *node);
        out
    }
}

pub fn derive_neutral(emotions: [f32; 5]) -> f32 {
    (1.0 - emotions.iter().sum::<f32>()).max(0.0)
}
