use std::collections::BTreeSet;

use bevy::ecs::resource::Resource;
use thiserror::Error;
use tracing::{debug, error};

/// GPU-side resources owned by the compositor, in release order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    OffscreenTarget,
    BackdropQuad,
    SkyBackdrop,
    OrbitController,
    PointCloudViewer,
    EnvironmentScene,
    HumanoidScene,
    RenderContext,
}

impl ResourceKind {
    pub const RELEASE_ORDER: [ResourceKind; 8] = [
        ResourceKind::OffscreenTarget,
        ResourceKind::BackdropQuad,
        ResourceKind::SkyBackdrop,
        ResourceKind::OrbitController,
        ResourceKind::PointCloudViewer,
        ResourceKind::EnvironmentScene,
        ResourceKind::HumanoidScene,
        ResourceKind::RenderContext,
    ];

    /// Resources that must be gone before `self` can be released.
    fn dependents(self) -> &'static [ResourceKind] {
        match self {
            ResourceKind::RenderContext => &[
                ResourceKind::OffscreenTarget,
                ResourceKind::BackdropQuad,
                ResourceKind::SkyBackdrop,
                ResourceKind::OrbitController,
                ResourceKind::PointCloudViewer,
                ResourceKind::EnvironmentScene,
                ResourceKind::HumanoidScene,
            ],
            ResourceKind::EnvironmentScene => {
                &[ResourceKind::SkyBackdrop, ResourceKind::PointCloudViewer]
            }
            ResourceKind::HumanoidScene => &[ResourceKind::BackdropQuad],
            _ => &[],
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TeardownError {
    #[error("render context released while {live:?} still alive")]
    ContextHasDependents { live: Vec<ResourceKind> },
    #[error("{kind:?} released while {live:?} still alive")]
    HasDependents {
        kind: ResourceKind,
        live: Vec<ResourceKind>,
    },
    #[error("{0:?} is not live")]
    NotLive(ResourceKind),
}

#[derive(Resource, Debug, Clone, Default)]
pub struct TeardownLedger {
    live: BTreeSet<ResourceKind>,
}

impl TeardownLedger {
    pub fn acquire(&mut self, kind: ResourceKind) {
        self.live.insert(kind);
    }

    pub fn is_live(&self, kind: ResourceKind) -> bool {
        self.live.contains(&kind)
    }

    pub fn live(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.live.iter().copied()
    }

    pub fn release(&mut self, kind: ResourceKind) -> Result<(), TeardownError> {
        if !self.live.contains(&kind) {
            return Err(TeardownError::NotLive(kind));
        }
        let live: Vec<ResourceKind> = kind
            .dependents()
            .iter()
            .copied()
            .filter(|d| self.live.contains(d))
            .collect();
        if !live.is_empty() {
            error!(?kind, ?live, "refusing out-of-order release");
            return Err(match kind {
                ResourceKind::RenderContext => TeardownError::ContextHasDependents { live },
                _ => TeardownError::HasDependents { kind, live },
            });
        }
        self.live.remove(&kind);
        debug!(?kind, "released");
        Ok(())
    }

    /// Releases everything live in dependency order and returns what was
    /// released.
    pub fn release_all(&mut self) -> Vec<ResourceKind> {
        let mut released = Vec::new();
        for kind in ResourceKind::RELEASE_ORDER {
            if self.live.contains(&kind) && self.release(kind).is_ok() {
                released.push(kind);
            }
        }
        released
    }
}
