//! What the embedding host sees: a single load percentage, lifecycle
//! events, and the pause/resume/repaint commands.

use bevy::prelude::*;
use tracing::{info, warn};
use vc_render::Compositor;
use vc_utils::{HostCommand, HostState};

use crate::loader::{LoadCompleted, LoadFailed, LoadProgressed};
use crate::progress::ProgressAggregator;

#[derive(Event, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Loading(u8),
    Loaded,
    Ready,
    Error(String),
}

#[derive(Resource, Debug, Default)]
pub struct LoadProgress {
    aggregator: ProgressAggregator,
    loaded: bool,
    ready: bool,
    failed: bool,
}

impl LoadProgress {
    /// Visible percentage, 0-100, never decreasing.
    pub fn get_load_progress(&self) -> u8 {
        self.aggregator.visible()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn on_asset_progress(&mut self, percent: u8) {
        self.aggregator.set_asset_percent(percent);
    }

    pub fn on_loaded(&mut self) -> Option<LifecycleEvent> {
        if self.loaded || self.failed {
            return None;
        }
        self.loaded = true;
        self.aggregator.set_asset_percent(100);
        Some(LifecycleEvent::Loaded)
    }

    pub fn on_failed(&mut self, message: impl Into<String>) -> Option<LifecycleEvent> {
        if self.failed || self.ready {
            return None;
        }
        self.failed = true;
        Some(LifecycleEvent::Error(message.into()))
    }

    /// Advances the aggregate at `now`. `environment_painted` reports
    /// whether the environment pass has drawn at least once.
    pub fn tick(&mut self, now: f64, environment_painted: bool) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        if self.failed {
            return events;
        }
        if self.loaded && environment_painted {
            self.aggregator.mark_first_paint(now);
        }
        if let Some(percent) = self.aggregator.update(now) {
            events.push(LifecycleEvent::Loading(percent));
        }
        if !self.ready && self.aggregator.is_ready() {
            self.ready = true;
            events.push(LifecycleEvent::Ready);
        }
        events
    }
}

pub(crate) fn track_lifecycle(
    time: Res<Time<Real>>,
    compositor: Res<Compositor>,
    mut progress: ResMut<LoadProgress>,
    mut progressed: EventReader<LoadProgressed>,
    mut completed: EventReader<LoadCompleted>,
    mut failed: EventReader<LoadFailed>,
    mut lifecycle: EventWriter<LifecycleEvent>,
) {
    for LoadProgressed(percent) in progressed.read() {
        progress.on_asset_progress(*percent);
    }
    if completed.read().last().is_some()
        && let Some(event) = progress.on_loaded()
    {
        info!("assets loaded");
        lifecycle.write(event);
    }
    if let Some(LoadFailed(failure)) = failed.read().last()
        && let Some(event) = progress.on_failed(failure.to_string())
    {
        warn!(resource = ?failure.resource, "load failed: {failure}");
        lifecycle.write(event);
    }

    let now = time.elapsed_secs_f64();
    for event in progress.tick(now, compositor.has_painted_environment()) {
        if event == LifecycleEvent::Ready {
            info!("companion ready");
        }
        lifecycle.write(event);
    }
}

pub(crate) fn host_hotkeys(
    keys: Res<ButtonInput<KeyCode>>,
    mut host: ResMut<HostState>,
    mut commands: EventWriter<HostCommand>,
) {
    if keys.just_pressed(KeyCode::F3) {
        host.debug_open = !host.debug_open;
    }
    if keys.just_pressed(KeyCode::F5) {
        commands.write(HostCommand::ForceBackgroundRepaint);
    }
    if keys.just_pressed(KeyCode::Pause) {
        commands.write(if host.paused {
            HostCommand::Resume
        } else {
            HostCommand::Pause
        });
    }
}
