use bevy::prelude::*;
use bevy_egui::{EguiContexts, egui};
use vc_avatar::{AnimationController, BlinkState};
use vc_render::Compositor;
use vc_utils::{FrameTick, HostState};

use crate::host::LoadProgress;
use crate::loader::AssetPreloader;

pub(crate) fn debug_overlay(
    mut contexts: EguiContexts,
    host: Res<HostState>,
    assets: Res<AssetPreloader>,
    progress: Res<LoadProgress>,
    compositor: Res<Compositor>,
    tick: Res<FrameTick>,
    controller: Res<AnimationController>,
) {
    if !host.debug_open {
        return;
    }
    let Ok(ctx) = contexts.ctx_mut() else {
        return;
    };

    egui::Window::new("Companion")
        .resizable(false)
        .anchor(egui::Align2::RIGHT_TOP, egui::Vec2::new(-8.0, 8.0))
        .show(ctx, |ui| {
            ui.label(format!(
                "load: {} ({}%)",
                assets.status().label(),
                assets.percent()
            ));
            let (loaded, total) = assets.bytes();
            match total {
                Some(total) => ui.label(format!("bytes: {loaded} / {total}")),
                None => ui.label(format!("bytes: {loaded} / ?")),
            };
            if let Some(failure) = assets.failure() {
                ui.colored_label(egui::Color32::LIGHT_RED, failure.to_string());
            }
            ui.label(format!("visible progress: {}%", progress.get_load_progress()));

            ui.separator();
            let stats = compositor.stats();
            ui.label(format!("frame: {} (dt {:.1} ms)", tick.frame, tick.delta * 1000.0));
            ui.label(format!("environment repaints: {}", stats.environment_repaints));
            ui.label(format!("environment skipped: {}", stats.environment_skipped));
            ui.label(format!("suspended frames: {}", stats.suspended_frames));
            ui.label(format!(
                "settle frames left: {}",
                compositor.settle_frames_remaining()
            ));
            if host.is_suspended() {
                ui.label(if host.hidden { "hidden" } else { "paused" });
            }

            ui.separator();
            ui.label(format!(
                "clip: {}",
                controller.active_clip().unwrap_or("none")
            ));
            let blink = match controller.blink().state() {
                _ if !controller.blink().is_enabled() => "off".to_string(),
                BlinkState::Idle {
                    timer,
                    next_blink_at,
                } => format!("idle, next in {:.1}s", (next_blink_at - timer).max(0.0)),
                BlinkState::Blinking { progress } => format!("blinking ({progress:.2}s)"),
            };
            ui.label(format!("blink: {blink}"));
        });
}
