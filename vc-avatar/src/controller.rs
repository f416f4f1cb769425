//! Clip playback, crossfades, blink and secondary-physics scheduling for one
//! attached humanoid rig.

use std::collections::HashMap;

use bevy::ecs::resource::Resource;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::blink::{AutoBlink, BLINK_CHANNELS};
use crate::expression::ExpressionSet;
use crate::frame_queue::FrameQueue;
use crate::look_at::LookAt;
use crate::rig::HumanoidRig;
use crate::spring::SpringBoneSolver;

pub const DEFAULT_FADE: f32 = 0.5;
/// Frames between a hard cut and the spring reset that follows it. The pose
/// has to be applied at least once before the reset is meaningful.
pub const SPRING_RESET_FRAME_DELAY: u32 = 2;
/// Frame deltas above this reset the springs immediately.
pub const LARGE_DELTA_RESET: f32 = 0.5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnimationError {
    #[error("no humanoid rig attached")]
    NoRig,
    #[error("unknown animation clip `{0}`")]
    UnknownClip(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayOptions {
    pub looping: bool,
    /// Crossfade duration in seconds, `None` for [`DEFAULT_FADE`].
    pub fade: Option<f32>,
    pub reset_physics: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            looping: true,
            fade: None,
            reset_physics: false,
        }
    }
}

impl PlayOptions {
    pub fn once() -> Self {
        Self {
            looping: false,
            ..Self::default()
        }
    }

    pub fn looped() -> Self {
        Self::default()
    }

    pub fn with_fade(mut self, fade: f32) -> Self {
        self.fade = Some(fade);
        self
    }

    pub fn with_physics_reset(mut self) -> Self {
        self.reset_physics = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClipEvent {
    Finished { clip: String },
    Looped { clip: String, iteration: u32 },
}

/// What the render layer needs to pose one clip this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPose {
    pub name: String,
    pub time: f32,
    pub weight: f32,
}

#[derive(Debug, Clone, Copy)]
struct Fade {
    from: f32,
    to: f32,
    elapsed: f32,
    duration: f32,
}

#[derive(Debug, Clone)]
struct ClipAction {
    duration: f32,
    time: f32,
    weight: f32,
    fade: Option<Fade>,
    looping: bool,
    running: bool,
    /// One-shot finished and holding its last frame.
    holding: bool,
    iteration: u32,
}

impl ClipAction {
    fn new(duration: f32) -> Self {
        Self {
            duration: duration.max(0.0),
            time: 0.0,
            weight: 0.0,
            fade: None,
            looping: true,
            running: false,
            holding: false,
            iteration: 0,
        }
    }

    fn stop(&mut self) {
        self.running = false;
        self.holding = false;
        self.weight = 0.0;
        self.fade = None;
        self.time = 0.0;
    }

    fn is_contributing(&self) -> bool {
        (self.running || self.holding) && self.weight > 0.0
    }

    fn fade_to(&mut self, to: f32, duration: f32) {
        self.fade = Some(Fade {
            from: self.weight,
            to,
            elapsed: 0.0,
            duration,
        });
    }

    fn step_fade(&mut self, delta: f32) {
        let Some(mut fade) = self.fade else {
            return;
        };
        fade.elapsed += delta;
        if fade.elapsed >= fade.duration {
            self.weight = fade.to;
            self.fade = None;
            if fade.to <= 0.0 {
                self.stop();
            }
        } else {
            let t = fade.elapsed / fade.duration;
            self.weight = fade.from + (fade.to - fade.from) * t;
            self.fade = Some(fade);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    SpringReset,
}

struct AttachedRig {
    rig: HumanoidRig,
    clips: HashMap<String, ClipAction>,
    springs: SpringBoneSolver,
}

type FinishedListener = Box<dyn FnMut(&str) + Send + Sync>;
type LoopListener = Box<dyn FnMut(&str, u32) + Send + Sync>;

#[derive(Resource)]
pub struct AnimationController {
    attached: Option<AttachedRig>,
    active: Option<String>,
    paused: bool,
    blink: AutoBlink,
    expressions: ExpressionSet,
    look_at: LookAt,
    deferred: FrameQueue<Deferred>,
    on_finished: Vec<FinishedListener>,
    on_loop: Vec<LoopListener>,
}

impl Default for AnimationController {
    fn default() -> Self {
        Self::new(AutoBlink::default())
    }
}

impl AnimationController {
    pub fn new(blink: AutoBlink) -> Self {
        Self {
            attached: None,
            active: None,
            paused: false,
            blink,
            expressions: ExpressionSet::default(),
            look_at: LookAt::default(),
            deferred: FrameQueue::default(),
            on_finished: Vec::new(),
            on_loop: Vec::new(),
        }
    }

    pub fn has_rig(&self) -> bool {
        self.attached.is_some()
    }

    pub fn rig(&self) -> Option<&HumanoidRig> {
        self.attached.as_ref().map(|a| &a.rig)
    }

    /// Attaches `rig`, detaching any previous one first. The previous rig is
    /// returned so the caller can release the GPU state built from it.
    pub fn set_rig(&mut self, rig: HumanoidRig) -> Option<HumanoidRig> {
        let previous = self.detach_rig();
        info!(
            nodes = rig.graph.len(),
            expressions = rig.expressions.len(),
            springs = rig.springs.len(),
            "humanoid rig attached"
        );
        let springs = SpringBoneSolver::from_rig(&rig);
        self.attached = Some(AttachedRig {
            rig,
            clips: HashMap::new(),
            springs,
        });
        previous
    }

    pub fn detach_rig(&mut self) -> Option<HumanoidRig> {
        let mut attached = self.attached.take()?;
        for clip in attached.clips.values_mut() {
            clip.stop();
        }
        self.active = None;
        self.deferred.clear();
        self.expressions.clear();
        self.look_at.clear_target();
        debug!("humanoid rig detached");
        Some(attached.rig)
    }

    /// Registers a clip by name. Re-registering a name stops and replaces
    /// the previous clip.
    pub fn register_clip(&mut self, name: &str, duration: f32) -> Result<(), AnimationError> {
        let attached = self.attached.as_mut().ok_or(AnimationError::NoRig)?;
        if attached
            .clips
            .insert(name.to_string(), ClipAction::new(duration))
            .is_some()
        {
            debug!(clip = name, "replaced animation clip");
            if self.active.as_deref() == Some(name) {
                self.active = None;
            }
        }
        Ok(())
    }

    pub fn unregister_clip(&mut self, name: &str) -> bool {
        let Some(attached) = self.attached.as_mut() else {
            return false;
        };
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
        attached.clips.remove(name).is_some()
    }

    pub fn has_clip(&self, name: &str) -> bool {
        self.attached
            .as_ref()
            .is_some_and(|a| a.clips.contains_key(name))
    }

    pub fn active_clip(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Starts `name`, crossfading from the current clip. Returns `Ok(false)`
    /// when `name` is already the active clip and nothing changed.
    pub fn play(&mut self, name: &str, options: PlayOptions) -> Result<bool, AnimationError> {
        let attached = self.attached.as_mut().ok_or(AnimationError::NoRig)?;
        if !attached.clips.contains_key(name) {
            return Err(AnimationError::UnknownClip(name.to_string()));
        }
        if self.active.as_deref() == Some(name) {
            return Ok(false);
        }

        let fade = options.fade.unwrap_or(DEFAULT_FADE).max(0.0);
        let previous = self.active.take();
        let crossfading = fade > 0.0
            && attached
                .clips
                .iter()
                .any(|(clip_name, clip)| clip_name != name && clip.is_contributing());

        if crossfading {
            for (clip_name, clip) in attached.clips.iter_mut() {
                if clip_name != name && clip.is_contributing() {
                    clip.fade_to(0.0, fade);
                }
            }
        } else {
            for (clip_name, clip) in attached.clips.iter_mut() {
                if clip_name != name {
                    clip.stop();
                }
            }
        }

        let Some(clip) = attached.clips.get_mut(name) else {
            return Err(AnimationError::UnknownClip(name.to_string()));
        };
        let from_weight = if crossfading {
            clip.weight.min(1.0)
        } else {
            1.0
        };
        clip.time = 0.0;
        clip.iteration = 0;
        clip.looping = options.looping;
        clip.running = true;
        clip.holding = false;
        clip.weight = from_weight;
        clip.fade = None;
        if from_weight < 1.0 {
            clip.fade_to(1.0, fade);
        }
        self.active = Some(name.to_string());

        if fade <= 0.0 || options.reset_physics {
            self.deferred
                .schedule(SPRING_RESET_FRAME_DELAY, Deferred::SpringReset);
        }
        debug!(clip = name, from = ?previous, fade, looping = options.looping, "play");
        Ok(true)
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn on_finished(&mut self, listener: impl FnMut(&str) + Send + Sync + 'static) {
        self.on_finished.push(Box::new(listener));
    }

    pub fn on_loop(&mut self, listener: impl FnMut(&str, u32) + Send + Sync + 'static) {
        self.on_loop.push(Box::new(listener));
    }

    pub fn blink(&self) -> &AutoBlink {
        &self.blink
    }

    /// Disabling zeroes the blink channels immediately.
    pub fn set_auto_blink(&mut self, enabled: bool) {
        self.blink.set_enabled(enabled);
        if !enabled {
            for channel in BLINK_CHANNELS {
                self.expressions.set(channel, 0.0);
            }
        }
    }

    pub fn expressions(&self) -> &ExpressionSet {
        &self.expressions
    }

    pub fn set_expression(&mut self, name: &str, value: f32) {
        self.expressions.set(name, value);
    }

    pub fn look_at(&self) -> &LookAt {
        &self.look_at
    }

    pub fn look_at_mut(&mut self) -> &mut LookAt {
        &mut self.look_at
    }

    pub fn springs_mut(&mut self) -> Option<&mut SpringBoneSolver> {
        self.attached.as_mut().map(|a| &mut a.springs)
    }

    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Weighted clips that currently influence the pose.
    pub fn clip_poses(&self) -> Vec<ClipPose> {
        let Some(attached) = &self.attached else {
            return Vec::new();
        };
        let mut poses: Vec<ClipPose> = attached
            .clips
            .iter()
            .filter(|(_, clip)| clip.is_contributing())
            .map(|(name, clip)| ClipPose {
                name: name.clone(),
                time: clip.time,
                weight: clip.weight,
            })
            .collect();
        poses.sort_by(|a, b| a.name.cmp(&b.name));
        poses
    }

    pub fn total_weight(&self) -> f32 {
        self.clip_poses().iter().map(|p| p.weight).sum()
    }

    pub fn update(&mut self, delta: f32) -> Vec<ClipEvent> {
        if self.attached.is_none() {
            return Vec::new();
        }
        let delta = delta.max(0.0);

        if let Some(value) = self.blink.advance(delta) {
            for channel in BLINK_CHANNELS {
                self.expressions.set(channel, value);
            }
        }

        if delta > LARGE_DELTA_RESET {
            warn!(delta, "large frame delta, resetting spring bones");
            if let Some(springs) = self.springs_mut() {
                springs.reset();
            }
        }

        let mixer_delta = if self.paused { 0.0 } else { delta };
        let events = self.step_mixer(mixer_delta);

        self.expressions.recompute_neutral();

        for action in self.deferred.tick() {
            match action {
                Deferred::SpringReset => {
                    if let Some(springs) = self.springs_mut() {
                        springs.reset();
                    }
                }
            }
        }
        self.look_at.update(delta);

        for event in &events {
            match event {
                ClipEvent::Finished { clip } => {
                    for listener in &mut self.on_finished {
                        listener(clip);
                    }
                }
                ClipEvent::Looped { clip, iteration } => {
                    for listener in &mut self.on_loop {
                        listener(clip, *iteration);
                    }
                }
            }
        }
        events
    }

    fn step_mixer(&mut self, delta: f32) -> Vec<ClipEvent> {
        let mut events = Vec::new();
        let Some(attached) = self.attached.as_mut() else {
            return events;
        };
        let mut names: Vec<&String> = attached.clips.keys().collect();
        names.sort();
        let names: Vec<String> = names.into_iter().cloned().collect();

        for name in names {
            let Some(clip) = attached.clips.get_mut(&name) else {
                continue;
            };
            if !clip.running {
                if clip.holding {
                    clip.step_fade(delta);
                }
                continue;
            }
            clip.step_fade(delta);
            if !clip.running {
                continue;
            }
            clip.time += delta;
            if clip.time < clip.duration {
                continue;
            }
            if clip.looping && clip.duration > 0.0 {
                while clip.time >= clip.duration {
                    clip.time -= clip.duration;
                    clip.iteration += 1;
                    events.push(ClipEvent::Looped {
                        clip: name.clone(),
                        iteration: clip.iteration,
                    });
                }
            } else {
                clip.time = clip.duration;
                clip.running = false;
                clip.holding = true;
                if self.active.as_deref() == Some(name.as_str()) {
                    self.active = None;
                }
                events.push(ClipEvent::Finished { clip: name.clone() });
            }
        }
        events
    }
}
