pub mod blink;
pub mod controller;
pub mod expression;
pub mod frame_queue;
pub mod look_at;
mod plugin;
pub mod rig;
pub mod spring;

pub use blink::{AutoBlink, BlinkState};
pub use controller::{
    AnimationController, AnimationError, ClipEvent, ClipPose, PlayOptions, DEFAULT_FADE,
    SPRING_RESET_FRAME_DELAY,
};
pub use plugin::{
    AvatarBindings, AvatarClipEvent, AvatarClipHandles, AvatarPlugin, AvatarRoot, AvatarSettings,
    LookTarget,
};
pub use rig::{HumanoidRig, RigParseError};

#[cfg(test)]
mod tests;
