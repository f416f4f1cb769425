use std::f32::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const BLINK_MIN_INTERVAL: f32 = 2.0;
pub const BLINK_MAX_INTERVAL: f32 = 6.0;
pub const DEFAULT_BLINK_DURATION: f32 = 0.15;
/// Channels written together on every blink frame.
pub const BLINK_CHANNELS: [&str; 3] = ["blink", "blinkLeft", "blinkRight"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlinkState {
    Idle { timer: f32, next_blink_at: f32 },
    /// `progress` is seconds elapsed since the blink started.
    Blinking { progress: f32 },
}

/// Half-sine lid curve: 0 at both ends, 1 at the midpoint.
pub fn blink_curve(progress: f32, duration: f32) -> f32 {
    if duration <= 0.0 || progress <= 0.0 || progress >= duration {
        return 0.0;
    }
    (progress / duration * PI).sin().clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct AutoBlink {
    state: BlinkState,
    enabled: bool,
    duration: f32,
    rng: StdRng,
}

impl Default for AutoBlink {
    fn default() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl AutoBlink {
    pub fn with_rng(mut rng: StdRng) -> Self {
        let next_blink_at = rng.gen_range(BLINK_MIN_INTERVAL..=BLINK_MAX_INTERVAL);
        Self {
            state: BlinkState::Idle {
                timer: 0.0,
                next_blink_at,
            },
            enabled: true,
            duration: DEFAULT_BLINK_DURATION,
            rng,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn state(&self) -> BlinkState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: f32) {
        self.duration = duration.max(0.01);
    }

    /// Disabling halts the timer; the caller zeroes the channels.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.state = BlinkState::Idle {
            timer: 0.0,
            next_blink_at: self.next_interval(),
        };
    }

    fn next_interval(&mut self) -> f32 {
        self.rng.gen_range(BLINK_MIN_INTERVAL..=BLINK_MAX_INTERVAL)
    }

    /// Advances by `delta` seconds. Returns the value to write to the blink
    /// channels, or `None` when nothing needs writing this frame.
    pub fn advance(&mut self, delta: f32) -> Option<f32> {
        if !self.enabled {
            return None;
        }
        match self.state {
            BlinkState::Idle {
                timer,
                next_blink_at,
            } => {
                let timer = timer + delta;
                if timer >= next_blink_at {
                    let progress = timer - next_blink_at;
                    self.state = BlinkState::Blinking { progress };
                    Some(blink_curve(progress, self.duration))
                } else {
                    self.state = BlinkState::Idle {
                        timer,
                        next_blink_at,
                    };
                    None
                }
            }
            BlinkState::Blinking { progress } => {
                let progress = progress + delta;
                if progress >= self.duration {
                    // Any overshoot counts towards the next interval.
                    let timer = progress - self.duration;
                    self.state = BlinkState::Idle {
                        timer,
                        next_blink_at: self.next_interval(),
                    };
                    Some(0.0)
                } else {
                    self.state = BlinkState::Blinking { progress };
                    Some(blink_curve(progress, self.duration))
                }
            }
        }
    }
}
