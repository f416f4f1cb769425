//! Combines asset bytes, the first environment paint and a settle delay
//! into one visible percentage that never goes down.

/// Share of the bar driven by asset bytes and decodes.
pub const ASSET_WEIGHT: f32 = 80.0;
/// Share that fills while the first environment paint fades in.
pub const FIRST_PAINT_WEIGHT: f32 = 10.0;
pub const SETTLE_WEIGHT: f32 = 10.0;
pub const FIRST_PAINT_SECS: f64 = 1.0;
/// Counted from the end of the first-paint phase.
pub const SETTLE_SECS: f64 = 1.5;

#[derive(Debug, Clone, Default)]
pub struct ProgressAggregator {
    asset_percent: u8,
    first_paint_at: Option<f64>,
    visible: u8,
}

impl ProgressAggregator {
    pub fn set_asset_percent(&mut self, percent: u8) {
        self.asset_percent = percent.min(100);
    }

    /// Only the first call counts.
    pub fn mark_first_paint(&mut self, now: f64) {
        if self.first_paint_at.is_none() {
            self.first_paint_at = Some(now);
        }
    }

    pub fn has_first_paint(&self) -> bool {
        self.first_paint_at.is_some()
    }

    /// Recomputes the visible value at `now` and returns it when it grew.
    pub fn update(&mut self, now: f64) -> Option<u8> {
        let raw = self.raw_percent(now);
        if raw > self.visible {
            self.visible = raw;
            Some(raw)
        } else {
            None
        }
    }

    pub fn visible(&self) -> u8 {
        self.visible
    }

    pub fn is_ready(&self) -> bool {
        self.visible >= 100
    }

    fn raw_percent(&self, now: f64) -> u8 {
        let assets = ASSET_WEIGHT * f32::from(self.asset_percent) / 100.0;
        let (paint, settle) = match self.first_paint_at {
            Some(start) => {
                let elapsed = (now - start).max(0.0);
                let paint = (elapsed / FIRST_PAINT_SECS).min(1.0);
                let settle = ((elapsed - FIRST_PAINT_SECS) / SETTLE_SECS).clamp(0.0, 1.0);
                (paint as f32, settle as f32)
            }
            None => (0.0, 0.0),
        };
        let total = assets + FIRST_PAINT_WEIGHT * paint + SETTLE_WEIGHT * settle;
        // Floor so 100 is only reported once every phase is actually done.
        (total.floor() as u8).min(100)
    }
}

#[cfg(test)]
mod tests;
