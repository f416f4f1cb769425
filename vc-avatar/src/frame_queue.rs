/// Actions that fire after a number of frame boundaries. `tick` is called
/// once per rendered frame.
#[derive(Debug, Clone)]
pub struct FrameQueue<T> {
    entries: Vec<(u32, T)>,
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> FrameQueue<T> {
    /// `frames == 0` fires on the next tick.
    pub fn schedule(&mut self, frames: u32, action: T) {
        self.entries.push((frames.max(1), action));
    }

    /// Counts one frame boundary and returns the actions that are now due,
    /// in scheduling order.
    pub fn tick(&mut self) -> Vec<T> {
        let mut due = Vec::new();
        let mut pending = Vec::with_capacity(self.entries.len());
        for (frames, action) in self.entries.drain(..) {
            if frames <= 1 {
                due.push(action);
            } else {
                pending.push((frames - 1, action));
            }
        }
        self.entries = pending;
        due
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
