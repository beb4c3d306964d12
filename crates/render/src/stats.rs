use prism_arena::ArenaStats;
use std::time::Duration;

/// What one frame did. Rebuilt from scratch every frame.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub frame: u64,
    /// Nodes whose global transform was recomputed.
    pub transforms_updated: usize,
    pub layers: usize,
    pub offscreen_layers: usize,
    pub models: usize,
    pub lights: usize,
    pub draw_calls: usize,
    pub renderable_images: usize,
    /// Distinct shader keys used this frame.
    pub shader_keys: usize,
    pub texts_rasterized: usize,
    pub effects_applied: usize,
    /// Models skipped because their mesh is not resident yet.
    pub meshes_pending: usize,
    /// Image paths handed to the loader this frame.
    pub images_requested: usize,
    /// Image completions drained at the start of the frame.
    pub images_completed: usize,
    pub arena: ArenaStats,
    pub frame_time: Duration,
}

/// Rolling window of frame times.
#[derive(Debug)]
pub struct FrameTimer {
    samples: Vec<Duration>,
    next: usize,
    wrapped: bool,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![Duration::ZERO; capacity.max(1)],
            next: 0,
            wrapped: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.samples[self.next] = dt;
        self.next = (self.next + 1) % self.samples.len();
        self.wrapped |= self.next == 0;
    }

    fn window(&self) -> &[Duration] {
        if self.wrapped {
            &self.samples
        } else {
            &self.samples[..self.next]
        }
    }

    pub fn count(&self) -> usize {
        self.window().len()
    }

    pub fn average(&self) -> Duration {
        let window = self.window();
        if window.is_empty() {
            return Duration::ZERO;
        }
        window.iter().sum::<Duration>() / window.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.window().iter().copied().max().unwrap_or_default()
    }

    pub fn min(&self) -> Duration {
        self.window().iter().copied().min().unwrap_or_default()
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<Duration> {
        if self.count() == 0 {
            return None;
        }
        let index = (self.next + self.samples.len() - 1) % self.samples.len();
        Some(self.samples[index])
    }
}
