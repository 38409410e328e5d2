//! Converts irregular render-thread call spacing into a fixed output frame rate.

/// Accumulates elapsed time and reports how many output frames came due.
#[derive(Debug, Clone)]
pub struct Pacing {
    frame_period: f64,
    accumulated: f64,
}

impl Pacing {
    pub fn new(target_fps: u32) -> Self {
        Self {
            frame_period: 1.0 / f64::from(target_fps.max(1)),
            accumulated: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.accumulated = 0.0;
    }

    /// Adds `elapsed_seconds` and returns the number of whole frame periods
    /// that elapsed. A long stall yields one large count, not many calls.
    pub fn accumulate(&mut self, elapsed_seconds: f64) -> u32 {
        self.accumulated += elapsed_seconds.max(0.0);
        let mut repeat_count = 0;
        while self.accumulated >= self.frame_period {
            repeat_count += 1;
            self.accumulated -= self.frame_period;
        }
        repeat_count
    }
}
