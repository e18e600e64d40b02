use std::time::{Duration, Instant};

/// Maximum delta handed to the simulation in one tick. A window that sat
/// occluded for minutes must not integrate that gap as a single step.
const MAX_STEP_SECONDS: f32 = 0.25;

pub struct Time {
    start: Instant,
    last: Instant,
    pub delta: Duration,
    dropped: f32,
}

impl Time {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now, delta: Duration::ZERO, dropped: 0.0 }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last;
        self.last = now;
        let raw = self.delta.as_secs_f32();
        if raw > MAX_STEP_SECONDS {
            self.dropped = raw - MAX_STEP_SECONDS;
            self.delta = Duration::from_secs_f32(MAX_STEP_SECONDS);
        } else {
            self.dropped = 0.0;
        }
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Wall-clock time discarded by the last tick's clamp, if any.
    pub fn dropped_backlog(&self) -> Option<f32> {
        (self.dropped > 0.0).then_some(self.dropped)
    }

    pub fn elapsed_seconds(&self) -> f32 {
        self.last.duration_since(self.start).as_secs_f32()
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_produces_small_finite_delta() {
        let mut time = Time::new();
        time.tick();
        let dt = time.delta_seconds();
        assert!(dt >= 0.0 && dt < MAX_STEP_SECONDS);
        assert!(time.dropped_backlog().is_none());
    }

    #[test]
    fn elapsed_accumulates_across_ticks() {
        let mut time = Time::new();
        assert_eq!(time.elapsed_seconds(), 0.0);
        std::thread::sleep(Duration::from_millis(5));
        time.tick();
        let first = time.elapsed_seconds();
        assert!(first > 0.0);
        std::thread::sleep(Duration::from_millis(5));
        time.tick();
        assert!(time.elapsed_seconds() > first);
    }
}
