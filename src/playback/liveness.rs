use super::cache::ClipCache;
use super::scheduler::PlaybackScheduler;
use std::time::{Duration, Instant};

/// Watchdog over the playback rotation. Two triggers run the same health
/// checks: the window becoming visible again, and a recurring heartbeat.
/// Recovery is silent; playback resumes without user-visible errors.
pub struct LivenessMonitor {
    heartbeat: Duration,
    next_beat: Instant,
}

impl LivenessMonitor {
    pub fn new(heartbeat_seconds: f32, now: Instant) -> Self {
        let heartbeat = Duration::from_secs_f32(heartbeat_seconds.max(0.1));
        Self { heartbeat, next_beat: now + heartbeat }
    }

    /// Visibility trigger. Runs the checks immediately; the empty-state
    /// check fires here even while a decode is mid-flight, since the stall
    /// may be the decode result never having been consumed.
    pub fn on_visible(&mut self, scheduler: &mut PlaybackScheduler, cache: &mut ClipCache, now: Instant) {
        self.heal(scheduler, cache, now, true);
        self.next_beat = now + self.heartbeat;
    }

    /// Heartbeat trigger. Call every frame; runs the checks once per
    /// heartbeat interval.
    pub fn tick(&mut self, scheduler: &mut PlaybackScheduler, cache: &mut ClipCache, now: Instant) {
        if now < self.next_beat {
            return;
        }
        self.next_beat = now + self.heartbeat;
        self.heal(scheduler, cache, now, false);
    }

    fn heal(
        &mut self,
        scheduler: &mut PlaybackScheduler,
        cache: &mut ClipCache,
        now: Instant,
        ignore_decoding: bool,
    ) {
        if scheduler.has_active() {
            if !scheduler.is_running() {
                eprintln!("[playback] liveness: bound clip stalled, restarting in place");
                scheduler.restart_in_place(now);
            }
            return;
        }
        if scheduler.catalog_len() == 0 {
            return;
        }
        if !ignore_decoding && cache.decoding() {
            return;
        }
        eprintln!("[playback] liveness: nothing bound, advancing rotation");
        scheduler.advance(cache, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::clip::test_clip;
    use crate::assets::humanoid::test_skeleton;
    use crate::assets::{DanceClip, SkeletonAsset};
    use crate::catalog::Catalog;
    use crate::playback::cache::ClipDecoder;
    use crate::playback::queue::ShuffleQueue;
    use anyhow::{anyhow, Result};
    use std::sync::{Arc, Mutex};

    struct InstantDecoder;

    impl ClipDecoder for InstantDecoder {
        fn decode(&self, locator: &str, _skeleton: &SkeletonAsset) -> Result<DanceClip> {
            Ok(test_clip(locator, 2.0))
        }
    }

    /// Blocks every decode until the test releases it.
    struct GatedDecoder {
        gate: Mutex<()>,
    }

    impl ClipDecoder for GatedDecoder {
        fn decode(&self, locator: &str, _skeleton: &SkeletonAsset) -> Result<DanceClip> {
            let _held = self.gate.lock().map_err(|_| anyhow!("gate poisoned"))?;
            Ok(test_clip(locator, 2.0))
        }
    }

    fn fixture(locators: &[&str]) -> (PlaybackScheduler, ClipCache) {
        let catalog = Catalog::from_locators(locators.iter().map(|s| s.to_string()).collect());
        let scheduler = PlaybackScheduler::new(ShuffleQueue::new(catalog), 0.5, 2.0);
        let mut cache =
            ClipCache::new(Arc::new(InstantDecoder), Arc::new(test_skeleton(&[("hips", None)])), 1);
        let owned: Vec<String> = locators.iter().map(|s| s.to_string()).collect();
        cache.prefetch(&owned);
        let deadline = Instant::now() + Duration::from_secs(10);
        while cache.len() < locators.len() {
            assert!(Instant::now() < deadline, "prefetch never settled");
            cache.pump();
            std::thread::sleep(Duration::from_millis(2));
        }
        (scheduler, cache)
    }

    #[test]
    fn heartbeat_restarts_a_stalled_clip_in_place() {
        let (mut scheduler, mut cache) = fixture(&["a.vrma"]);
        let t0 = Instant::now();
        scheduler.advance(&mut cache, t0);
        scheduler.halt();

        let mut monitor = LivenessMonitor::new(3.0, t0);
        // Before the beat elapses nothing happens.
        monitor.tick(&mut scheduler, &mut cache, t0 + Duration::from_secs(1));
        assert!(!scheduler.is_running());

        monitor.tick(&mut scheduler, &mut cache, t0 + Duration::from_secs(4));
        assert!(scheduler.is_running());
        assert_eq!(scheduler.status().current.as_deref(), Some("a.vrma"));
    }

    #[test]
    fn heartbeat_advances_when_nothing_is_bound() {
        let (mut scheduler, mut cache) = fixture(&["a.vrma"]);
        let t0 = Instant::now();
        assert!(!scheduler.has_active());

        let mut monitor = LivenessMonitor::new(3.0, t0);
        monitor.tick(&mut scheduler, &mut cache, t0 + Duration::from_secs(4));
        assert!(scheduler.has_active());
    }

    #[test]
    fn heartbeat_waits_out_an_in_flight_decode() {
        let catalog = Catalog::from_locators(vec!["a.vrma".to_string()]);
        let mut scheduler = PlaybackScheduler::new(ShuffleQueue::new(catalog), 0.5, 2.0);
        let mut cache =
            ClipCache::new(Arc::new(InstantDecoder), Arc::new(test_skeleton(&[("hips", None)])), 1);
        // An unresolved decode occupies the pipeline; without a pump it
        // stays in flight no matter how fast the worker finishes.
        cache.prefetch(&["slow.vrma".to_string()]);
        assert!(cache.decoding());

        let t0 = Instant::now();
        let mut monitor = LivenessMonitor::new(3.0, t0);
        monitor.tick(&mut scheduler, &mut cache, t0 + Duration::from_secs(4));
        assert!(!scheduler.has_active(), "heartbeat must not advance mid-decode");

        // Once the decode drains, the next beat advances.
        let deadline = Instant::now() + Duration::from_secs(10);
        while cache.decoding() {
            assert!(Instant::now() < deadline, "decode never settled");
            cache.pump();
            std::thread::sleep(Duration::from_millis(2));
        }
        monitor.tick(&mut scheduler, &mut cache, t0 + Duration::from_secs(8));
        // The advance may still be pending on the demand lane; drive it home.
        let deadline = Instant::now() + Duration::from_secs(10);
        while !scheduler.has_active() {
            assert!(Instant::now() < deadline, "rotation never started");
            cache.pump();
            scheduler.tick(&mut cache, Instant::now());
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn visibility_advances_past_an_in_flight_decode() {
        let catalog = Catalog::from_locators(vec!["a.vrma".to_string()]);
        let mut scheduler = PlaybackScheduler::new(ShuffleQueue::new(catalog), 0.5, 2.0);
        let decoder = Arc::new(GatedDecoder { gate: Mutex::new(()) });
        let mut cache = ClipCache::new(
            Arc::clone(&decoder) as Arc<dyn ClipDecoder>,
            Arc::new(test_skeleton(&[("hips", None)])),
            1,
        );
        let held = decoder.gate.lock().expect("hold gate");
        cache.prefetch(&["a.vrma".to_string()]);
        assert!(cache.decoding());

        // The heartbeat would back off here; visibility deals the rotation
        // anyway, leaving the locator queued on the scheduler.
        let t0 = Instant::now();
        let mut monitor = LivenessMonitor::new(3.0, t0);
        monitor.on_visible(&mut scheduler, &mut cache, t0);
        assert!(!scheduler.has_active(), "bind waits on the decode");

        drop(held);
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cache.contains("a.vrma") {
            assert!(Instant::now() < deadline, "decode never settled");
            cache.pump();
            std::thread::sleep(Duration::from_millis(2));
        }
        // One frame tick suffices: it only retries a locator that was
        // already dealt, so the bind proves on_visible ran the advance.
        scheduler.tick(&mut cache, Instant::now());
        assert!(scheduler.has_active());
        assert_eq!(scheduler.status().current.as_deref(), Some("a.vrma"));
    }

    #[test]
    fn visibility_trigger_heals_immediately() {
        let (mut scheduler, mut cache) = fixture(&["a.vrma"]);
        let t0 = Instant::now();
        scheduler.advance(&mut cache, t0);
        scheduler.halt();

        let mut monitor = LivenessMonitor::new(3.0, t0);
        // No waiting for the beat; visibility runs the checks now.
        monitor.on_visible(&mut scheduler, &mut cache, t0 + Duration::from_millis(10));
        assert!(scheduler.is_running());
    }

    #[test]
    fn empty_catalog_is_left_alone() {
        let (mut scheduler, mut cache) = fixture(&[]);
        let t0 = Instant::now();
        let mut monitor = LivenessMonitor::new(3.0, t0);
        monitor.tick(&mut scheduler, &mut cache, t0 + Duration::from_secs(10));
        assert!(!scheduler.has_active());
    }
}
