use super::cache::ClipCache;
use super::queue::ShuffleQueue;
use crate::assets::clip::DanceClip;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct ActivePlayback {
    locator: String,
    clip: Arc<DanceClip>,
    /// Wrapped clip time in seconds; the active clip loops forever.
    time: f32,
    running: bool,
    /// Seconds of fade-in left. Zero means full weight.
    fade_in: f32,
}

struct FadeSource {
    clip: Arc<DanceClip>,
    /// Clip time frozen at handoff; the outgoing clip is stopped.
    time: f32,
    remaining: f32,
}

/// What the pose stage samples this frame: the looping target clip and,
/// mid-crossfade, the stopped outgoing clip to blend away from.
pub struct ClipMix {
    pub target: Arc<DanceClip>,
    pub target_time: f32,
    /// 0 at handoff, 1 once the fade completes.
    pub target_weight: f32,
    pub source: Option<(Arc<DanceClip>, f32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub current: Option<String>,
    pub queue_remaining: usize,
    pub played: usize,
}

/// Owns the rotation: which clip is bound, when to move on, and how the
/// outgoing clip fades against the incoming one. Exactly one clip is active
/// at a time; the auto-advance deadline is a plain field, overwritten on
/// every bind and cleared on detach.
pub struct PlaybackScheduler {
    queue: ShuffleQueue,
    fade_seconds: f32,
    clip_repeats: f32,
    active: Option<ActivePlayback>,
    fade_source: Option<FadeSource>,
    /// Locator dealt from the queue but not yet decoded. Retried until the
    /// cache produces it; rotation never skips past it.
    pending: Option<String>,
    deadline: Option<Instant>,
}

impl PlaybackScheduler {
    pub fn new(queue: ShuffleQueue, fade_seconds: f32, clip_repeats: f32) -> Self {
        Self {
            queue,
            fade_seconds: fade_seconds.max(0.0),
            clip_repeats: clip_repeats.max(0.01),
            active: None,
            fade_source: None,
            pending: None,
            deadline: None,
        }
    }

    pub fn catalog_len(&self) -> usize {
        self.queue.catalog_len()
    }

    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.active.as_ref().map(|a| a.running).unwrap_or(false)
    }

    pub fn active_locator(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.locator.as_str())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Moves the rotation forward: deals the next locator (or retries the
    /// pending one) and binds it if the cache has it. A cache miss leaves
    /// the locator pending and changes nothing else.
    pub fn advance(&mut self, cache: &mut ClipCache, now: Instant) {
        let Some(locator) = self.pending.take().or_else(|| self.queue.next()) else {
            return;
        };
        match cache.ensure(&locator) {
            Some(clip) => self.bind(locator, clip, now),
            None => self.pending = Some(locator),
        }
    }

    fn bind(&mut self, locator: String, clip: Arc<DanceClip>, now: Instant) {
        let fade_in = if let Some(outgoing) = self.active.take() {
            // The outgoing clip stops and only persists as a blend source.
            self.fade_source = Some(FadeSource {
                clip: outgoing.clip,
                time: outgoing.time,
                remaining: self.fade_seconds,
            });
            self.fade_seconds
        } else {
            0.0
        };
        let hold = Duration::from_secs_f32((clip.duration * self.clip_repeats).max(0.01));
        self.deadline = Some(now + hold);
        eprintln!(
            "[playback] now playing '{}' ({:.2}s, advancing in {:.2}s)",
            locator,
            clip.duration,
            hold.as_secs_f32()
        );
        self.active = Some(ActivePlayback { locator, clip, time: 0.0, running: true, fade_in });
    }

    /// Deadline check plus pending retry. Call every frame.
    pub fn tick(&mut self, cache: &mut ClipCache, now: Instant) {
        let deadline_hit = self.deadline.map(|d| now >= d).unwrap_or(false);
        let waiting = self.active.is_none() && self.pending.is_some();
        if deadline_hit || waiting {
            self.advance(cache, now);
        }
    }

    /// Advances clip time and burns down the crossfade.
    pub fn update(&mut self, dt: f32) {
        if let Some(active) = &mut self.active {
            if active.running {
                active.time = (active.time + dt).rem_euclid(active.clip.duration);
            }
            active.fade_in = (active.fade_in - dt).max(0.0);
        }
        if let Some(fade) = &mut self.fade_source {
            fade.remaining -= dt;
            if fade.remaining <= 0.0 {
                self.fade_source = None;
            }
        }
    }

    /// Liveness recovery for a bound-but-stopped clip: resume it at its
    /// current time and reschedule the deadline. Never advances.
    pub fn restart_in_place(&mut self, now: Instant) {
        let Some(active) = &mut self.active else {
            return;
        };
        active.running = true;
        let hold = Duration::from_secs_f32((active.clip.duration * self.clip_repeats).max(0.01));
        self.deadline = Some(now + hold);
        eprintln!("[playback] restarted '{}' in place", active.locator);
    }

    /// Marks the bound clip as stopped without unbinding it. The liveness
    /// monitor picks this up as a stall.
    pub fn halt(&mut self) {
        if let Some(active) = &mut self.active {
            active.running = false;
        }
    }

    /// Releases everything playback holds: active clip, fade source, pending
    /// locator and the auto-advance deadline.
    pub fn detach(&mut self) {
        self.active = None;
        self.fade_source = None;
        self.pending = None;
        self.deadline = None;
    }

    pub fn mix(&self) -> Option<ClipMix> {
        let active = self.active.as_ref()?;
        let target_weight = if self.fade_seconds > 0.0 && active.fade_in > 0.0 {
            1.0 - (active.fade_in / self.fade_seconds).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let source = self.fade_source.as_ref().map(|fade| (Arc::clone(&fade.clip), fade.time));
        Some(ClipMix {
            target: Arc::clone(&active.clip),
            target_time: active.time,
            target_weight,
            source,
        })
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            current: self.active.as_ref().map(|a| a.locator.clone()),
            queue_remaining: self.queue.remaining(),
            played: self.queue.played_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::clip::test_clip;
    use crate::assets::humanoid::test_skeleton;
    use crate::catalog::Catalog;
    use crate::playback::cache::ClipDecoder;
    use anyhow::Result;
    use std::time::Duration;

    struct InstantDecoder;

    impl ClipDecoder for InstantDecoder {
        fn decode(&self, locator: &str, _skeleton: &crate::assets::SkeletonAsset) -> Result<DanceClip> {
            Ok(test_clip(locator, 2.0))
        }
    }

    fn cache() -> ClipCache {
        ClipCache::new(Arc::new(InstantDecoder), Arc::new(test_skeleton(&[("hips", None)])), 1)
    }

    fn warm_cache(cache: &mut ClipCache, locators: &[&str]) {
        let owned: Vec<String> = locators.iter().map(|s| s.to_string()).collect();
        cache.prefetch(&owned);
        let deadline = Instant::now() + Duration::from_secs(10);
        while cache.len() < locators.len() {
            assert!(Instant::now() < deadline, "prefetch never settled");
            cache.pump();
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn scheduler(locators: &[&str]) -> PlaybackScheduler {
        let catalog = Catalog::from_locators(locators.iter().map(|s| s.to_string()).collect());
        PlaybackScheduler::new(ShuffleQueue::new(catalog), 0.5, 2.0)
    }

    #[test]
    fn first_bind_plays_immediately_without_fade() {
        let mut cache = cache();
        warm_cache(&mut cache, &["a.vrma"]);
        let mut sched = scheduler(&["a.vrma"]);
        let now = Instant::now();

        sched.advance(&mut cache, now);
        assert!(sched.is_running());
        let mix = sched.mix().expect("active mix");
        assert!((mix.target_weight - 1.0).abs() < 1e-6);
        assert!(mix.source.is_none());
        assert!(sched.deadline().is_some());
    }

    #[test]
    fn cache_miss_leaves_locator_pending_then_binds() {
        let mut cache = cache();
        let mut sched = scheduler(&["a.vrma"]);
        let now = Instant::now();

        sched.advance(&mut cache, now);
        assert!(!sched.has_active());
        assert!(sched.deadline().is_none());

        let deadline = Instant::now() + Duration::from_secs(10);
        while !sched.has_active() {
            assert!(Instant::now() < deadline, "bind never happened");
            cache.pump();
            sched.tick(&mut cache, Instant::now());
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(sched.status().current.as_deref(), Some("a.vrma"));
    }

    #[test]
    fn rebind_crossfades_and_replaces_deadline() {
        let mut cache = cache();
        warm_cache(&mut cache, &["a.vrma", "b.vrma"]);
        let mut sched = scheduler(&["a.vrma", "b.vrma"]);
        let t0 = Instant::now();

        sched.advance(&mut cache, t0);
        let first = sched.status().current.expect("first clip");
        let first_deadline = sched.deadline().expect("deadline");
        sched.update(0.25);

        let t1 = t0 + Duration::from_secs(1);
        sched.advance(&mut cache, t1);
        let second = sched.status().current.expect("second clip");
        assert_ne!(first, second);

        let mix = sched.mix().expect("mix");
        assert!(mix.source.is_some(), "outgoing clip should be the fade source");
        assert!(mix.target_weight < 1e-6, "incoming clip starts at zero weight");
        assert!((mix.target_time - 0.0).abs() < 1e-6);

        let second_deadline = sched.deadline().expect("deadline replaced");
        assert!(second_deadline > first_deadline);

        // Fade burns down and the source drops out.
        sched.update(0.25);
        let mid = sched.mix().expect("mix");
        assert!((mid.target_weight - 0.5).abs() < 1e-3);
        sched.update(0.3);
        let done = sched.mix().expect("mix");
        assert!(done.source.is_none());
        assert!((done.target_weight - 1.0).abs() < 1e-6);
    }

    #[test]
    fn deadline_fires_the_advance() {
        let mut cache = cache();
        warm_cache(&mut cache, &["a.vrma", "b.vrma"]);
        let mut sched = scheduler(&["a.vrma", "b.vrma"]);
        let t0 = Instant::now();

        sched.advance(&mut cache, t0);
        let first = sched.status().current.expect("first");

        // Clip duration 2.0 x repeats 2.0 = 4 seconds hold.
        sched.tick(&mut cache, t0 + Duration::from_secs(3));
        assert_eq!(sched.status().current.as_deref(), Some(first.as_str()));

        sched.tick(&mut cache, t0 + Duration::from_secs(5));
        assert_ne!(sched.status().current.expect("second"), first);
    }

    #[test]
    fn active_clip_loops_forever() {
        let mut cache = cache();
        warm_cache(&mut cache, &["a.vrma"]);
        let mut sched = scheduler(&["a.vrma"]);
        sched.advance(&mut cache, Instant::now());

        sched.update(5.0);
        let mix = sched.mix().expect("mix");
        // 5.0 into a 2.0s clip wraps to 1.0.
        assert!((mix.target_time - 1.0).abs() < 1e-4);
    }

    #[test]
    fn restart_in_place_resumes_same_clip() {
        let mut cache = cache();
        warm_cache(&mut cache, &["a.vrma"]);
        let mut sched = scheduler(&["a.vrma"]);
        let t0 = Instant::now();
        sched.advance(&mut cache, t0);
        sched.update(0.7);

        sched.halt();
        assert!(!sched.is_running());
        sched.update(1.0);
        let frozen = sched.mix().expect("mix").target_time;
        assert!((frozen - 0.7).abs() < 1e-4);

        sched.restart_in_place(t0 + Duration::from_secs(1));
        assert!(sched.is_running());
        assert_eq!(sched.status().current.as_deref(), Some("a.vrma"));
        let resumed = sched.mix().expect("mix").target_time;
        assert!((resumed - 0.7).abs() < 1e-4, "restart resumes, not rewinds");
    }

    #[test]
    fn detach_clears_everything() {
        let mut cache = cache();
        warm_cache(&mut cache, &["a.vrma"]);
        let mut sched = scheduler(&["a.vrma"]);
        sched.advance(&mut cache, Instant::now());
        assert!(sched.deadline().is_some());

        sched.detach();
        assert!(!sched.has_active());
        assert!(sched.deadline().is_none());
        assert!(sched.mix().is_none());
        assert_eq!(sched.status().current, None);
    }
}
