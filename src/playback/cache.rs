use crate::assets::clip::{decode_clip, DanceClip};
use crate::assets::humanoid::SkeletonAsset;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

/// Seam between the cache and the on-disk clip format. The production
/// decoder goes through `gltf`; tests swap in counting or failing decoders.
pub trait ClipDecoder: Send + Sync + 'static {
    fn decode(&self, locator: &str, skeleton: &SkeletonAsset) -> Result<DanceClip>;
}

pub struct GltfClipDecoder;

impl ClipDecoder for GltfClipDecoder {
    fn decode(&self, locator: &str, skeleton: &SkeletonAsset) -> Result<DanceClip> {
        decode_clip(locator, skeleton)
    }
}

struct DecodeResult {
    generation: u64,
    locator: String,
    demand_lane: bool,
    outcome: Result<DanceClip>,
}

/// Decoded-clip cache with background decode workers.
///
/// Demand decodes (`ensure`) are serialized: at most one runs at a time, and
/// a miss while one is in flight reports the miss without starting another.
/// Prefetch decodes run outside that lane, in parallel. Results are drained
/// on the caller's thread by `pump`; failures leave the locator absent so a
/// later `ensure` retries it.
pub struct ClipCache {
    decoder: Arc<dyn ClipDecoder>,
    skeleton: Arc<SkeletonAsset>,
    generation: u64,
    entries: HashMap<String, Arc<DanceClip>>,
    in_flight: HashSet<String>,
    demand_busy: bool,
    tx: Sender<DecodeResult>,
    rx: Receiver<DecodeResult>,
}

impl ClipCache {
    pub fn new(decoder: Arc<dyn ClipDecoder>, skeleton: Arc<SkeletonAsset>, generation: u64) -> Self {
        let (tx, rx) = channel();
        Self {
            decoder,
            skeleton,
            generation,
            entries: HashMap::new(),
            in_flight: HashSet::new(),
            demand_busy: false,
            tx,
            rx,
        }
    }

    /// Returns the clip when cached. On a miss with the demand lane idle,
    /// kicks off one background decode and reports the miss; on a miss with
    /// a decode already running, reports the miss and starts nothing.
    pub fn ensure(&mut self, locator: &str) -> Option<Arc<DanceClip>> {
        if let Some(clip) = self.entries.get(locator) {
            return Some(Arc::clone(clip));
        }
        if self.demand_busy || self.in_flight.contains(locator) {
            return None;
        }
        self.demand_busy = true;
        self.spawn_decode(locator.to_string(), true);
        None
    }

    /// Eagerly decodes `locators` in parallel. Already cached or already
    /// in-flight entries are skipped.
    pub fn prefetch(&mut self, locators: &[String]) {
        for locator in locators {
            if self.entries.contains_key(locator) || self.in_flight.contains(locator) {
                continue;
            }
            self.spawn_decode(locator.clone(), false);
        }
    }

    fn spawn_decode(&mut self, locator: String, demand_lane: bool) {
        self.in_flight.insert(locator.clone());
        let decoder = Arc::clone(&self.decoder);
        let skeleton = Arc::clone(&self.skeleton);
        let generation = self.generation;
        let tx = self.tx.clone();
        thread::spawn(move || {
            let outcome = decoder.decode(&locator, &skeleton);
            // Receiver may already be gone on teardown.
            let _ = tx.send(DecodeResult { generation, locator, demand_lane, outcome });
        });
    }

    /// Drains finished decodes into the cache. Call once per frame on the
    /// thread that owns the cache.
    pub fn pump(&mut self) {
        while let Ok(result) = self.rx.try_recv() {
            self.in_flight.remove(&result.locator);
            if result.demand_lane {
                self.demand_busy = false;
            }
            if result.generation != self.generation {
                eprintln!("[playback] dropping stale decode of '{}' (model replaced)", result.locator);
                continue;
            }
            match result.outcome {
                Ok(clip) => {
                    eprintln!("[playback] cached clip '{}' ({:.2}s)", result.locator, clip.duration);
                    self.entries.entry(result.locator).or_insert_with(|| Arc::new(clip));
                }
                Err(err) => {
                    eprintln!("[playback] failed to decode '{}': {err:#}", result.locator);
                }
            }
        }
    }

    /// Rebinds the cache to a new model. Cached clips target the old
    /// skeleton and are dropped; in-flight results get filtered out by the
    /// generation tag when they land.
    pub fn rebind(&mut self, skeleton: Arc<SkeletonAsset>, generation: u64) {
        self.skeleton = skeleton;
        self.generation = generation;
        self.entries.clear();
        self.in_flight.clear();
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.entries.contains_key(locator)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True while any decode, demand or prefetch, is unresolved.
    pub fn decoding(&self) -> bool {
        !self.in_flight.is_empty()
    }
}
