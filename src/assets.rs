use anyhow::Result;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;

pub mod clip;
pub mod humanoid;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClipInterpolation {
    Step,
    Linear,
}

#[derive(Clone, Debug)]
pub struct ClipKeyframe<T> {
    pub time: f32,
    pub value: T,
}

/// Background loader for humanoid model assets. Decode runs on a worker
/// thread; the render loop keeps ticking and drains the result here. Each
/// request bumps the generation, and a result that resolves after its model
/// has been superseded is discarded rather than attached.
pub struct ModelLoader {
    tx: Sender<(u64, String, Result<humanoid::HumanoidAsset>)>,
    rx: Receiver<(u64, String, Result<humanoid::HumanoidAsset>)>,
    generation: u64,
    in_flight: bool,
}

impl ModelLoader {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self { tx, rx, generation: 0, in_flight: false }
    }

    /// Current model generation. Bumped by every `request`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loading(&self) -> bool {
        self.in_flight
    }

    pub fn request(&mut self, locator: String, spring_chains: Vec<Vec<String>>) -> u64 {
        self.generation += 1;
        self.in_flight = true;
        let generation = self.generation;
        let tx = self.tx.clone();
        thread::spawn(move || {
            let outcome = humanoid::load_humanoid(&locator, &spring_chains);
            // Receiver may already be gone on teardown.
            let _ = tx.send((generation, locator, outcome));
        });
        generation
    }

    /// Drains finished loads. Only a result matching the current generation
    /// is returned; anything older belongs to a replaced model and is logged
    /// and dropped.
    pub fn poll(&mut self) -> Option<Result<humanoid::HumanoidAsset>> {
        while let Ok((generation, locator, outcome)) = self.rx.try_recv() {
            if generation != self.generation {
                eprintln!("[assets] discarding stale model load for '{locator}' (superseded)");
                continue;
            }
            self.in_flight = false;
            return Some(outcome);
        }
        None
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

pub use clip::DanceClip;
pub use humanoid::{HumanoidAsset, SkeletonAsset, SkeletonJoint};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn failed_load_resolves_with_error() {
        let mut loader = ModelLoader::new();
        loader.request("definitely/not/a/model.vrm".to_string(), Vec::new());
        assert!(loader.loading());
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(outcome) = loader.poll() {
                assert!(outcome.is_err());
                break;
            }
            assert!(Instant::now() < deadline, "load never resolved");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!loader.loading());
    }

    #[test]
    fn stale_generation_is_discarded() {
        let mut loader = ModelLoader::new();
        loader.request("first/missing.vrm".to_string(), Vec::new());
        // Supersede before the first result is drained.
        loader.request("second/missing.vrm".to_string(), Vec::new());
        let deadline = Instant::now() + Duration::from_secs(10);
        let outcome = loop {
            if let Some(outcome) = loader.poll() {
                break outcome;
            }
            assert!(Instant::now() < deadline, "load never resolved");
            std::thread::sleep(Duration::from_millis(5));
        };
        // Whichever order the workers finished in, the surviving result is
        // for generation 2 and the first was dropped.
        assert!(outcome.is_err());
        assert_eq!(loader.generation(), 2);
    }
}
