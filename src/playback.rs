pub mod cache;
pub mod liveness;
pub mod queue;
pub mod scheduler;

pub use cache::{ClipCache, ClipDecoder, GltfClipDecoder};
pub use liveness::LivenessMonitor;
pub use queue::ShuffleQueue;
pub use scheduler::{ClipMix, PlaybackScheduler, PlaybackStatus};
