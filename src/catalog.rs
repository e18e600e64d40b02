use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// The full set of dance clip locators, loaded once at startup and immutable
/// for the lifetime of the stage. Order matters: the first entries are the
/// prefetch priority set.
#[derive(Clone)]
pub struct Catalog {
    clips: Arc<[String]>,
}

#[derive(Deserialize)]
struct CatalogFile {
    clips: Vec<String>,
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read catalog file {}", path.display()))?;
        let file: CatalogFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse catalog file {}", path.display()))?;
        Ok(Self::from_locators(file.clips))
    }

    pub fn from_locators(clips: Vec<String>) -> Self {
        Self { clips: Arc::from(clips.into_boxed_slice()) }
    }

    pub fn empty() -> Self {
        Self { clips: Arc::from([]) }
    }

    pub fn locators(&self) -> &[String] {
        &self.clips
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn priority(&self, count: usize) -> &[String] {
        &self.clips[..count.min(self.clips.len())]
    }
}
