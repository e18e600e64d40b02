use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "WindowConfig::default_title")]
    pub title: String,
    #[serde(default = "WindowConfig::default_width")]
    pub width: u32,
    #[serde(default = "WindowConfig::default_height")]
    pub height: u32,
    #[serde(default = "WindowConfig::default_vsync")]
    pub vsync: bool,
}

impl WindowConfig {
    fn default_title() -> String {
        "vstage".to_string()
    }

    const fn default_width() -> u32 {
        1280
    }

    const fn default_height() -> u32 {
        720
    }

    const fn default_vsync() -> bool {
        true
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: Self::default_title(),
            width: Self::default_width(),
            height: Self::default_height(),
            vsync: Self::default_vsync(),
        }
    }
}

/// Where the avatar comes from and how it sits on the stage.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    #[serde(default = "StageConfig::default_model")]
    pub model: String,
    #[serde(default = "StageConfig::default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub yaw_degrees: f32,
    #[serde(default = "StageConfig::default_root_offset")]
    pub root_offset: [f32; 3],
    /// Explicit spring chains as lists of joint names, root first. When
    /// empty, chains are discovered from joint-name heuristics at load time.
    #[serde(default)]
    pub spring_chains: Vec<Vec<String>>,
}

impl StageConfig {
    fn default_model() -> String {
        "assets/models/avatar.vrm".to_string()
    }

    const fn default_scale() -> f32 {
        1.3
    }

    const fn default_root_offset() -> [f32; 3] {
        [0.0, -1.0, 0.0]
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            model: Self::default_model(),
            scale: Self::default_scale(),
            yaw_degrees: 0.0,
            root_offset: Self::default_root_offset(),
            spring_chains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "PlaybackConfig::default_catalog")]
    pub catalog: String,
    /// Crossfade length when rotating to the next clip.
    #[serde(default = "PlaybackConfig::default_fade_seconds")]
    pub fade_seconds: f32,
    /// Full loops a clip plays before the rotation advances. Fractional
    /// values are allowed; clips loop forever until the deadline fires.
    #[serde(default = "PlaybackConfig::default_clip_repeats")]
    pub clip_repeats: f32,
    /// Catalog entries decoded eagerly at startup.
    #[serde(default = "PlaybackConfig::default_prefetch_count")]
    pub prefetch_count: usize,
    #[serde(default = "PlaybackConfig::default_heartbeat_seconds")]
    pub heartbeat_seconds: f32,
}

impl PlaybackConfig {
    fn default_catalog() -> String {
        "config/catalog.json".to_string()
    }

    const fn default_fade_seconds() -> f32 {
        0.6
    }

    const fn default_clip_repeats() -> f32 {
        2.0
    }

    const fn default_prefetch_count() -> usize {
        3
    }

    const fn default_heartbeat_seconds() -> f32 {
        3.0
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            catalog: Self::default_catalog(),
            fade_seconds: Self::default_fade_seconds(),
            clip_repeats: Self::default_clip_repeats(),
            prefetch_count: Self::default_prefetch_count(),
            heartbeat_seconds: Self::default_heartbeat_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub stage: StageConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Default)]
pub struct AppConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vsync: Option<bool>,
    pub model: Option<String>,
    pub catalog: Option<String>,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        if let Some(width) = overrides.width {
            self.window.width = width;
        }
        if let Some(height) = overrides.height {
            self.window.height = height;
        }
        if let Some(vsync) = overrides.vsync {
            self.window.vsync = vsync;
        }
        if let Some(model) = &overrides.model {
            self.stage.model = model.clone();
        }
        if let Some(catalog) = &overrides.catalog {
            self.playback.catalog = catalog.clone();
        }
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.width.is_none()
            && self.height.is_none()
            && self.vsync.is_none()
            && self.model.is_none()
            && self.catalog.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_config_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"stage": {{"model": "m.vrm"}}}}"#).expect("write");
        let cfg = AppConfig::load(file.path()).expect("load");
        assert_eq!(cfg.stage.model, "m.vrm");
        assert!((cfg.stage.scale - 1.3).abs() < 1e-6);
        assert_eq!(cfg.playback.prefetch_count, 3);
        assert!((cfg.playback.heartbeat_seconds - 3.0).abs() < 1e-6);
        assert_eq!(cfg.window.width, 1280);
    }

    #[test]
    fn overrides_take_precedence() {
        let mut cfg = AppConfig::default();
        let overrides = AppConfigOverrides {
            width: Some(1920),
            vsync: Some(false),
            model: Some("other.vrm".to_string()),
            ..Default::default()
        };
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.window.width, 1920);
        assert_eq!(cfg.window.height, 720);
        assert!(!cfg.window.vsync);
        assert_eq!(cfg.stage.model, "other.vrm");
        assert_eq!(cfg.playback.catalog, "config/catalog.json");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = AppConfig::load_or_default("does/not/exist.json");
        assert_eq!(cfg.window.title, "vstage");
    }
}
