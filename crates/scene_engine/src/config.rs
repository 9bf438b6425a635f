//! Configuration system
//!
//! Scene behavior toggles that ship as console variables or ini settings in a
//! full engine live here as plain config fields, loadable from TOML or RON.

pub use serde::{Deserialize, Serialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

        // Try different formats
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Renderer feature level the scene is servicing
///
/// Mobile renderers need a dedicated shader path for primitives lit by
/// movable point lights, which the interaction graph tracks per primitive.
/// Desktop renderers resolve this dynamically and skip that bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureLevel {
    /// Resource-constrained renderer with specialized static shader paths
    Mobile,
    /// Full deferred renderer
    Desktop,
}

/// Scene behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Upload every primitive every flush instead of only dirty ones.
    /// Debugging aid; expensive on large scenes.
    pub upload_every_frame: bool,

    /// Scratch upload storage above this byte size is released after a flush
    /// instead of being pooled for the next one.
    pub max_pooled_upload_bytes: usize,

    /// Whether unbuilt-lighting preview shadows are rendered outside the
    /// editor. When disabled, interactions classified as uncached static
    /// lighting stop casting shadows in game, which is cheaper but makes
    /// in-game lighting diverge from the editor until a lighting build.
    pub unbuilt_preview_shadows_in_game: bool,

    /// Whether this scene belongs to an editor world. Editor scenes always
    /// render unbuilt preview shadows.
    pub is_editor_scene: bool,

    /// Renderer feature level serviced by this scene
    pub feature_level: FeatureLevel,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            upload_every_frame: false,
            max_pooled_upload_bytes: 256_000,
            unbuilt_preview_shadows_in_game: true,
            is_editor_scene: false,
            feature_level: FeatureLevel::Desktop,
        }
    }
}

impl Config for SceneConfig {}
