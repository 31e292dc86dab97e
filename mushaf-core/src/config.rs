use crate::error::{CoreError, Result};
use crate::renderer::Renderer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MushafConfig {
    #[serde(default)]
    pub renderer: RendererConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub active: Renderer,
    /// Directory holding the bundled word/layout databases and fonts
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
}

fn default_assets_dir() -> PathBuf {
    crate::paths::assets_dir()
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            active: Renderer::default(),
            assets_dir: default_assets_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of assembled pages kept in memory
    #[serde(default = "default_page_capacity")]
    pub page_capacity: usize,
    /// Pages on either side of the current page to assemble ahead of time
    #[serde(default = "default_preload_radius")]
    pub preload_radius: u32,
    /// Background tasks pause after this many pages
    #[serde(default = "default_yield_every")]
    pub yield_every: u32,
    #[serde(default = "default_yield_pause_ms")]
    pub yield_pause_ms: u64,
    /// Assemble the whole book in the background after startup
    #[serde(default)]
    pub warm_up_on_start: bool,
}

const fn default_page_capacity() -> usize {
    24
}

const fn default_preload_radius() -> u32 {
    3
}

const fn default_yield_every() -> u32 {
    4
}

const fn default_yield_pause_ms() -> u64 {
    16
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_capacity: default_page_capacity(),
            preload_radius: default_preload_radius(),
            yield_every: default_yield_every(),
            yield_pause_ms: default_yield_pause_ms(),
            warm_up_on_start: false,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn yield_pause(&self) -> Duration {
        Duration::from_millis(self.yield_pause_ms)
    }
}

/// How a timing segment is turned into a highlighted word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HighlightMode {
    /// Nth timing segment highlights the ayah's Nth word
    #[default]
    Ordinal,
    /// Use the word index stored in the timing segment as-is
    RawWordIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
    #[serde(default = "default_audio_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_max_cached_files")]
    pub max_cached_files: usize,
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
    /// Base URL that relative `audio_url` entries in the manifest are resolved against
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_highlight_tolerance")]
    pub highlight_tolerance_ms: u64,
    #[serde(default)]
    pub highlight_mode: HighlightMode,
    #[serde(default = "default_inter_ayah_delay")]
    pub inter_ayah_delay_ms: u64,
}

fn default_manifest_path() -> PathBuf {
    crate::paths::audio_manifest_path()
}

fn default_audio_cache_dir() -> PathBuf {
    crate::paths::audio_cache_dir()
}

const fn default_max_cached_files() -> usize {
    100
}

const fn default_download_timeout() -> u64 {
    30
}

const fn default_highlight_tolerance() -> u64 {
    500
}

const fn default_inter_ayah_delay() -> u64 {
    300
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            manifest_path: default_manifest_path(),
            cache_dir: default_audio_cache_dir(),
            max_cached_files: default_max_cached_files(),
            download_timeout_secs: default_download_timeout(),
            base_url: None,
            highlight_tolerance_ms: default_highlight_tolerance(),
            highlight_mode: HighlightMode::default(),
            inter_ayah_delay_ms: default_inter_ayah_delay(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to ~/.config/mushaf/mushaf.log
    #[serde(default)]
    pub file: bool,
}

impl MushafConfig {
    /// Get the config file path (~/.config/mushaf/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from file or create template on first run
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, if it
    /// holds invalid values, or `ConfigNotFound` after writing the template.
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(&config_path, CONFIG_TEMPLATE)?;

            return Err(CoreError::ConfigNotFound { path: config_path });
        }

        let content = fs::read_to_string(&config_path)?;
        Self::parse(&content)
    }

    /// Parse and validate a config document
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a value is out of range.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.cache.page_capacity == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "cache.page_capacity must be at least 1".to_string(),
            });
        }
        if self.cache.page_capacity <= usize::try_from(self.cache.preload_radius.saturating_mul(2)).unwrap_or(usize::MAX) {
            return Err(CoreError::ConfigInvalid {
                message: "cache.page_capacity must exceed twice cache.preload_radius".to_string(),
            });
        }
        if self.audio.max_cached_files == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "audio.max_cached_files must be at least 1".to_string(),
            });
        }
        if let Some(ref base) = self.audio.base_url {
            if let Err(e) = url::Url::parse(base) {
                return Err(CoreError::ConfigInvalid {
                    message: format!("audio.base_url is not a valid URL: {e}"),
                });
            }
        }
        Ok(())
    }
}

const CONFIG_TEMPLATE: &str = r#"# Mushaf Configuration
# ~/.config/mushaf/config.toml

[renderer]
# Renderer: "digital_khatt", "qpc_uthmani" or "qpc_v2"
active = "digital_khatt"
# Directory holding the word/layout databases and fonts
# assets_dir = "/path/to/assets"

[cache]
# Assembled pages kept in memory (must exceed 2 * preload_radius)
page_capacity = 24
preload_radius = 3
# Background preloading pauses for yield_pause_ms after every yield_every pages
yield_every = 4
yield_pause_ms = 16
# Assemble every page in the background once the service starts
warm_up_on_start = false

[audio]
# manifest_path = "/path/to/audio_timings.json"
# cache_dir = "/path/to/audio_cache"
max_cached_files = 100
download_timeout_secs = 30
# Relative audio_url entries are resolved against this
# base_url = "https://audio.example.org/recitations/"
highlight_tolerance_ms = 500
# "ordinal" or "raw_word_index"
highlight_mode = "ordinal"
inter_ayah_delay_ms = 300

[logging]
# Also write logs to ~/.config/mushaf/mushaf.log
file = false
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_to_defaults() {
        let config = MushafConfig::parse(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.renderer.active, Renderer::DigitalKhatt);
        assert_eq!(config.cache.page_capacity, 24);
        assert_eq!(config.cache.preload_radius, 3);
        assert_eq!(config.audio.max_cached_files, 100);
        assert_eq!(config.audio.highlight_tolerance_ms, 500);
        assert_eq!(config.audio.highlight_mode, HighlightMode::Ordinal);
        assert!(!config.logging.file);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = MushafConfig::parse("").unwrap();
        assert_eq!(config.audio.inter_ayah_delay_ms, 300);
        assert_eq!(config.cache.yield_pause(), Duration::from_millis(16));
    }

    #[test]
    fn test_renderer_and_mode_overrides() {
        let config = MushafConfig::parse(
            r#"
            [renderer]
            active = "qpc_v2"

            [audio]
            highlight_mode = "raw_word_index"
            base_url = "https://example.org/audio/"
            "#,
        )
        .unwrap();
        assert_eq!(config.renderer.active, Renderer::QpcV2);
        assert_eq!(config.audio.highlight_mode, HighlightMode::RawWordIndex);
        assert_eq!(
            config.audio.base_url.as_deref(),
            Some("https://example.org/audio/")
        );
    }

    #[test]
    fn test_capacity_must_cover_preload_radius() {
        let result = MushafConfig::parse(
            r"
            [cache]
            page_capacity = 6
            preload_radius = 3
            ",
        );
        assert!(matches!(result, Err(CoreError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = MushafConfig::parse(
            r#"
            [audio]
            base_url = "not a url"
            "#,
        );
        assert!(matches!(result, Err(CoreError::ConfigInvalid { .. })));
    }

    #[test]
    fn test_unknown_renderer_is_parse_error() {
        let result = MushafConfig::parse(
            r#"
            [renderer]
            active = "warsh"
            "#,
        );
        assert!(matches!(result, Err(CoreError::ConfigParseError(_))));
    }
}
