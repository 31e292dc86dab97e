//! Path constants for configuration, assets and cache files.

use std::path::PathBuf;

/// The name of the configuration directory under ~/.config/
pub const CONFIG_DIR_NAME: &str = "mushaf";

/// The name of the main configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// The name of the directory holding the bundled databases and fonts
pub const ASSETS_DIR_NAME: &str = "assets";

/// The name of the downloaded recitation audio directory
pub const AUDIO_CACHE_DIR_NAME: &str = "audio_cache";

/// The name of the recitation timing manifest
pub const AUDIO_MANIFEST_FILE_NAME: &str = "audio_timings.json";

/// The name of the log file written when file logging is enabled
pub const LOG_FILE_NAME: &str = "mushaf.log";

/// Get the configuration directory path (~/.config/mushaf/)
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(CONFIG_DIR_NAME)
}

/// Get the config file path (~/.config/mushaf/config.toml)
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Get the default assets directory (`~/.config/mushaf/assets`)
#[must_use]
pub fn assets_dir() -> PathBuf {
    config_dir().join(ASSETS_DIR_NAME)
}

/// Get the default audio cache directory (`~/.cache/mushaf/audio_cache`)
#[must_use]
pub fn audio_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(config_dir)
        .join(CONFIG_DIR_NAME)
        .join(AUDIO_CACHE_DIR_NAME)
}

/// Get the default timing manifest path (`~/.config/mushaf/assets/audio_timings.json`)
#[must_use]
pub fn audio_manifest_path() -> PathBuf {
    assets_dir().join(AUDIO_MANIFEST_FILE_NAME)
}

/// Get the log file path (`~/.config/mushaf/mushaf.log`)
#[must_use]
pub fn log_file_path() -> PathBuf {
    config_dir().join(LOG_FILE_NAME)
}
