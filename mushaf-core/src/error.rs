use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    // Configuration errors
    #[error("Config file not found at {path}. A template has been created - please review it and restart.")]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid config: {message}")]
    ConfigInvalid { message: String },

    #[error("Failed to parse config file: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    // Store errors
    #[error("Store unavailable at {path}: {reason}")]
    StoreUnavailable { path: PathBuf, reason: String },

    #[error("No layout rows for page {page}")]
    EmptyPage { page: u32 },

    #[error("Store query failed: {0}")]
    StoreError(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    // Audio errors
    #[error("No audio data for {surah}:{ayah}")]
    AudioDataMissing { surah: u16, ayah: u16 },

    #[error("Audio fetch failed for {url}: {reason}")]
    AudioFetchFailed { url: String, reason: String },

    #[error("Playback failed: {reason}")]
    Playback { reason: String },

    #[error("Service has been disposed")]
    Disposed,

    // Manifest errors
    #[error("Invalid audio manifest: {0}")]
    ManifestError(#[from] serde_json::Error),

    // Network errors
    #[error("Network request failed: {0}")]
    NetworkError(#[from] reqwest::Error),

    // IO errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
