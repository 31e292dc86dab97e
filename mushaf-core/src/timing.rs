//! Recitation timing manifest.
//!
//! The manifest is one JSON object keyed by `"surah:ayah"`:
//!
//! ```json
//! { "1:1": { "audio_url": "001001.mp3", "duration": 6100,
//!            "segments": [[1, 0, 480], [2, 480, 1320]] } }
//! ```
//!
//! Each segment is `[word_index, start_ms, end_ms]`. The stored word index is
//! kept for reference only: reciters repeat words, so it is not monotonic.

use crate::error::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

const LOG_TARGET: &str = "mushaf::timing";

/// Timing of one recited word, half-open `[start_ms, end_ms)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSegment {
    /// Word index as stored in the manifest
    pub word_index: u32,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl AudioSegment {
    #[must_use]
    pub const fn new(word_index: u32, start_ms: u64, end_ms: u64) -> Self {
        Self {
            word_index,
            start_ms,
            end_ms,
        }
    }

    #[must_use]
    pub const fn contains(&self, position_ms: u64) -> bool {
        self.start_ms <= position_ms && position_ms < self.end_ms
    }

    /// Distance from `position_ms` to the nearest boundary, 0 when inside
    #[must_use]
    pub const fn distance(&self, position_ms: u64) -> u64 {
        if position_ms < self.start_ms {
            self.start_ms - position_ms
        } else if position_ms >= self.end_ms {
            position_ms - self.end_ms
        } else {
            0
        }
    }
}

/// Audio and word timing for one ayah
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioData {
    pub surah: u16,
    pub ayah: u16,
    pub audio_url: String,
    pub duration: Option<Duration>,
    /// Sorted by start time
    pub segments: Vec<AudioSegment>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    audio_url: String,
    #[serde(default)]
    duration: Option<serde_json::Value>,
    #[serde(default)]
    segments: Vec<serde_json::Value>,
}

/// In-memory index of the timing manifest, loaded once
#[derive(Debug, Default)]
pub struct AudioTimingStore {
    entries: HashMap<(u16, u16), Arc<AudioData>>,
}

impl AudioTimingStore {
    /// Load the manifest file at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a JSON object.
    pub async fn load(path: &Path, base_url: Option<&str>) -> Result<Self> {
        info!(target: LOG_TARGET, "Loading audio timing manifest from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&content, base_url)
    }

    /// Parse a manifest document. Malformed entries and segments are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a JSON object.
    pub fn from_json_str(json: &str, base_url: Option<&str>) -> Result<Self> {
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(json)?;
        let base = base_url.and_then(|b| Url::parse(b).ok());

        let mut entries = HashMap::with_capacity(raw.len());
        let mut skipped = 0_usize;

        for (key, value) in raw {
            let Some((surah, ayah)) = parse_key(&key) else {
                warn!(target: LOG_TARGET, "Skipping manifest entry with invalid key '{}'", key);
                skipped += 1;
                continue;
            };
            let entry: RawEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(target: LOG_TARGET, "Skipping malformed manifest entry {}: {}", key, e);
                    skipped += 1;
                    continue;
                }
            };

            let mut segments: Vec<AudioSegment> = entry.segments.iter().filter_map(parse_segment).collect();
            segments.sort_by_key(|s| (s.start_ms, s.end_ms));

            entries.insert(
                (surah, ayah),
                Arc::new(AudioData {
                    surah,
                    ayah,
                    audio_url: resolve_url(&entry.audio_url, base.as_ref()),
                    duration: entry.duration.as_ref().and_then(json_millis).map(Duration::from_millis),
                    segments,
                }),
            );
        }

        info!(
            target: LOG_TARGET,
            "Loaded timing for {} ayahs ({} entries skipped)",
            entries.len(),
            skipped
        );
        Ok(Self { entries })
    }

    /// Timing for an ayah, if the manifest has it
    #[must_use]
    pub fn get(&self, surah: u16, ayah: u16) -> Option<Arc<AudioData>> {
        self.entries.get(&(surah, ayah)).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_key(key: &str) -> Option<(u16, u16)> {
    let (surah, ayah) = key.trim().split_once(':')?;
    Some((surah.parse().ok()?, ayah.parse().ok()?))
}

/// Non-negative millisecond value from an integer or float
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn json_millis(value: &serde_json::Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f.round() as u64)
    })
}

fn parse_segment(value: &serde_json::Value) -> Option<AudioSegment> {
    let parts = value.as_array()?;
    if parts.len() < 3 {
        return None;
    }
    let word_index = json_millis(&parts[0]).and_then(|i| u32::try_from(i).ok())?;
    let start_ms = json_millis(&parts[1])?;
    let end_ms = json_millis(&parts[2])?;
    (start_ms < end_ms).then_some(AudioSegment::new(word_index, start_ms, end_ms))
}

fn resolve_url(raw: &str, base: Option<&Url>) -> String {
    if Url::parse(raw).is_ok() {
        return raw.to_string();
    }
    match base.map(|b| b.join(raw)) {
        Some(Ok(joined)) => joined.into(),
        _ => raw.to_string(),
    }
}
