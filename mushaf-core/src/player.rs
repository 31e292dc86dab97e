//! Audio output seam.
//!
//! Decoding and output live outside this crate. The playback engine drives an
//! [`AudioPlayer`] and listens to the [`PlayerEvent`] stream it produces.

use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// Where the player should read audio from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// A file in the audio cache
    File(PathBuf),
    /// Stream directly from the network
    Remote(String),
}

impl AudioSource {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Remote(_) => "remote",
        }
    }
}

impl std::fmt::Display for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// What happened to the media loaded under a cue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEventKind {
    /// Media is loaded and playing
    Ready,
    /// Elapsed time within the current media
    Position(Duration),
    /// Media played to the end
    Completed,
    /// Media could not be loaded or decoded
    Failed(String),
}

/// An event from the player, tagged with the cue it belongs to.
///
/// Events for a cue other than the engine's current one are stale and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEvent {
    pub cue: u64,
    pub kind: PlayerEventKind,
}

impl PlayerEvent {
    #[must_use]
    pub const fn new(cue: u64, kind: PlayerEventKind) -> Self {
        Self { cue, kind }
    }
}

pub type PlayerEventSender = mpsc::UnboundedSender<PlayerEvent>;
pub type PlayerEventReceiver = mpsc::UnboundedReceiver<PlayerEvent>;

/// Create the channel a player reports its events on
#[must_use]
pub fn event_channel() -> (PlayerEventSender, PlayerEventReceiver) {
    mpsc::unbounded_channel()
}

/// Trait for audio outputs driven by the playback engine.
///
/// Implementations report progress for the media started by `play` as
/// [`PlayerEvent`]s carrying the same `cue`.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Returns a human-readable name for this player.
    fn name(&self) -> &'static str;

    /// Stop whatever is playing and start `source` under `cue`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be opened. Failures discovered
    /// later are reported as [`PlayerEventKind::Failed`].
    async fn play(&self, cue: u64, source: AudioSource) -> Result<()>;

    /// Pause the current media.
    ///
    /// # Errors
    ///
    /// Returns an error if the player rejects the request.
    async fn pause(&self) -> Result<()>;

    /// Resume paused media.
    ///
    /// # Errors
    ///
    /// Returns an error if the player rejects the request.
    async fn resume(&self) -> Result<()>;

    /// Stop and unload the current media.
    ///
    /// # Errors
    ///
    /// Returns an error if the player rejects the request.
    async fn stop(&self) -> Result<()>;
}
