//! Verse-by-verse recitation playback.
//!
//! The engine plays a page's ayahs in order through an [`AudioPlayer`] and
//! turns the player's position ticks into word highlights:
//!
//! ```text
//! stopped -> loading -> playing <-> paused
//!               ^          |
//!               +----------+  completed, next ayah after a short delay
//! ```
//!
//! Every load is tagged with a fresh cue. Player events carrying any other cue
//! belong to media that has since been replaced and are dropped. Ayahs without
//! timing data, and ayahs whose audio fails to play, are skipped.

use crate::audio_cache::AudioCache;
use crate::config::{AudioConfig, HighlightMode};
use crate::error::{CoreError, Result};
use crate::highlight::{highlighted_word, WordId};
use crate::page::AyahRef;
use crate::player::{AudioPlayer, AudioSource, PlayerEvent, PlayerEventKind, PlayerEventReceiver};
use crate::time::DurationExt;
use crate::timing::{AudioData, AudioTimingStore};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "mushaf::playback";

/// Playback state as seen by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Loading,
    Playing,
    Paused,
}

impl PlaybackState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables taken from the `[audio]` config section
#[derive(Debug, Clone, Copy)]
pub struct PlaybackSettings {
    pub highlight_tolerance_ms: u64,
    pub highlight_mode: HighlightMode,
    pub inter_ayah_delay: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

impl From<&AudioConfig> for PlaybackSettings {
    fn from(config: &AudioConfig) -> Self {
        Self {
            highlight_tolerance_ms: config.highlight_tolerance_ms,
            highlight_mode: config.highlight_mode,
            inter_ayah_delay: Duration::from_millis(config.inter_ayah_delay_ms),
        }
    }
}

#[derive(Default)]
struct Session {
    ayahs: Vec<AyahRef>,
    index: usize,
    state: PlaybackState,
    /// Cue of the media currently loading or playing
    cue: u64,
    timing: Option<Arc<AudioData>>,
    highlight: Option<WordId>,
}

impl Session {
    fn current(&self) -> Option<AyahRef> {
        self.ayahs.get(self.index).copied()
    }

    fn is_active(&self) -> bool {
        self.state != PlaybackState::Stopped && !self.ayahs.is_empty()
    }
}

struct Channels {
    state: broadcast::Sender<PlaybackState>,
    position: broadcast::Sender<Duration>,
    highlight: broadcast::Sender<Option<WordId>>,
    current_ayah: broadcast::Sender<Option<AyahRef>>,
}

impl Channels {
    fn new() -> Self {
        Self {
            state: broadcast::channel(64).0,
            position: broadcast::channel(64).0,
            highlight: broadcast::channel(64).0,
            current_ayah: broadcast::channel(64).0,
        }
    }
}

/// Plays ayahs in sequence and publishes state, position and highlight updates
pub struct PlaybackEngine {
    timings: Arc<AudioTimingStore>,
    audio_cache: Arc<AudioCache>,
    player: Arc<dyn AudioPlayer>,
    settings: PlaybackSettings,
    session: Mutex<Session>,
    channels: RwLock<Option<Channels>>,
    events: StdMutex<Option<PlayerEventReceiver>>,
    next_cue: AtomicU64,
    disposed: AtomicBool,
    cancel_token: CancellationToken,
}

impl PlaybackEngine {
    /// Create an engine driving `player`, whose events arrive on `events`
    #[must_use]
    pub fn new(
        timings: Arc<AudioTimingStore>,
        audio_cache: Arc<AudioCache>,
        player: Arc<dyn AudioPlayer>,
        events: PlayerEventReceiver,
        settings: PlaybackSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            timings,
            audio_cache,
            player,
            settings,
            session: Mutex::new(Session::default()),
            channels: RwLock::new(Some(Channels::new())),
            events: StdMutex::new(Some(events)),
            next_cue: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Get a clone of the cancellation token
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Start consuming player events in a background task
    #[must_use]
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self: &Arc<Self>) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut events) = events else {
            warn!(target: LOG_TARGET, "Playback engine already started");
            return;
        };

        info!(target: LOG_TARGET, "Playback engine started with player {}", self.player.name());

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: LOG_TARGET, "Playback engine shutting down");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_player_event(event).await,
                        None => {
                            debug!(target: LOG_TARGET, "Player event stream closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    // Subscriptions

    /// Subscribe to playback state changes
    ///
    /// # Errors
    ///
    /// Returns `Disposed` once the engine has been disposed.
    pub fn subscribe_state(&self) -> Result<broadcast::Receiver<PlaybackState>> {
        self.subscribe(|c| c.state.subscribe())
    }

    /// Subscribe to position ticks within the current ayah
    ///
    /// # Errors
    ///
    /// Returns `Disposed` once the engine has been disposed.
    pub fn subscribe_position(&self) -> Result<broadcast::Receiver<Duration>> {
        self.subscribe(|c| c.position.subscribe())
    }

    /// Subscribe to highlighted word changes; `None` clears the highlight
    ///
    /// # Errors
    ///
    /// Returns `Disposed` once the engine has been disposed.
    pub fn subscribe_highlight(&self) -> Result<broadcast::Receiver<Option<WordId>>> {
        self.subscribe(|c| c.highlight.subscribe())
    }

    /// Subscribe to current ayah changes
    ///
    /// # Errors
    ///
    /// Returns `Disposed` once the engine has been disposed.
    pub fn subscribe_current_ayah(&self) -> Result<broadcast::Receiver<Option<AyahRef>>> {
        self.subscribe(|c| c.current_ayah.subscribe())
    }

    fn subscribe<T>(&self, f: impl FnOnce(&Channels) -> broadcast::Receiver<T>) -> Result<broadcast::Receiver<T>> {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        match *channels {
            Some(ref c) if !self.is_disposed() => Ok(f(c)),
            _ => Err(CoreError::Disposed),
        }
    }

    fn emit(&self, f: impl FnOnce(&Channels)) {
        if self.is_disposed() {
            return;
        }
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(ref c) = *channels {
            f(c);
        }
    }

    fn set_state(&self, session: &mut Session, state: PlaybackState) {
        if session.state != state {
            debug!(target: LOG_TARGET, "Playback state {} -> {}", session.state, state);
            session.state = state;
            self.emit(|c| {
                let _ = c.state.send(state);
            });
        }
    }

    fn set_highlight(&self, session: &mut Session, highlight: Option<WordId>) {
        if session.highlight != highlight {
            session.highlight = highlight;
            self.emit(|c| {
                let _ = c.highlight.send(highlight);
            });
        }
    }

    fn emit_current_ayah(&self, ayah: Option<AyahRef>) {
        self.emit(|c| {
            let _ = c.current_ayah.send(ayah);
        });
    }

    // Queries

    pub async fn state(&self) -> PlaybackState {
        self.session.lock().await.state
    }

    /// Ayah being loaded or played
    pub async fn current_ayah(&self) -> Option<AyahRef> {
        let session = self.session.lock().await;
        session.is_active().then(|| session.current()).flatten()
    }

    pub async fn highlighted_word(&self) -> Option<WordId> {
        self.session.lock().await.highlight
    }

    // Controls

    /// Play `ayahs` from the first, replacing any current session
    pub async fn play_page_ayahs(&self, ayahs: Vec<AyahRef>) {
        if self.is_disposed() {
            return;
        }
        info!(target: LOG_TARGET, "Playing {} ayahs", ayahs.len());

        let cue = {
            let mut session = self.session.lock().await;
            session.ayahs = ayahs;
            session.index = 0;
            self.enter_loading(&mut session)
        };
        if let Some(cue) = cue {
            self.load(cue).await;
        }
    }

    /// Pause playing media. Returns whether the engine was playing.
    pub async fn pause(&self) -> bool {
        let mut session = self.session.lock().await;
        if self.is_disposed() || session.state != PlaybackState::Playing {
            return false;
        }
        if let Err(e) = self.player.pause().await {
            warn!(target: LOG_TARGET, "Player refused to pause: {}", e);
            return false;
        }
        self.set_state(&mut session, PlaybackState::Paused);
        true
    }

    /// Resume paused media. Returns whether the engine was paused.
    pub async fn resume(&self) -> bool {
        let mut session = self.session.lock().await;
        if self.is_disposed() || session.state != PlaybackState::Paused {
            return false;
        }
        if let Err(e) = self.player.resume().await {
            warn!(target: LOG_TARGET, "Player refused to resume: {}", e);
            return false;
        }
        self.set_state(&mut session, PlaybackState::Playing);
        true
    }

    /// Jump to the ayah at `index` of the current session.
    ///
    /// Returns `false` without side effects when nothing is playing or the
    /// index is out of range.
    pub async fn seek_to_ayah(&self, index: usize) -> bool {
        let cue = {
            let mut session = self.session.lock().await;
            if self.is_disposed() || !session.is_active() || index >= session.ayahs.len() {
                return false;
            }
            session.index = index;
            self.enter_loading(&mut session)
        };
        if let Some(cue) = cue {
            self.load(cue).await;
        }
        true
    }

    /// Stop playback and end the session. Safe to call in any state.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        if session.state == PlaybackState::Stopped && session.ayahs.is_empty() {
            return;
        }
        session.cue = self.next_cue();
        self.finish(&mut session);
        info!(target: LOG_TARGET, "Playback stopped");

        if let Err(e) = self.player.stop().await {
            warn!(target: LOG_TARGET, "Player failed to stop: {}", e);
        }
    }

    /// Stop playback, close every subscription and stop the event loop.
    ///
    /// Idempotent; every later call on the engine is ignored.
    pub async fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.stop().await;
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_token.cancel();
        self.channels.write().unwrap_or_else(PoisonError::into_inner).take();
        info!(target: LOG_TARGET, "Playback engine disposed");
    }

    // Player events

    /// Apply one player event to the session
    pub async fn handle_player_event(self: &Arc<Self>, event: PlayerEvent) {
        if self.is_disposed() {
            return;
        }

        match event.kind {
            PlayerEventKind::Ready => {
                let mut session = self.session.lock().await;
                if session.cue == event.cue && session.state == PlaybackState::Loading {
                    self.set_state(&mut session, PlaybackState::Playing);
                }
            }
            PlayerEventKind::Position(position) => {
                let mut session = self.session.lock().await;
                if session.cue != event.cue || session.state != PlaybackState::Playing {
                    return;
                }
                self.emit(|c| {
                    let _ = c.position.send(position);
                });
                let highlight = match (session.current(), session.timing.as_ref()) {
                    (Some(ayah), Some(timing)) => highlighted_word(
                        ayah,
                        &timing.segments,
                        position.as_millis_u64(),
                        self.settings.highlight_tolerance_ms,
                        self.settings.highlight_mode,
                    ),
                    _ => None,
                };
                self.set_highlight(&mut session, highlight);
            }
            PlayerEventKind::Completed => {
                let cue = {
                    let mut session = self.session.lock().await;
                    if session.cue != event.cue || session.state == PlaybackState::Stopped {
                        return;
                    }
                    session.index += 1;
                    self.enter_loading(&mut session)
                };
                if let Some(cue) = cue {
                    self.load_after_delay(cue);
                }
            }
            PlayerEventKind::Failed(reason) => {
                warn!(target: LOG_TARGET, "Playback failed for cue {}: {}", event.cue, reason);
                if let Some(cue) = self.skip(event.cue).await {
                    self.load(cue).await;
                }
            }
        }
    }

    // Loading

    fn next_cue(&self) -> u64 {
        self.next_cue.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Move the session into loading for its current index under a new cue.
    ///
    /// Finishes the session and returns `None` when the index is past the end.
    fn enter_loading(&self, session: &mut Session) -> Option<u64> {
        let Some(ayah) = session.current() else {
            session.cue = self.next_cue();
            self.finish(session);
            return None;
        };

        let cue = self.next_cue();
        session.cue = cue;
        session.timing = None;
        self.set_highlight(session, None);
        self.set_state(session, PlaybackState::Loading);
        self.emit_current_ayah(Some(ayah));
        debug!(target: LOG_TARGET, "Loading {} (cue {})", ayah, cue);
        Some(cue)
    }

    /// Reset to stopped with no current ayah or highlight
    fn finish(&self, session: &mut Session) {
        let had_ayah = session.is_active();
        session.ayahs.clear();
        session.index = 0;
        session.timing = None;
        self.set_highlight(session, None);
        self.set_state(session, PlaybackState::Stopped);
        if had_ayah {
            self.emit_current_ayah(None);
        }
    }

    /// Advance past the ayah loaded under `cue`, if it is still current
    async fn skip(&self, cue: u64) -> Option<u64> {
        let mut session = self.session.lock().await;
        if session.cue != cue || session.state == PlaybackState::Stopped {
            return None;
        }
        session.index += 1;
        self.enter_loading(&mut session)
    }

    fn load_after_delay(self: &Arc<Self>, cue: u64) {
        let engine = Arc::clone(self);
        let delay = self.settings.inter_ayah_delay;
        tokio::spawn(async move {
            tokio::select! {
                () = engine.cancel_token.cancelled() => {}
                () = tokio::time::sleep(delay) => engine.load(cue).await,
            }
        });
    }

    /// Start the ayah loading under `cue`, skipping ayahs that cannot play
    async fn load(&self, mut cue: u64) {
        loop {
            let ayah = {
                let session = self.session.lock().await;
                if session.cue != cue || self.is_disposed() {
                    return;
                }
                match session.current() {
                    Some(ayah) => ayah,
                    None => return,
                }
            };

            let Some(timing) = self.timings.get(ayah.surah, ayah.ayah) else {
                debug!(
                    target: LOG_TARGET,
                    "{}",
                    CoreError::AudioDataMissing {
                        surah: ayah.surah,
                        ayah: ayah.ayah
                    }
                );
                match self.skip(cue).await {
                    Some(next) => {
                        cue = next;
                        continue;
                    }
                    None => return,
                }
            };

            let source = self.resolve_source(&timing.audio_url).await;

            // The session stays locked while the player opens the source so a
            // concurrent stop or seek cannot land between the cue check and play
            let played = {
                let mut session = self.session.lock().await;
                if session.cue != cue || self.is_disposed() {
                    return;
                }
                session.timing = Some(timing);

                debug!(target: LOG_TARGET, "Playing {} from {} source", ayah, source.kind());
                self.player.play(cue, source).await
            };

            match played {
                Ok(()) => return,
                Err(e) => {
                    warn!(target: LOG_TARGET, "Could not play {}: {}", ayah, e);
                    match self.skip(cue).await {
                        Some(next) => cue = next,
                        None => return,
                    }
                }
            }
        }
    }

    /// Cached file for `url`, downloading it first; the remote URL if that fails
    async fn resolve_source(&self, url: &str) -> AudioSource {
        match self.audio_cache.download_and_cache(url).await {
            Ok(path) => AudioSource::File(path),
            Err(e) => {
                warn!(target: LOG_TARGET, "{}; streaming instead", e);
                AudioSource::Remote(url.to_string())
            }
        }
    }
}
