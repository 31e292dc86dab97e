//! Clock-driven stand-in for a real audio output.
//!
//! Nothing is decoded: each `play` starts a timer that reports position ticks
//! until the ayah's known duration has elapsed, then reports completion.

use async_trait::async_trait;
use mushaf_core::{
    AudioCache, AudioPlayer, AudioSource, AudioTimingStore, PlayerEvent, PlayerEventKind,
    PlayerEventSender, Result,
};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const LOG_TARGET: &str = "mushaf::cli::player";

const TICK: Duration = Duration::from_millis(100);
const FALLBACK_DURATION: Duration = Duration::from_secs(5);

struct Track {
    cancel_token: CancellationToken,
    paused: watch::Sender<bool>,
}

pub struct SimulatedPlayer {
    events: PlayerEventSender,
    /// Keyed by remote URL and by cache file name
    durations: HashMap<String, Duration>,
    current: Mutex<Option<Track>>,
}

impl SimulatedPlayer {
    /// Create a player that knows the length of every ayah in `timings`
    pub fn new(events: PlayerEventSender, timings: &AudioTimingStore, ayahs: &[(u16, u16)]) -> Self {
        let mut durations = HashMap::new();
        for (surah, ayah) in ayahs {
            let Some(data) = timings.get(*surah, *ayah) else {
                continue;
            };
            let length = data
                .duration
                .or_else(|| data.segments.last().map(|s| Duration::from_millis(s.end_ms)))
                .unwrap_or(FALLBACK_DURATION);
            durations.insert(data.audio_url.clone(), length);
            durations.insert(AudioCache::cache_key(&data.audio_url), length);
        }

        Self {
            events,
            durations,
            current: Mutex::new(None),
        }
    }

    fn duration_of(&self, source: &AudioSource) -> Duration {
        let key = match source {
            AudioSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            AudioSource::Remote(url) => url.clone(),
        };
        self.durations.get(&key).copied().unwrap_or(FALLBACK_DURATION)
    }

    fn replace(&self, track: Option<Track>) {
        let previous = std::mem::replace(
            &mut *self.current.lock().unwrap_or_else(PoisonError::into_inner),
            track,
        );
        if let Some(previous) = previous {
            previous.cancel_token.cancel();
        }
    }

    fn set_paused(&self, paused: bool) {
        if let Some(ref track) = *self.current.lock().unwrap_or_else(PoisonError::into_inner) {
            let _ = track.paused.send(paused);
        }
    }
}

#[async_trait]
impl AudioPlayer for SimulatedPlayer {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn play(&self, cue: u64, source: AudioSource) -> Result<()> {
        let duration = self.duration_of(&source);
        debug!(target: LOG_TARGET, "Cue {}: {} ({:?})", cue, source, duration);

        let cancel_token = CancellationToken::new();
        let (paused_tx, mut paused_rx) = watch::channel(false);
        self.replace(Some(Track {
            cancel_token: cancel_token.clone(),
            paused: paused_tx,
        }));

        let events = self.events.clone();
        tokio::spawn(async move {
            let send = |kind| events.send(PlayerEvent::new(cue, kind)).is_ok();
            if !send(PlayerEventKind::Ready) {
                return;
            }

            let mut elapsed = Duration::ZERO;
            while elapsed < duration {
                tokio::select! {
                    () = cancel_token.cancelled() => return,
                    () = tokio::time::sleep(TICK) => {}
                }
                if *paused_rx.borrow_and_update() {
                    continue;
                }
                elapsed = (elapsed + TICK).min(duration);
                if !send(PlayerEventKind::Position(elapsed)) {
                    return;
                }
            }
            send(PlayerEventKind::Completed);
        });
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.set_paused(true);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.set_paused(false);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.replace(None);
        Ok(())
    }
}
