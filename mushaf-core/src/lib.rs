pub mod assembler;
pub mod audio_cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod highlight;
pub mod page;
pub mod page_cache;
pub mod paths;
pub mod playback;
pub mod player;
pub mod renderer;
pub mod service;
pub mod store;
pub mod time;
pub mod timing;

pub use assembler::{assemble_page, PageAssembler};
pub use audio_cache::AudioCache;
pub use config::{
    AudioConfig, CacheConfig, HighlightMode, LoggingConfig, MushafConfig, RendererConfig,
};
pub use error::{CoreError, Result};
pub use fetch::{AudioFetcher, HttpAudioFetcher};
pub use highlight::{active_segment, highlighted_word, WordId};
pub use page::{
    AyahKind, AyahRef, AyahSegment, AyahWord, LayoutLine, LineType, MushafPage, PageAyah,
    SegmentRef, Word, BASMALLAH_TEXT, WORD_SEPARATOR,
};
pub use page_cache::PageCache;
pub use paths::{
    audio_cache_dir, audio_manifest_path, config_dir, log_file_path, CONFIG_DIR_NAME,
    CONFIG_FILE_NAME, LOG_FILE_NAME,
};
pub use playback::{PlaybackEngine, PlaybackSettings, PlaybackState};
pub use player::{
    event_channel, AudioPlayer, AudioSource, PlayerEvent, PlayerEventKind, PlayerEventReceiver,
    PlayerEventSender,
};
pub use renderer::{Renderer, MUSHAF_PAGE_COUNT};
pub use service::{FontRegistrar, PageService};
pub use store::{LayoutStore, WordStore};
pub use time::DurationExt;
pub use timing::{AudioData, AudioSegment, AudioTimingStore};
