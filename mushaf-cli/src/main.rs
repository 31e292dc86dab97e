mod cli;
mod player;

use crate::cli::{Cli, Command};
use crate::player::SimulatedPlayer;
use clap::Parser;
use mushaf_core::{
    event_channel, AudioCache, AudioTimingStore, CoreError, HttpAudioFetcher, MushafConfig,
    MushafPage, PageService, PlaybackEngine, PlaybackSettings, PlaybackState,
};
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let cli = Cli::parse();

    let file_logging_enabled = check_file_logging_enabled();
    init_tracing(file_logging_enabled);

    // Load config or create template on first run
    let config = match MushafConfig::load_or_create() {
        Ok(config) => config,
        Err(CoreError::ConfigNotFound { path }) => {
            eprintln!(
                "A configuration file has been created at {}.\nReview it and run the command again.",
                path.display()
            );
            std::process::exit(0);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    // Create shared cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    let ctrlc_token = cancel_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, shutting down gracefully...");
        ctrlc_token.cancel();
    }) {
        error!("Failed to set Ctrl+C handler: {}", e);
    }

    let result = runtime.block_on(run(cli.command, config, cancel_token));
    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(command: Command, config: MushafConfig, cancel_token: CancellationToken) -> mushaf_core::Result<()> {
    let service = PageService::open(&config, None).await?;

    if !matches!(command, Command::Warm) && service.start_background().is_some() {
        info!("Warming up pages in the background");
    }

    let outcome = match command {
        Command::Page { number } => {
            let page = service.get_page(number).await;
            print_page(&page);
            Ok(())
        }
        Command::Warm => {
            warm_up(&service, &cancel_token).await;
            Ok(())
        }
        Command::Play { number } => play_page(&service, &config, number, &cancel_token).await,
    };

    service.dispose();
    outcome
}

fn print_page(page: &MushafPage) {
    if page.is_empty() {
        println!("Page {} has no lines", page.page_number);
        return;
    }

    println!("Page {}", page.page_number);
    for line in &page.lines {
        let text: String = page
            .segments_on_line(line.line_number)
            .map(|(_, segment)| segment.text.as_str())
            .collect();
        println!("{:>3} {:<10} {}", line.line_number, line.line_type.as_str(), text.trim_end());
    }

    println!();
    for ayah in &page.ayahs {
        println!(
            "{}:{} {:?} lines {}-{}, {} words",
            ayah.surah,
            ayah.ayah,
            ayah.kind,
            ayah.start_line_number,
            ayah.end_line_number,
            ayah.word_count()
        );
    }
}

async fn warm_up(service: &Arc<PageService>, cancel_token: &CancellationToken) {
    let handle = service.warm_up();
    tokio::select! {
        () = cancel_token.cancelled() => {
            service.dispose();
        }
        result = handle => {
            match result {
                Ok(built) => info!("Built {} pages ({} cached)", built, service.cache().len()),
                Err(e) => error!("Warm-up task failed: {e}"),
            }
        }
    }
}

async fn play_page(
    service: &Arc<PageService>,
    config: &MushafConfig,
    page_number: u32,
    cancel_token: &CancellationToken,
) -> mushaf_core::Result<()> {
    let page = service.get_page(page_number).await;
    let queue = page.recitation_queue();
    if queue.is_empty() {
        warn!("Page {} has nothing to recite", page_number);
        return Ok(());
    }

    let _preload = service.preload_around(page_number);

    let timings = Arc::new(
        AudioTimingStore::load(&config.audio.manifest_path, config.audio.base_url.as_deref()).await?,
    );
    let fetcher = Arc::new(HttpAudioFetcher::new(Duration::from_secs(config.audio.download_timeout_secs))?);
    let audio_cache = Arc::new(AudioCache::new(
        &config.audio.cache_dir,
        config.audio.max_cached_files,
        fetcher,
    ));

    let (events_tx, events_rx) = event_channel();
    let ayah_keys: Vec<(u16, u16)> = queue.iter().map(|a| (a.surah, a.ayah)).collect();
    let player = Arc::new(SimulatedPlayer::new(events_tx, &timings, &ayah_keys));

    let engine = PlaybackEngine::new(
        timings,
        audio_cache,
        player,
        events_rx,
        PlaybackSettings::from(&config.audio),
    );
    let engine_handle = engine.clone().start();

    let printer = tokio::spawn(print_highlights(engine.clone(), page.clone()));
    let mut states = engine.subscribe_state()?;

    engine.play_page_ayahs(queue).await;

    loop {
        if engine.state().await == PlaybackState::Stopped {
            break;
        }
        tokio::select! {
            () = cancel_token.cancelled() => break,
            state = states.recv() => match state {
                Ok(PlaybackState::Stopped) | Err(RecvError::Closed) => break,
                _ => {}
            },
        }
    }

    engine.dispose().await;
    let _ = engine_handle.await;
    let _ = printer.await;
    Ok(())
}

/// Print every highlighted word with its text until the engine is disposed
async fn print_highlights(engine: Arc<PlaybackEngine>, page: Arc<MushafPage>) {
    let (Ok(mut highlights), Ok(mut ayahs)) = (engine.subscribe_highlight(), engine.subscribe_current_ayah()) else {
        return;
    };

    loop {
        tokio::select! {
            ayah = ayahs.recv() => match ayah {
                Ok(Some(ayah)) => println!("-- {ayah}"),
                Ok(None) => {}
                Err(RecvError::Lagged(n)) => warn!("Missed {} ayah updates", n),
                Err(RecvError::Closed) => break,
            },
            word = highlights.recv() => match word {
                Ok(Some(word)) => {
                    let text = page
                        .ayah(word.surah, word.ayah)
                        .and_then(|a| a.words().nth(usize::try_from(word.word).unwrap_or(usize::MAX).saturating_sub(1)))
                        .map_or("", |w| w.text.as_str());
                    println!("   {word} {text}");
                }
                Ok(None) => {}
                Err(RecvError::Lagged(n)) => warn!("Missed {} highlight updates", n),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Check if file logging is enabled by reading the config file.
/// This is done before full config loading to set up tracing first.
/// Returns `false` if config doesn't exist or can't be parsed.
fn check_file_logging_enabled() -> bool {
    #[derive(serde::Deserialize)]
    struct PartialConfig {
        #[serde(default)]
        logging: PartialLoggingConfig,
    }
    #[derive(serde::Deserialize, Default)]
    struct PartialLoggingConfig {
        #[serde(default)]
        file: bool,
    }

    let config_path = MushafConfig::config_path();
    let Ok(content) = std::fs::read_to_string(&config_path) else {
        return false;
    };

    toml::from_str::<PartialConfig>(&content)
        .map(|c| c.logging.file)
        .unwrap_or(false)
}

/// Initialize tracing with console output and optional file logging
fn init_tracing(file_logging_enabled: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if file_logging_enabled {
        let log_path = mushaf_core::log_file_path();

        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        match File::create(&log_path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt_layer)
                    .with(file_layer)
                    .init();

                return;
            }
            Err(e) => {
                eprintln!("Failed to create log file at {}: {e}", log_path.display());
            }
        }
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
