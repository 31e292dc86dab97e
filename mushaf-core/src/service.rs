//! Page access for the presentation layer.
//!
//! `PageService` owns the assembler for the active renderer together with the
//! page cache, and runs range preloading and whole-book warm-up as background
//! tasks that pause every few pages and stop on cancellation.

use crate::assembler::PageAssembler;
use crate::config::{CacheConfig, MushafConfig};
use crate::error::Result;
use crate::page::MushafPage;
use crate::page_cache::PageCache;
use crate::renderer::{Renderer, MUSHAF_PAGE_COUNT};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "mushaf::service";

/// Font key used for renderers that share one font across every page
const SHARED_FONT_PAGE: u32 = 0;

/// Trait for making a font file available to the text renderer
#[async_trait]
pub trait FontRegistrar: Send + Sync {
    /// Returns a human-readable name for this registrar.
    fn name(&self) -> &'static str;

    /// Register the font at `path` under `family`.
    ///
    /// # Errors
    ///
    /// Returns an error if the font cannot be loaded.
    async fn register(&self, family: &str, path: &Path) -> Result<()>;
}

/// Assembled pages for the active renderer, cached and preloaded
pub struct PageService {
    assets_dir: PathBuf,
    cache_config: CacheConfig,
    assembler: RwLock<Arc<PageAssembler>>,
    cache: Arc<PageCache>,
    fonts: Option<Arc<dyn FontRegistrar>>,
    /// Cancels warm-up; replaced on renderer switch
    warm_up_token: Mutex<CancellationToken>,
    cancel_token: CancellationToken,
    disposed: AtomicBool,
}

impl PageService {
    /// Open the stores of the configured renderer
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the renderer's databases cannot be opened.
    pub async fn open(config: &MushafConfig, fonts: Option<Arc<dyn FontRegistrar>>) -> Result<Arc<Self>> {
        let assembler = PageAssembler::open(config.renderer.active, &config.renderer.assets_dir).await?;
        info!(
            target: LOG_TARGET,
            "Page service ready for renderer {}",
            config.renderer.active
        );
        Ok(Self::with_assembler(
            assembler,
            config.renderer.assets_dir.clone(),
            config.cache.clone(),
            fonts,
        ))
    }

    /// Build a service around an existing assembler
    #[must_use]
    pub fn with_assembler(
        assembler: PageAssembler,
        assets_dir: PathBuf,
        cache_config: CacheConfig,
        fonts: Option<Arc<dyn FontRegistrar>>,
    ) -> Arc<Self> {
        let cancel_token = CancellationToken::new();
        Arc::new(Self {
            assets_dir,
            cache: Arc::new(PageCache::new(cache_config.page_capacity)),
            cache_config,
            assembler: RwLock::new(Arc::new(assembler)),
            fonts,
            warm_up_token: Mutex::new(cancel_token.child_token()),
            cancel_token,
            disposed: AtomicBool::new(false),
        })
    }

    fn assembler(&self) -> Arc<PageAssembler> {
        self.assembler.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn warm_up_token(&self) -> CancellationToken {
        self.warm_up_token.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[must_use]
    pub fn renderer(&self) -> Renderer {
        self.assembler().renderer()
    }

    #[must_use]
    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Number of `build_page` calls made by the active renderer's assembler
    #[must_use]
    pub fn pages_built(&self) -> usize {
        self.assembler().pages_built()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Last page number of the active layout
    pub async fn page_count(&self) -> u32 {
        match self.assembler().page_count().await {
            Ok(0) => MUSHAF_PAGE_COUNT,
            Ok(count) => count,
            Err(e) => {
                warn!(target: LOG_TARGET, "Could not read page count, assuming {}: {}", MUSHAF_PAGE_COUNT, e);
                MUSHAF_PAGE_COUNT
            }
        }
    }

    /// Get an assembled page.
    ///
    /// A page that fails to build is logged and replaced by an empty page,
    /// which is not cached so the next request tries again.
    pub async fn get_page(&self, page_number: u32) -> Arc<MushafPage> {
        if self.is_disposed() {
            return Arc::new(MushafPage::empty(page_number));
        }

        let assembler = self.assembler();
        let result = self
            .cache
            .get_or_build(page_number, move || async move { assembler.build_page(page_number).await })
            .await;

        result.unwrap_or_else(|e| {
            warn!(target: LOG_TARGET, "Failed to build page {}: {}", page_number, e);
            Arc::new(MushafPage::empty(page_number))
        })
    }

    /// Assemble the pages around `page_number` in the background, nearest first.
    ///
    /// The task resolves to the number of pages it had to build.
    #[must_use]
    pub fn preload_around(self: &Arc<Self>, page_number: u32) -> tokio::task::JoinHandle<usize> {
        let service = Arc::clone(self);
        let token = self.cancel_token.child_token();
        tokio::spawn(async move {
            let last_page = service.page_count().await;
            let order = preload_order(page_number, service.cache_config.preload_radius, last_page);
            let built = service.build_pages(order, &token).await;
            debug!(target: LOG_TARGET, "Preloaded {} pages around {}", built, page_number);
            built
        })
    }

    /// Assemble every page of the book in the background.
    ///
    /// Cancelled by [`switch_renderer`](Self::switch_renderer) and
    /// [`dispose`](Self::dispose). Resolves to the number of pages built.
    #[must_use]
    pub fn warm_up(self: &Arc<Self>) -> tokio::task::JoinHandle<usize> {
        let service = Arc::clone(self);
        let token = self.warm_up_token();
        tokio::spawn(async move {
            let last_page = service.page_count().await;
            info!(target: LOG_TARGET, "Warming up {} pages", last_page);
            let built = service.build_pages(1..=last_page, &token).await;
            if token.is_cancelled() {
                info!(target: LOG_TARGET, "Warm-up cancelled after {} pages", built);
            } else {
                info!(target: LOG_TARGET, "Warm-up finished ({} pages built)", built);
            }
            built
        })
    }

    /// Start the background work the cache configuration asks for.
    ///
    /// Returns the warm-up task when `warm_up_on_start` is set.
    #[must_use]
    pub fn start_background(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<usize>> {
        self.cache_config.warm_up_on_start.then(|| self.warm_up())
    }

    /// Build the uncached pages in `pages`, pausing after every batch
    async fn build_pages(&self, pages: impl IntoIterator<Item = u32>, token: &CancellationToken) -> usize {
        let batch = self.cache_config.yield_every.max(1);
        let pause = self.cache_config.yield_pause();
        let mut built = 0_usize;
        let mut in_batch = 0_u32;

        for page_number in pages {
            if token.is_cancelled() || self.is_disposed() {
                break;
            }
            if self.cache.contains(page_number) {
                continue;
            }

            self.get_page(page_number).await;
            if let Err(e) = self.ensure_page_font(page_number).await {
                warn!(target: LOG_TARGET, "Font registration failed for page {}: {}", page_number, e);
            }
            built += 1;
            in_batch += 1;

            if in_batch >= batch {
                in_batch = 0;
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(pause) => {}
                }
            }
        }
        built
    }

    /// Switch to another renderer's stores, dropping every cached page and font.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the new renderer's databases cannot be
    /// opened; the current renderer stays active.
    pub async fn switch_renderer(&self, renderer: Renderer) -> Result<()> {
        if self.renderer() == renderer {
            return Ok(());
        }

        let assembler = PageAssembler::open(renderer, &self.assets_dir).await?;

        {
            let mut token = self.warm_up_token.lock().unwrap_or_else(PoisonError::into_inner);
            token.cancel();
            *token = self.cancel_token.child_token();
        }
        *self.assembler.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(assembler);
        self.cache.clear();

        info!(target: LOG_TARGET, "Switched renderer to {}", renderer);
        Ok(())
    }

    /// Register the font needed to draw `page_number`, once per renderer and font.
    ///
    /// Returns whether a registration happened.
    ///
    /// # Errors
    ///
    /// Returns the registrar's error; the font stays unregistered.
    pub async fn ensure_page_font(&self, page_number: u32) -> Result<bool> {
        let Some(ref fonts) = self.fonts else {
            return Ok(false);
        };

        let renderer = self.renderer();
        let key = if renderer.per_page_font() {
            page_number
        } else {
            SHARED_FONT_PAGE
        };
        if self.cache.is_font_registered(renderer, key) {
            return Ok(false);
        }

        let family = renderer.page_font_family(page_number);
        let path = self.assets_dir.join(renderer.page_font_file(page_number));
        fonts.register(&family, &path).await?;
        self.cache.mark_font_registered(renderer, key);

        debug!(target: LOG_TARGET, "Registered font {} via {}", family, fonts.name());
        Ok(true)
    }

    /// Stop background work and drop every cached page. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel_token.cancel();
        self.cache.clear();
        info!(target: LOG_TARGET, "Page service disposed");
    }
}

/// Pages within `radius` of `center`, nearest first, clamped to `1..=last_page`
fn preload_order(center: u32, radius: u32, last_page: u32) -> Vec<u32> {
    let mut order = Vec::new();
    if (1..=last_page).contains(&center) {
        order.push(center);
    }
    for distance in 1..=radius {
        if let Some(after) = center.checked_add(distance).filter(|p| *p <= last_page) {
            order.push(after);
        }
        if let Some(before) = center.checked_sub(distance).filter(|p| *p >= 1 && *p <= last_page) {
            order.push(before);
        }
    }
    order
}
