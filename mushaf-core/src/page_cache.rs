//! Bounded cache of assembled pages with in-flight build memoization.
//!
//! Navigation, range preloading and whole-book warm-up may all ask for the same
//! page at once. The first request starts the build and parks a shared future in
//! the in-flight table; every other request for that page awaits the same future,
//! so a page is assembled at most once per cache generation.

use crate::error::CoreError;
use crate::page::MushafPage;
use crate::renderer::Renderer;
use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

const LOG_TARGET: &str = "mushaf::page_cache";

/// Outcome of a page build shared between concurrent waiters
pub type BuildResult = Result<Arc<MushafPage>, Arc<CoreError>>;

type InFlight = Shared<BoxFuture<'static, BuildResult>>;

struct CacheState {
    pages: LruCache<u32, Arc<MushafPage>>,
    in_flight: HashMap<u32, (u64, InFlight)>,
    fonts: HashSet<(Renderer, u32)>,
    /// Bumped by `clear`; builds from an older generation are not stored
    generation: u64,
}

/// LRU cache of assembled pages plus per-page font registration flags
pub struct PageCache {
    state: Mutex<CacheState>,
}

impl PageCache {
    /// Create a cache holding at most `capacity` pages (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                pages: LruCache::new(capacity),
                in_flight: HashMap::new(),
                fonts: HashSet::new(),
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a cached page, marking it most recently used
    #[must_use]
    pub fn get(&self, page_number: u32) -> Option<Arc<MushafPage>> {
        self.lock().pages.get(&page_number).cloned()
    }

    /// Insert a page, evicting the least recently used one when full
    pub fn put(&self, page_number: u32, page: Arc<MushafPage>) {
        let mut state = self.lock();
        if let Some((evicted, _)) = state.pages.push(page_number, page) {
            if evicted != page_number {
                debug!(target: LOG_TARGET, "Evicted page {} from cache", evicted);
            }
        }
    }

    /// Whether a page is cached, without touching its recency
    #[must_use]
    pub fn contains(&self, page_number: u32) -> bool {
        self.lock().pages.contains(&page_number)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().pages.cap().get()
    }

    /// Return the cached page or build it, sharing one build among concurrent callers.
    ///
    /// `build` is only invoked when the page is neither cached nor already being
    /// built. Failed builds are handed to every waiter but never cached.
    ///
    /// # Errors
    ///
    /// Returns the build error, shared between all callers that awaited it.
    pub async fn get_or_build<F, Fut>(&self, page_number: u32, build: F) -> BuildResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<MushafPage, CoreError>> + Send + 'static,
    {
        let (generation, shared) = {
            let mut state = self.lock();
            if let Some(page) = state.pages.get(&page_number) {
                return Ok(page.clone());
            }
            if let Some((generation, shared)) = state.in_flight.get(&page_number) {
                debug!(target: LOG_TARGET, "Joining in-flight build of page {}", page_number);
                (*generation, shared.clone())
            } else {
                let generation = state.generation;
                let shared = build()
                    .map(|result| result.map(Arc::new).map_err(Arc::new))
                    .boxed()
                    .shared();
                state.in_flight.insert(page_number, (generation, shared.clone()));
                (generation, shared)
            }
        };

        let result = shared.clone().await;

        let mut state = self.lock();
        if state.generation == generation {
            if matches!(state.in_flight.get(&page_number), Some((_, current)) if current.ptr_eq(&shared)) {
                state.in_flight.remove(&page_number);
            }
            if let Ok(ref page) = result {
                if !state.pages.contains(&page_number) {
                    state.pages.put(page_number, page.clone());
                }
            }
        }
        result
    }

    /// Whether the font for `(renderer, page)` has been registered
    #[must_use]
    pub fn is_font_registered(&self, renderer: Renderer, page_number: u32) -> bool {
        self.lock().fonts.contains(&(renderer, page_number))
    }

    pub fn mark_font_registered(&self, renderer: Renderer, page_number: u32) {
        self.lock().fonts.insert((renderer, page_number));
    }

    /// Forget every font registration
    pub fn clear_fonts(&self) {
        self.lock().fonts.clear();
    }

    /// Drop every page, font flag and in-flight build
    pub fn clear(&self) {
        let mut state = self.lock();
        state.pages.clear();
        state.in_flight.clear();
        state.fonts.clear();
        state.generation += 1;
        debug!(target: LOG_TARGET, "Page cache cleared (generation {})", state.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn page(n: u32) -> Arc<MushafPage> {
        Arc::new(MushafPage::empty(n))
    }

    #[test]
    fn test_put_evicts_least_recently_used() {
        let cache = PageCache::new(3);
        cache.put(1, page(1));
        cache.put(2, page(2));
        cache.put(3, page(3));

        // Touch 1 so 2 becomes the oldest
        assert!(cache.get(1).is_some());
        cache.put(4, page(4));

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(2));
        assert!(cache.contains(1));
        assert!(cache.contains(3));
        assert!(cache.contains(4));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let cache = PageCache::new(5);
        for n in 1..=50 {
            cache.put(n, page(n));
            assert!(cache.len() <= 5);
        }
        assert_eq!(cache.capacity(), 5);
        assert!((46..=50).all(|n| cache.contains(n)));
    }

    #[test]
    fn test_put_refreshes_recency() {
        let cache = PageCache::new(2);
        cache.put(1, page(1));
        cache.put(2, page(2));
        cache.put(1, page(1));
        cache.put(3, page(3));
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = PageCache::new(0);
        cache.put(1, page(1));
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_font_flags() {
        let cache = PageCache::new(4);
        cache.mark_font_registered(Renderer::QpcV2, 10);
        assert!(cache.is_font_registered(Renderer::QpcV2, 10));
        assert!(!cache.is_font_registered(Renderer::QpcV2, 11));
        assert!(!cache.is_font_registered(Renderer::DigitalKhatt, 10));

        cache.clear_fonts();
        assert!(!cache.is_font_registered(Renderer::QpcV2, 10));
    }

    #[tokio::test]
    async fn test_concurrent_builds_run_once() {
        let cache = Arc::new(PageCache::new(8));
        let builds = Arc::new(AtomicUsize::new(0));

        let request = |cache: Arc<PageCache>, builds: Arc<AtomicUsize>| async move {
            cache
                .get_or_build(7, move || async move {
                    builds.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(MushafPage::empty(7))
                })
                .await
        };

        let (a, b) = tokio::join!(
            request(cache.clone(), builds.clone()),
            request(cache.clone(), builds.clone())
        );

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert!(cache.contains(7));
    }

    #[tokio::test]
    async fn test_spawned_builds_run_once() {
        let cache = Arc::new(PageCache::new(8));
        let builds = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let builds = builds.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_build(3, move || async move {
                            builds.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(MushafPage::empty(3))
                        })
                        .await
                        .is_ok()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_page_skips_build() {
        let cache = PageCache::new(4);
        cache.put(9, page(9));
        let result = cache
            .get_or_build(9, || async { Err(CoreError::Disposed) })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_failed_build_is_not_cached() {
        let cache = PageCache::new(4);
        let result = cache
            .get_or_build(5, || async { Err(CoreError::EmptyPage { page: 5 }) })
            .await;
        assert!(result.is_err());
        assert!(!cache.contains(5));

        let retried = cache
            .get_or_build(5, || async { Ok(MushafPage::empty(5)) })
            .await;
        assert!(retried.is_ok());
        assert!(cache.contains(5));
    }

    #[tokio::test]
    async fn test_late_waiter_keeps_newer_build_in_flight() {
        let cache = PageCache::new(1);
        let builds = Arc::new(AtomicUsize::new(0));
        let (first_tx, first_rx) = tokio::sync::oneshot::channel::<()>();
        let (second_tx, second_rx) = tokio::sync::oneshot::channel::<()>();

        let mut starter = Box::pin(cache.get_or_build(1, move || async move {
            let _ = first_rx.await;
            Ok(MushafPage::empty(1))
        }));
        assert!(futures::poll!(starter.as_mut()).is_pending());
        let mut late = Box::pin(cache.get_or_build(1, || async { Err(CoreError::Disposed) }));
        assert!(futures::poll!(late.as_mut()).is_pending());

        let _ = first_tx.send(());
        assert!(starter.await.is_ok());

        // Evict page 1 and start a second build while the late waiter is still parked
        cache.put(2, page(2));
        let counted = builds.clone();
        let mut rebuild = Box::pin(cache.get_or_build(1, move || async move {
            counted.fetch_add(1, Ordering::SeqCst);
            let _ = second_rx.await;
            Ok(MushafPage::empty(1))
        }));
        assert!(futures::poll!(rebuild.as_mut()).is_pending());

        assert!(late.await.is_ok());
        cache.put(3, page(3));

        let counted = builds.clone();
        let mut joined = Box::pin(cache.get_or_build(1, move || async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(MushafPage::empty(1))
        }));
        assert!(futures::poll!(joined.as_mut()).is_pending());
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let _ = second_tx.send(());
        let (a, b) = tokio::join!(rebuild, joined);
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_discards_stale_build() {
        let cache = Arc::new(PageCache::new(4));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_build(1, move || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(MushafPage::empty(1))
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        cache.mark_font_registered(Renderer::QpcV2, 1);
        cache.clear();
        let _ = release_tx.send(());

        assert!(pending.await.unwrap().is_ok());
        assert!(!cache.contains(1));
        assert!(!cache.is_font_registered(Renderer::QpcV2, 1));
    }
}
