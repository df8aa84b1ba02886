//! Paged image gallery over the media cache.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::entities::{ImageHandle, ImageStatus, Priority};
use crate::domain::ports::MediaCachePort;
use crate::infrastructure::config::ZoomConfig;
use crate::presentation::zoom::{Size, ZoomViewController};

/// Pages on each side of the current one warmed in the background.
pub const DEFAULT_PREFETCH_RADIUS: usize = 1;

/// One gallery page.
#[derive(Debug, Clone)]
pub struct GalleryPage {
    /// Source URL as given to the gallery.
    pub url: String,
    /// Load state of the page.
    pub status: ImageStatus,
    /// Decoded image once ready.
    pub image: Option<ImageHandle>,
}

impl GalleryPage {
    fn new(url: String) -> Self {
        Self {
            url,
            status: ImageStatus::NotStarted,
            image: None,
        }
    }
}

/// Shows one page at a time, keeping neighbours warm.
pub struct GalleryViewer {
    cache: Arc<dyn MediaCachePort>,
    pages: Vec<GalleryPage>,
    current: usize,
    prefetch_radius: usize,
    zoom: ZoomViewController,
}

impl std::fmt::Debug for GalleryViewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GalleryViewer")
            .field("pages", &self.pages.len())
            .field("current", &self.current)
            .field("prefetch_radius", &self.prefetch_radius)
            .finish_non_exhaustive()
    }
}

impl GalleryViewer {
    /// Creates a gallery over `urls`. Nothing is loaded until a page is shown.
    #[must_use]
    pub fn new(cache: Arc<dyn MediaCachePort>, urls: Vec<String>, zoom: ZoomConfig) -> Self {
        Self {
            cache,
            pages: urls.into_iter().map(GalleryPage::new).collect(),
            current: 0,
            prefetch_radius: DEFAULT_PREFETCH_RADIUS,
            zoom: ZoomViewController::new(zoom),
        }
    }

    /// Sets how many pages on each side are prefetched.
    #[must_use]
    pub const fn with_prefetch_radius(mut self, radius: usize) -> Self {
        self.prefetch_radius = radius;
        self
    }

    /// Number of pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// True if the gallery has no pages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Index of the page last shown.
    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current
    }

    /// The page last shown.
    #[must_use]
    pub fn current_page(&self) -> Option<&GalleryPage> {
        self.pages.get(self.current)
    }

    /// Page at `index`, if in range.
    #[must_use]
    pub fn page(&self, index: usize) -> Option<&GalleryPage> {
        self.pages.get(index)
    }

    /// Zoom state of the current page.
    #[must_use]
    pub const fn zoom(&self) -> &ZoomViewController {
        &self.zoom
    }

    /// Gesture events for the current page go through here.
    pub const fn zoom_mut(&mut self) -> &mut ZoomViewController {
        &mut self.zoom
    }

    /// Shows the page at `index`.
    ///
    /// Resets the zoom, warms the neighbouring pages, then loads the page.
    /// A failed load leaves the page in `Failed`. Returns `None` if `index`
    /// is out of range.
    pub async fn show(&mut self, index: usize) -> Option<&GalleryPage> {
        if index >= self.pages.len() {
            return None;
        }
        self.current = index;
        self.zoom.set_image(Size::ZERO);

        let neighbours = self.neighbour_urls(index);
        if !neighbours.is_empty() {
            // Outcomes are not needed; dropping the handle detaches the work.
            drop(self.cache.prefetch(neighbours));
        }

        let url = self.pages[index].url.clone();
        self.pages[index].status = ImageStatus::Loading;
        debug!(index, url = %url, "Showing gallery page");

        match self.cache.fetch(&url, Priority::Normal).await {
            Ok(image) => {
                self.zoom
                    .set_image(Size::from_pixels(image.width(), image.height()));
                let page = &mut self.pages[index];
                page.status = ImageStatus::Ready;
                page.image = Some(image);
            }
            Err(e) => {
                warn!(index, url = %url, error = %e, "Gallery page failed to load");
                let page = &mut self.pages[index];
                page.status = ImageStatus::Failed(e.to_string());
                page.image = None;
            }
        }
        self.pages.get(index)
    }

    /// Shows the following page, if any.
    pub async fn next(&mut self) -> Option<&GalleryPage> {
        let index = self.current.checked_add(1)?;
        self.show(index).await
    }

    /// Shows the preceding page, if any.
    pub async fn previous(&mut self) -> Option<&GalleryPage> {
        let index = self.current.checked_sub(1)?;
        self.show(index).await
    }

    /// Drops every cached copy of the current page and loads it again.
    pub async fn reload(&mut self) -> Option<&GalleryPage> {
        let url = self.pages.get(self.current)?.url.clone();
        self.cache.invalidate(&url).await;
        self.show(self.current).await
    }

    fn neighbour_urls(&self, index: usize) -> Vec<String> {
        let start = index.saturating_sub(self.prefetch_radius);
        let end = index
            .saturating_add(self.prefetch_radius)
            .min(self.pages.len().saturating_sub(1));
        (start..=end)
            .filter(|&i| i != index)
            .filter(|&i| !self.pages[i].status.is_ready())
            .map(|i| self.pages[i].url.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::CacheError;
    use crate::domain::ports::mocks::MockMediaCache;
    use crate::presentation::zoom::{Point, ZoomPhase};

    fn urls(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("https://img.example.com/listing/{i}.jpg"))
            .collect()
    }

    fn cache_with_all(n: usize) -> MockMediaCache {
        urls(n)
            .iter()
            .fold(MockMediaCache::new(), |cache, url| cache.with_image(url, 800, 600))
    }

    #[tokio::test]
    async fn test_show_loads_page_and_prefetches_neighbours() {
        let cache = Arc::new(cache_with_all(5));
        let mut gallery = GalleryViewer::new(cache.clone(), urls(5), ZoomConfig::default());

        let page = gallery.show(2).await.unwrap();

        assert!(page.status.is_ready());
        assert_eq!(page.image.as_ref().unwrap().width(), 800);
        assert_eq!(cache.fetches(), vec![(urls(5)[2].clone(), Priority::Normal)]);
        assert_eq!(cache.prefetched(), vec![urls(5)[1].clone(), urls(5)[3].clone()]);
    }

    #[tokio::test]
    async fn test_prefetch_radius_clipped_at_edges() {
        let cache = Arc::new(cache_with_all(4));
        let mut gallery = GalleryViewer::new(cache.clone(), urls(4), ZoomConfig::default())
            .with_prefetch_radius(2);

        gallery.show(0).await;

        assert_eq!(cache.prefetched(), vec![urls(4)[1].clone(), urls(4)[2].clone()]);
    }

    #[tokio::test]
    async fn test_ready_neighbours_not_prefetched_again() {
        let cache = Arc::new(cache_with_all(3));
        let mut gallery = GalleryViewer::new(cache.clone(), urls(3), ZoomConfig::default());

        gallery.show(0).await;
        gallery.next().await;

        assert_eq!(
            cache.prefetched(),
            vec![urls(3)[1].clone(), urls(3)[2].clone()]
        );
    }

    #[tokio::test]
    async fn test_failed_page_becomes_placeholder() {
        let url = urls(1)[0].clone();
        let cache = Arc::new(
            MockMediaCache::new().with_error(&url, CacheError::NetworkError("timeout".into())),
        );
        let mut gallery = GalleryViewer::new(cache, urls(1), ZoomConfig::default());

        let page = gallery.show(0).await.unwrap();

        assert!(page.status.is_failed());
        assert!(page.image.is_none());
        assert_eq!(gallery.zoom().phase(), ZoomPhase::Resting);
    }

    #[tokio::test]
    async fn test_navigation_stops_at_ends() {
        let cache = Arc::new(cache_with_all(2));
        let mut gallery = GalleryViewer::new(cache, urls(2), ZoomConfig::default());

        assert!(gallery.previous().await.is_none());
        assert!(gallery.next().await.is_some());
        assert_eq!(gallery.current_index(), 1);
        assert!(gallery.next().await.is_none());
        assert!(gallery.show(7).await.is_none());
        assert_eq!(gallery.current_index(), 1);
    }

    #[tokio::test]
    async fn test_page_change_resets_zoom() {
        let cache = Arc::new(cache_with_all(2));
        let mut gallery = GalleryViewer::new(cache, urls(2), ZoomConfig::default());
        gallery.show(0).await;
        gallery.zoom_mut().set_viewport(Size::new(400.0, 300.0));
        gallery.zoom_mut().pinch_by(Point::new(200.0, 150.0), 3.0);
        assert_eq!(gallery.zoom().phase(), ZoomPhase::Zoomed);

        gallery.next().await;

        assert_eq!(gallery.zoom().phase(), ZoomPhase::Resting);
        assert_eq!(gallery.zoom().offset(), Point::ZERO);
    }

    #[tokio::test]
    async fn test_reload_invalidates_current_page() {
        let cache = Arc::new(cache_with_all(1));
        let mut gallery = GalleryViewer::new(cache.clone(), urls(1), ZoomConfig::default());
        gallery.show(0).await;

        let page = gallery.reload().await.unwrap();

        assert!(page.status.is_ready());
        assert_eq!(cache.invalidated(), vec![urls(1)[0].clone()]);
        assert_eq!(cache.fetches().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_gallery() {
        let mut gallery =
            GalleryViewer::new(Arc::new(MockMediaCache::new()), Vec::new(), ZoomConfig::default());

        assert!(gallery.is_empty());
        assert!(gallery.show(0).await.is_none());
        assert!(gallery.reload().await.is_none());
    }
}
