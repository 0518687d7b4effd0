use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::geometry::{PageSize, Rect, TextSpan, Viewport, MAX_SCALE, MIN_SCALE};
use crate::page::{PageState, PageTable};
use crate::scheduler::RenderScheduler;
use crate::selection::SelectionCapturer;
use crate::visibility::{layout_pages, total_height, PageBand, VisibilityTracker};
use crate::{
    DocumentInfo, DocumentProvider, EventQueue, LoadState, RasterImage, RenderError, ViewerEvent,
};

#[derive(Debug, Clone, Copy)]
pub struct ViewerConfig {
    /// Pages within this many presentation pixels of the viewport are
    /// rendered ahead of time so scrolling never exposes blank pages.
    pub prefetch_margin: f32,
    /// Vertical gap between stacked pages, presentation pixels.
    pub page_gap: f32,
    /// Scale delta applied by one zoom step.
    pub zoom_step: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            prefetch_margin: 500.0,
            page_gap: 16.0,
            zoom_step: 0.25,
        }
    }
}

/// Orchestrates the render pipeline for one open document: load
/// lifecycle, zoom and navigation, visibility-driven rendering, and
/// outward event emission. The render backend arrives by injection;
/// process-wide defaults belong to the application entry point.
pub struct DocumentViewer {
    provider: Arc<dyn DocumentProvider>,
    config: ViewerConfig,
    events: EventQueue,
    capturer: SelectionCapturer,
    tracker: VisibilityTracker,
    load_state: LoadState,
    info: Option<DocumentInfo>,
    native_sizes: Vec<PageSize>,
    bands: Vec<PageBand>,
    pages: Arc<Mutex<PageTable>>,
    scheduler: Option<RenderScheduler>,
    scale: f32,
    scroll_y: f32,
    viewport_extent: Option<f32>,
    current_page: u16,
}

impl DocumentViewer {
    pub fn new(provider: Arc<dyn DocumentProvider>, config: ViewerConfig) -> Self {
        Self {
            provider,
            tracker: VisibilityTracker::new(config.prefetch_margin),
            config,
            events: EventQueue::new(),
            capturer: SelectionCapturer,
            load_state: LoadState::Unloaded,
            info: None,
            native_sizes: Vec::new(),
            bands: Vec::new(),
            pages: Arc::new(Mutex::new(PageTable::new(&[]))),
            scheduler: None,
            scale: 1.0,
            scroll_y: 0.0,
            viewport_extent: None,
            current_page: 0,
        }
    }

    /// Loads a document and creates every page placeholder up front.
    /// A load failure is terminal for this viewer instance: it is
    /// reported once via `load-failed` and all later calls no-op.
    #[instrument(skip(self))]
    pub async fn open(&mut self, source: &str) -> Result<(), RenderError> {
        if self.load_state != LoadState::Unloaded {
            warn!(source, "open ignored: viewer already holds a document");
            return Ok(());
        }

        self.load_state = LoadState::Loading;
        let backend = match self.provider.open(source).await {
            Ok(backend) => backend,
            Err(err) => {
                self.load_state = LoadState::Failed;
                warn!(source, error = %err, "document load failed");
                self.events.push(ViewerEvent::LoadFailed {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        let info = backend.info().clone();
        debug!(source, pages = info.page_count, "document loaded");
        self.native_sizes = backend.page_sizes().to_vec();
        self.bands = layout_pages(&self.native_sizes, self.scale, self.config.page_gap);
        self.pages = Arc::new(Mutex::new(PageTable::new(&self.native_sizes)));
        self.scheduler = Some(RenderScheduler::new(
            backend,
            Arc::clone(&self.pages),
            self.events.clone(),
        ));
        self.current_page = if info.page_count > 0 { 1 } else { 0 };
        self.info = Some(info);
        self.scroll_y = 0.0;
        self.load_state = LoadState::Loaded;
        self.tracker.attach();
        self.evaluate_visibility();
        Ok(())
    }

    /// Tears the viewer down: cancels in-flight renders and detaches
    /// the visibility tracker so no stale callback can fire.
    pub fn close(&mut self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel_all();
        }
        self.tracker.detach();
        self.scheduler = None;
        self.info = None;
        self.native_sizes.clear();
        self.bands.clear();
        self.pages = Arc::new(Mutex::new(PageTable::new(&[])));
        self.current_page = 0;
        self.scroll_y = 0.0;
        self.load_state = LoadState::Unloaded;
    }

    /// Clamps to the supported zoom range. On an effective change all
    /// pages go stale and in-flight renders are cancelled before any
    /// render at the new scale is requested.
    pub fn set_scale(&mut self, scale: f32) {
        if self.load_state == LoadState::Failed {
            return;
        }
        let clamped = scale.clamp(MIN_SCALE, MAX_SCALE);
        if (clamped - self.scale).abs() < f32::EPSILON {
            return;
        }

        let previous_total = self.total_height();
        let ratio = if previous_total > 0.0 {
            self.scroll_y / previous_total
        } else {
            0.0
        };

        self.scale = clamped;
        if let Some(scheduler) = &self.scheduler {
            scheduler.invalidate_all();
            self.bands = layout_pages(&self.native_sizes, self.scale, self.config.page_gap);
            self.scroll_y = ratio * self.total_height();
            self.clamp_scroll();
        }
        self.events.push(ViewerEvent::ScaleChanged { scale: clamped });
        self.evaluate_visibility();
    }

    pub fn zoom_in(&mut self) {
        self.set_scale(self.scale + self.config.zoom_step);
    }

    pub fn zoom_out(&mut self) {
        self.set_scale(self.scale - self.config.zoom_step);
    }

    pub fn reset_zoom(&mut self) {
        self.set_scale(1.0);
    }

    /// 1-based navigation; out-of-range targets are no-ops.
    pub fn go_to_page(&mut self, page: u16) {
        let Some(info) = &self.info else {
            return;
        };
        if page < 1 || page > info.page_count {
            return;
        }
        if let Some(band) = self.bands.get((page - 1) as usize) {
            self.scroll_y = band.top;
        }
        self.clamp_scroll();
        if page != self.current_page {
            self.current_page = page;
            self.events.push(ViewerEvent::PageChanged { page });
        }
        self.evaluate_visibility();
    }

    pub fn next_page(&mut self) {
        self.go_to_page(self.current_page.saturating_add(1));
    }

    pub fn prev_page(&mut self) {
        if self.current_page > 1 {
            self.go_to_page(self.current_page - 1);
        }
    }

    /// Reports the viewport height. Visibility evaluation stays dormant
    /// until the host has called this once; placeholders registered at
    /// load carry no geometry of their own.
    pub fn set_viewport_extent(&mut self, extent: f32) {
        if self.load_state == LoadState::Failed {
            return;
        }
        self.viewport_extent = Some(extent.max(1.0));
        self.clamp_scroll();
        self.evaluate_visibility();
    }

    pub fn scroll_to(&mut self, y: f32) {
        if self.info.is_none() {
            return;
        }
        self.scroll_y = y;
        self.clamp_scroll();
        let page = self.page_under_center();
        if page != 0 && page != self.current_page {
            self.current_page = page;
            self.events.push(ViewerEvent::PageChanged { page });
        }
        self.evaluate_visibility();
    }

    /// Pointer released inside a page's overlay: trims the platform
    /// selection and reports it outward when non-empty.
    pub fn complete_selection(&mut self, page: u16, raw: &str, bounds: Option<Rect>) {
        let Some(info) = &self.info else {
            return;
        };
        if page < 1 || page > info.page_count {
            return;
        }
        if let Some(selection) = self.capturer.capture(page, raw, bounds) {
            self.events.push(ViewerEvent::TextSelected {
                text: selection.text,
                page: selection.page,
            });
        }
    }

    /// Awaits every in-flight render. Hosts call this when they need a
    /// settled page table (tests, batch export).
    pub async fn drain_renders(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.drain().await;
        }
    }

    pub fn events(&self) -> EventQueue {
        self.events.clone()
    }

    pub fn info(&self) -> Option<&DocumentInfo> {
        self.info.as_ref()
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn current_page(&self) -> u16 {
        self.current_page
    }

    pub fn page_count(&self) -> u16 {
        self.info.as_ref().map(|info| info.page_count).unwrap_or(0)
    }

    pub fn page_state(&self, page: u16) -> Option<PageState> {
        self.pages.lock().get(page).map(|page| page.state())
    }

    /// Snapshot of a rendered page's raster, if current.
    pub fn rendered_raster(&self, page: u16) -> Option<RasterImage> {
        let table = self.pages.lock();
        let page = table.get(page)?;
        match page.state() {
            PageState::Rendered { .. } => Some(RasterImage {
                width: page.surface().width(),
                height: page.surface().height(),
                pixels: page.surface().pixels().to_vec(),
            }),
            _ => None,
        }
    }

    /// Snapshot of a page's overlay spans.
    pub fn overlay_spans(&self, page: u16) -> Vec<TextSpan> {
        self.pages
            .lock()
            .get(page)
            .map(|page| page.overlay().spans().to_vec())
            .unwrap_or_default()
    }

    fn total_height(&self) -> f32 {
        total_height(&self.bands, self.config.page_gap)
    }

    fn clamp_scroll(&mut self) {
        let extent = self.viewport_extent.unwrap_or(0.0);
        let max_scroll = (self.total_height() - extent).max(0.0);
        self.scroll_y = self.scroll_y.clamp(0.0, max_scroll);
    }

    fn page_under_center(&self) -> u16 {
        let extent = self.viewport_extent.unwrap_or(0.0);
        let center = self.scroll_y + extent / 2.0;
        self.bands
            .iter()
            .find(|band| center < band.bottom())
            .or(self.bands.last())
            .map(|band| band.number)
            .unwrap_or(0)
    }

    fn evaluate_visibility(&self) {
        let Some(scheduler) = self.scheduler.as_ref() else {
            return;
        };
        let Some(extent) = self.viewport_extent else {
            return;
        };
        let batch = self
            .tracker
            .intersections(&self.bands, self.scroll_y, extent);
        for number in batch {
            let Some(native) = self.native_sizes.get((number - 1) as usize) else {
                continue;
            };
            scheduler.request_render(number, Viewport::compute(*native, self.scale));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{TextRun, Transform};
    use crate::{
        document_id_for_source, CancelFlag, DocumentMetadata, RenderBackend, RenderOutcome,
    };
    use tokio::sync::{Notify, Semaphore};

    fn doc_info(source: &str, pages: u16) -> DocumentInfo {
        DocumentInfo {
            id: document_id_for_source(source),
            source: source.to_string(),
            page_count: pages,
            metadata: DocumentMetadata::default(),
        }
    }

    fn raster_for(size: PageSize, viewport: &Viewport) -> RasterImage {
        RasterImage {
            width: (size.width * viewport.scale).round() as u32,
            height: (size.height * viewport.scale).round() as u32,
            pixels: vec![0; 4],
        }
    }

    fn sample_run() -> TextRun {
        TextRun {
            content: "Abstract".to_string(),
            transform: Transform {
                a: 12.0,
                b: 0.0,
                c: 0.0,
                d: 12.0,
                e: 72.0,
                f: 700.0,
            },
            font_family: None,
        }
    }

    struct FakeBackend {
        info: DocumentInfo,
        sizes: Vec<PageSize>,
        gate: Option<(Arc<Notify>, Arc<Semaphore>)>,
    }

    #[async_trait::async_trait]
    impl RenderBackend for FakeBackend {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn page_sizes(&self) -> &[PageSize] {
            &self.sizes
        }

        async fn render_page(
            &self,
            page: u16,
            viewport: &Viewport,
            cancel: &CancelFlag,
        ) -> RenderOutcome {
            if let Some((started, release)) = &self.gate {
                started.notify_one();
                let permit = release.acquire().await.expect("semaphore closed");
                permit.forget();
            }
            if cancel.is_cancelled() {
                return RenderOutcome::Cancelled;
            }
            RenderOutcome::Completed(raster_for(self.sizes[(page - 1) as usize], viewport))
        }

        async fn text_runs(&self, _page: u16) -> Result<Vec<TextRun>, RenderError> {
            Ok(vec![sample_run()])
        }
    }

    struct FakeProvider {
        sizes: Vec<PageSize>,
        gate: Option<(Arc<Notify>, Arc<Semaphore>)>,
    }

    impl FakeProvider {
        fn instant(sizes: Vec<PageSize>) -> Arc<Self> {
            Arc::new(Self { sizes, gate: None })
        }

        fn gated(sizes: Vec<PageSize>) -> (Arc<Self>, Arc<Notify>, Arc<Semaphore>) {
            let started = Arc::new(Notify::new());
            let release = Arc::new(Semaphore::new(0));
            let provider = Arc::new(Self {
                sizes,
                gate: Some((Arc::clone(&started), Arc::clone(&release))),
            });
            (provider, started, release)
        }
    }

    #[async_trait::async_trait]
    impl DocumentProvider for FakeProvider {
        async fn open(&self, source: &str) -> Result<Arc<dyn RenderBackend>, RenderError> {
            Ok(Arc::new(FakeBackend {
                info: doc_info(source, self.sizes.len() as u16),
                sizes: self.sizes.clone(),
                gate: self.gate.clone(),
            }))
        }
    }

    struct FailingProvider;

    #[async_trait::async_trait]
    impl DocumentProvider for FailingProvider {
        async fn open(&self, _source: &str) -> Result<Arc<dyn RenderBackend>, RenderError> {
            Err(RenderError::Load("not a PDF header".to_string()))
        }
    }

    fn letter(pages: usize) -> Vec<PageSize> {
        vec![PageSize::new(612.0, 792.0); pages]
    }

    fn tall(pages: usize) -> Vec<PageSize> {
        vec![PageSize::new(100.0, 2000.0); pages]
    }

    fn rendered_at(state: Option<PageState>, expected: f32) -> bool {
        matches!(state, Some(PageState::Rendered { scale }) if (scale - expected).abs() < f32::EPSILON)
    }

    #[tokio::test]
    async fn open_creates_placeholders_up_front() {
        let mut viewer = DocumentViewer::new(FakeProvider::instant(letter(3)), ViewerConfig::default());
        viewer.open("paper.pdf").await.unwrap();

        assert_eq!(viewer.load_state(), LoadState::Loaded);
        assert_eq!(viewer.page_count(), 3);
        assert_eq!(viewer.current_page(), 1);
        for page in 1..=3 {
            assert_eq!(viewer.page_state(page), Some(PageState::Idle));
        }
        // No geometry reported yet, so nothing renders.
        viewer.drain_renders().await;
        assert_eq!(viewer.page_state(1), Some(PageState::Idle));
    }

    #[tokio::test]
    async fn load_failure_is_terminal_and_reported_once() {
        let mut viewer = DocumentViewer::new(Arc::new(FailingProvider), ViewerConfig::default());
        assert!(viewer.open("broken.pdf").await.is_err());
        assert_eq!(viewer.load_state(), LoadState::Failed);

        let drained = viewer.events().drain();
        assert_eq!(
            drained,
            vec![ViewerEvent::LoadFailed {
                reason: "failed to open document source: not a PDF header".to_string(),
            }]
        );

        // Terminal: later calls are inert.
        viewer.set_scale(2.0);
        viewer.go_to_page(1);
        viewer.set_viewport_extent(400.0);
        assert!(viewer.events().is_empty());
    }

    #[tokio::test]
    async fn zoom_is_clamped_to_supported_range() {
        let mut viewer = DocumentViewer::new(FakeProvider::instant(letter(1)), ViewerConfig::default());
        viewer.open("paper.pdf").await.unwrap();

        for _ in 0..20 {
            viewer.zoom_in();
        }
        assert!((viewer.scale() - MAX_SCALE).abs() < f32::EPSILON);

        for _ in 0..40 {
            viewer.zoom_out();
        }
        assert!((viewer.scale() - MIN_SCALE).abs() < f32::EPSILON);

        viewer.set_scale(10.0);
        assert!((viewer.scale() - MAX_SCALE).abs() < f32::EPSILON);
        viewer.set_scale(0.01);
        assert!((viewer.scale() - MIN_SCALE).abs() < f32::EPSILON);

        viewer.reset_zoom();
        assert!((viewer.scale() - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn zoom_stales_rendered_pages_before_any_new_render() {
        let mut viewer = DocumentViewer::new(FakeProvider::instant(tall(2)), ViewerConfig::default());
        viewer.open("paper.pdf").await.unwrap();
        viewer.set_viewport_extent(400.0);
        viewer.drain_renders().await;
        assert!(rendered_at(viewer.page_state(1), 1.0));
        assert_eq!(viewer.page_state(2), Some(PageState::Idle));

        viewer.set_scale(2.0);
        // Before the new render completes, nothing may remain rendered
        // at the old scale.
        assert!(!rendered_at(viewer.page_state(1), 1.0));
        assert_eq!(viewer.page_state(1), Some(PageState::Rendering));
        assert_eq!(viewer.page_state(2), Some(PageState::Idle));

        viewer.drain_renders().await;
        assert!(rendered_at(viewer.page_state(1), 2.0));
    }

    #[tokio::test]
    async fn only_the_visible_page_renders() {
        let mut viewer = DocumentViewer::new(FakeProvider::instant(tall(3)), ViewerConfig::default());
        viewer.open("paper.pdf").await.unwrap();

        // Scroll deep into page 2 before reporting geometry, so the
        // first evaluation sees only page 2 within the margin.
        viewer.scroll_to(2032.0 + 600.0);
        viewer.set_viewport_extent(400.0);
        viewer.drain_renders().await;

        assert!(rendered_at(viewer.page_state(2), 1.0));
        assert_eq!(viewer.page_state(1), Some(PageState::Idle));
        assert_eq!(viewer.page_state(3), Some(PageState::Idle));
        assert_eq!(viewer.current_page(), 2);
    }

    #[tokio::test]
    async fn zoom_mid_render_completes_at_the_new_scale() {
        let (provider, started, release) = FakeProvider::gated(letter(1));
        let mut viewer = DocumentViewer::new(provider, ViewerConfig::default());
        viewer.open("paper.pdf").await.unwrap();
        viewer.set_scale(1.5);
        viewer.set_viewport_extent(900.0);
        started.notified().await;
        assert_eq!(viewer.page_state(1), Some(PageState::Rendering));

        viewer.set_scale(2.25);
        release.add_permits(2);
        viewer.drain_renders().await;

        assert!(rendered_at(viewer.page_state(1), 2.25));
        let raster = viewer.rendered_raster(1).unwrap();
        assert_eq!(raster.width, (612.0_f32 * 2.25).round() as u32);

        // Cancellation stays silent: no render-failure event.
        assert!(viewer
            .events()
            .drain()
            .iter()
            .all(|event| !matches!(event, ViewerEvent::PageRenderFailed { .. })));
    }

    #[tokio::test]
    async fn navigation_is_clamped_to_document_bounds() {
        let mut viewer = DocumentViewer::new(FakeProvider::instant(letter(3)), ViewerConfig::default());
        viewer.open("paper.pdf").await.unwrap();
        viewer.set_viewport_extent(400.0);
        viewer.events().drain();

        viewer.go_to_page(0);
        assert_eq!(viewer.current_page(), 1);
        viewer.go_to_page(4);
        assert_eq!(viewer.current_page(), 1);

        viewer.go_to_page(3);
        assert_eq!(viewer.current_page(), 3);
        viewer.next_page();
        assert_eq!(viewer.current_page(), 3);

        viewer.prev_page();
        viewer.prev_page();
        assert_eq!(viewer.current_page(), 1);
        viewer.prev_page();
        assert_eq!(viewer.current_page(), 1);
    }

    #[tokio::test]
    async fn completed_selection_is_reported_with_page_context() {
        let mut viewer = DocumentViewer::new(FakeProvider::instant(letter(5)), ViewerConfig::default());
        viewer.open("paper.pdf").await.unwrap();

        viewer.complete_selection(4, "  the scaling laws hold \n", None);
        viewer.complete_selection(2, "   ", None);
        viewer.complete_selection(9, "out of range", None);

        assert_eq!(
            viewer.events().drain(),
            vec![ViewerEvent::TextSelected {
                text: "the scaling laws hold".to_string(),
                page: 4,
            }]
        );
    }

    #[tokio::test]
    async fn rendered_page_exposes_raster_and_overlay() {
        let mut viewer = DocumentViewer::new(FakeProvider::instant(letter(1)), ViewerConfig::default());
        viewer.open("paper.pdf").await.unwrap();
        viewer.set_viewport_extent(900.0);
        viewer.drain_renders().await;

        let raster = viewer.rendered_raster(1).unwrap();
        assert_eq!(raster.width, 612);
        assert_eq!(raster.height, 792);

        let spans = viewer.overlay_spans(1);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].content, "Abstract");
    }

    #[tokio::test]
    async fn close_detaches_the_tracker_and_resets_state() {
        let mut viewer = DocumentViewer::new(FakeProvider::instant(letter(2)), ViewerConfig::default());
        viewer.open("paper.pdf").await.unwrap();
        viewer.set_viewport_extent(400.0);
        viewer.drain_renders().await;
        viewer.events().drain();

        viewer.close();
        assert_eq!(viewer.load_state(), LoadState::Unloaded);
        assert_eq!(viewer.page_count(), 0);
        assert!(viewer.page_state(1).is_none());

        viewer.go_to_page(1);
        viewer.scroll_to(100.0);
        assert!(viewer.events().is_empty());
    }
}
