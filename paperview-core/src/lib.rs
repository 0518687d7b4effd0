use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod geometry;
pub mod page;
pub mod scheduler;
pub mod selection;
pub mod text_layer;
pub mod viewer;
pub mod visibility;

pub use geometry::{
    project_text_run, PageSize, Rect, TextRun, TextSpan, Transform, Viewport, MAX_SCALE, MIN_SCALE,
};
pub use page::{OverlayContainer, Page, PageState, PageTable, RasterSurface};
pub use scheduler::RenderScheduler;
pub use selection::{Selection, SelectionCapturer};
pub use viewer::{DocumentViewer, ViewerConfig};
pub use visibility::{layout_pages, PageBand, VisibilityTracker};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("9d4a7c30-52bd-5b8e-9c1f-6e0a84d2f3b7").expect("valid namespace UUID")
});

pub fn document_id_for_source(source: &str) -> DocumentId {
    Uuid::new_v5(&DOCUMENT_NAMESPACE, source.as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub source: String,
    pub page_count: u16,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to open document source: {0}")]
    Load(String),
    #[error("failed to rasterize page {page}: {reason}")]
    Raster { page: u16, reason: String },
    #[error("failed to extract text for page {page}: {reason}")]
    TextExtraction { page: u16, reason: String },
}

/// Outcome of one render attempt. Cancellation is an expected result,
/// not an error, and is never reported to the host.
#[derive(Debug)]
pub enum RenderOutcome {
    Completed(RasterImage),
    Cancelled,
    Failed(RenderError),
}

/// Cooperative cancellation signal shared between the scheduler and one
/// in-flight render. Cancelling is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ViewerEvent {
    TextSelected { text: String, page: u16 },
    LoadFailed { reason: String },
    PageRenderFailed { page: u16, reason: String },
    PageRendered { page: u16, scale: f32 },
    ScaleChanged { scale: f32 },
    PageChanged { page: u16 },
}

/// Outbound event channel to the host. The host drains it at its own
/// pace; the viewer never calls back into host code.
#[derive(Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<Vec<ViewerEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: ViewerEvent) {
        self.inner.lock().push(event);
    }

    pub fn drain(&self) -> Vec<ViewerEvent> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[async_trait::async_trait]
pub trait RenderBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;

    /// Native page dimensions, one entry per page in document order.
    fn page_sizes(&self) -> &[PageSize];

    /// Rasterize one page at the viewport's scale. The backend checks
    /// `cancel` at its suspension points; a backend that cannot abort
    /// mid-raster may finish the work and still return `Cancelled`.
    async fn render_page(&self, page: u16, viewport: &Viewport, cancel: &CancelFlag)
        -> RenderOutcome;

    /// Extract the page's text runs in native coordinates.
    async fn text_runs(&self, page: u16) -> Result<Vec<TextRun>, RenderError>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, source: &str) -> Result<Arc<dyn RenderBackend>, RenderError>;
}
