use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::geometry::{TextRun, Viewport};
use crate::page::{PageState, PageTable};
use crate::text_layer;
use crate::{CancelFlag, EventQueue, RenderBackend, RenderOutcome, ViewerEvent};

/// Handle to one in-flight render. At most one non-cancelled task
/// exists per page at any time.
#[derive(Debug)]
pub struct RenderTask {
    pub(crate) cancel: CancelFlag,
    pub(crate) scale: f32,
}

/// Owns the render-task slot of every page. All transitions happen
/// under the page-table lock, so a cancelled or superseded task can
/// never write into a raster surface another task now owns.
pub struct RenderScheduler {
    backend: Arc<dyn RenderBackend>,
    pages: Arc<Mutex<PageTable>>,
    events: EventQueue,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

fn scale_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < f32::EPSILON
}

impl RenderScheduler {
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        pages: Arc<Mutex<PageTable>>,
        events: EventQueue,
    ) -> Self {
        Self {
            backend,
            pages,
            events,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Starts a render for `number` at the viewport's scale. Any prior
    /// in-flight render for the same page is cancelled first; the
    /// cancellation is fire-and-forget and idempotent. No-op when the
    /// page is already current, or already rendering at this scale.
    pub fn request_render(&self, number: u16, viewport: Viewport) {
        let (cancel, generation) = {
            let mut table = self.pages.lock();
            let Some(page) = table.get_mut(number) else {
                return;
            };

            match page.state {
                PageState::Rendered { scale } if scale_eq(scale, viewport.scale) => return,
                PageState::Rendering => {
                    if let Some(task) = &page.task {
                        if scale_eq(task.scale, viewport.scale) {
                            return;
                        }
                    }
                }
                _ => {}
            }

            if let Some(task) = page.task.take() {
                task.cancel.cancel();
                debug!(page = number, "cancelled in-flight render");
            }

            page.generation += 1;
            let cancel = CancelFlag::new();
            page.task = Some(RenderTask {
                cancel: cancel.clone(),
                scale: viewport.scale,
            });
            page.state = PageState::Rendering;
            (cancel, page.generation)
        };

        debug!(page = number, scale = viewport.scale, "render started");
        let backend = Arc::clone(&self.backend);
        let pages = Arc::clone(&self.pages);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let outcome = backend.render_page(number, &viewport, &cancel).await;

            // Text runs are fetched before re-taking the lock; the
            // cache makes this a one-time cost per page.
            let runs: Option<Arc<[TextRun]>> = match &outcome {
                RenderOutcome::Completed(_) if !cancel.is_cancelled() => {
                    let cached = pages.lock().get(number).and_then(|page| page.cached_runs());
                    match cached {
                        Some(runs) => Some(runs),
                        None => match backend.text_runs(number).await {
                            Ok(extracted) => Some(Arc::from(extracted)),
                            Err(err) => {
                                warn!(page = number, error = %err, "text extraction failed; overlay left empty");
                                Some(Arc::from(Vec::<TextRun>::new()))
                            }
                        },
                    }
                }
                _ => None,
            };

            let mut table = pages.lock();
            let Some(page) = table.get_mut(number) else {
                return;
            };
            if page.generation != generation {
                // Superseded by a newer request; that task owns the
                // page now.
                return;
            }
            page.task = None;

            if cancel.is_cancelled() {
                page.state = PageState::Cancelled;
                debug!(page = number, "render cancelled");
                return;
            }

            match outcome {
                RenderOutcome::Completed(image) => {
                    page.surface.write(&image);
                    let runs = runs.unwrap_or_else(|| Arc::from(Vec::<TextRun>::new()));
                    text_layer::rebuild_overlay(&mut page.overlay, &runs, &viewport);
                    page.runs = Some(runs);
                    page.state = PageState::Rendered {
                        scale: viewport.scale,
                    };
                    debug!(page = number, scale = viewport.scale, "render complete");
                    events.push(ViewerEvent::PageRendered {
                        page: number,
                        scale: viewport.scale,
                    });
                }
                RenderOutcome::Cancelled => {
                    page.state = PageState::Cancelled;
                    debug!(page = number, "render cancelled by backend");
                }
                RenderOutcome::Failed(err) => {
                    page.state = PageState::Failed;
                    warn!(page = number, error = %err, "page render failed");
                    events.push(ViewerEvent::PageRenderFailed {
                        page: number,
                        reason: err.to_string(),
                    });
                }
            }
        });
        self.handles.lock().push(handle);
    }

    /// Marks a rendered page stale without cancelling or re-rendering;
    /// the next visibility or zoom event drives the re-render.
    pub fn invalidate(&self, number: u16) {
        let mut table = self.pages.lock();
        if let Some(page) = table.get_mut(number) {
            if matches!(page.state, PageState::Rendered { .. }) {
                page.state = PageState::Stale;
            }
        }
    }

    /// Scale change: every page is marked stale and every in-flight
    /// task cancelled under a single lock, so no page can complete at
    /// the old scale once this returns.
    pub fn invalidate_all(&self) {
        let mut table = self.pages.lock();
        for page in table.iter_mut() {
            if let Some(task) = page.task.take() {
                task.cancel.cancel();
            }
            page.generation += 1;
            if !matches!(page.state, PageState::Idle) {
                page.state = PageState::Stale;
            }
        }
    }

    /// Teardown: cancel everything without re-arming pages.
    pub fn cancel_all(&self) {
        let mut table = self.pages.lock();
        for page in table.iter_mut() {
            if let Some(task) = page.task.take() {
                task.cancel.cancel();
            }
            page.generation += 1;
            if matches!(page.state, PageState::Rendering) {
                page.state = PageState::Cancelled;
            }
        }
    }

    /// Awaits every spawned render task, including tasks spawned while
    /// draining. Used by hosts that want a settled page table.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    warn!(error = %err, "render task aborted");
                }
            }
        }
    }
}
