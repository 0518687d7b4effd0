use crate::geometry::{project_text_run, TextRun, Viewport};
use crate::page::OverlayContainer;

/// Rebuilds a page's overlay from its cached text runs.
///
/// The container is cleared and repopulated wholesale: run counts and
/// positions change with scale, and a rebuild is cheap next to
/// rasterization. Runs with no content produce no span.
pub fn rebuild_overlay(overlay: &mut OverlayContainer, runs: &[TextRun], viewport: &Viewport) {
    overlay.clear();
    for run in runs {
        if run.content.is_empty() {
            continue;
        }
        overlay.push(project_text_run(run, viewport));
    }
}
