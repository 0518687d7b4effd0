use std::sync::Arc;

use crate::geometry::{PageSize, TextRun, TextSpan};
use crate::scheduler::RenderTask;
use crate::RasterImage;

/// Render state of a single page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageState {
    Idle,
    Rendering,
    Rendered { scale: f32 },
    Cancelled,
    /// Rendered content no longer matches the current viewport scale.
    Stale,
    Failed,
}

/// Pixel buffer a page is drawn into. Owned exclusively by its page and
/// reused in place across re-renders so repeated zooming does not churn
/// allocations.
#[derive(Debug, Default)]
pub struct RasterSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterSurface {
    pub fn write(&mut self, image: &RasterImage) {
        self.width = image.width;
        self.height = image.height;
        self.pixels.clear();
        self.pixels.extend_from_slice(&image.pixels);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// The invisible selectable text layer positioned atop a page's raster.
/// Cleared and rebuilt on every render; the container itself is never
/// replaced.
#[derive(Debug, Default)]
pub struct OverlayContainer {
    spans: Vec<TextSpan>,
}

impl OverlayContainer {
    pub fn clear(&mut self) {
        self.spans.clear();
    }

    pub fn push(&mut self, span: TextSpan) {
        self.spans.push(span);
    }

    pub fn spans(&self) -> &[TextSpan] {
        &self.spans
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

pub struct Page {
    number: u16,
    native_size: PageSize,
    pub(crate) state: PageState,
    pub(crate) surface: RasterSurface,
    pub(crate) overlay: OverlayContainer,
    pub(crate) runs: Option<Arc<[TextRun]>>,
    pub(crate) task: Option<RenderTask>,
    pub(crate) generation: u64,
}

impl Page {
    fn new(number: u16, native_size: PageSize) -> Self {
        Self {
            number,
            native_size,
            state: PageState::Idle,
            surface: RasterSurface::default(),
            overlay: OverlayContainer::default(),
            runs: None,
            task: None,
            generation: 0,
        }
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    pub fn native_size(&self) -> PageSize {
        self.native_size
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn surface(&self) -> &RasterSurface {
        &self.surface
    }

    pub fn overlay(&self) -> &OverlayContainer {
        &self.overlay
    }

    pub fn cached_runs(&self) -> Option<Arc<[TextRun]>> {
        self.runs.clone()
    }
}

/// Index-keyed page arena. Page numbers are 1-based everywhere in the
/// public API; the arena maps them directly so visibility reports need
/// no indirection.
pub struct PageTable {
    pages: Vec<Page>,
}

impl PageTable {
    /// One placeholder per page, created up front at document load.
    pub fn new(sizes: &[PageSize]) -> Self {
        let pages = sizes
            .iter()
            .enumerate()
            .map(|(idx, size)| Page::new(idx as u16 + 1, *size))
            .collect();
        Self { pages }
    }

    pub fn len(&self) -> u16 {
        self.pages.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn get(&self, number: u16) -> Option<&Page> {
        number
            .checked_sub(1)
            .and_then(|idx| self.pages.get(idx as usize))
    }

    pub fn get_mut(&mut self, number: u16) -> Option<&mut Page> {
        number
            .checked_sub(1)
            .and_then(|idx| self.pages.get_mut(idx as usize))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Page> {
        self.pages.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_table_is_one_based_and_bounded() {
        let sizes = vec![PageSize::new(612.0, 792.0); 3];
        let table = PageTable::new(&sizes);

        assert_eq!(table.len(), 3);
        assert!(table.get(0).is_none());
        assert!(table.get(4).is_none());
        assert_eq!(table.get(1).unwrap().number(), 1);
        assert_eq!(table.get(3).unwrap().number(), 3);
        assert!(table.iter().all(|page| page.state() == PageState::Idle));
    }

    #[test]
    fn raster_surface_reuses_its_allocation() {
        let mut surface = RasterSurface::default();
        surface.write(&RasterImage {
            width: 4,
            height: 4,
            pixels: vec![255; 64],
        });
        assert_eq!(surface.width(), 4);
        assert_eq!(surface.pixels().len(), 64);
        let first_ptr = surface.pixels().as_ptr();

        // A smaller re-render must land in the same buffer.
        surface.write(&RasterImage {
            width: 2,
            height: 2,
            pixels: vec![0; 16],
        });
        assert_eq!(surface.width(), 2);
        assert_eq!(surface.pixels().len(), 16);
        assert_eq!(surface.pixels().as_ptr(), first_ptr);
    }

    #[test]
    fn overlay_container_clears_between_rebuilds() {
        let mut overlay = OverlayContainer::default();
        overlay.push(TextSpan {
            content: "a".to_string(),
            x: 0.0,
            y: 0.0,
            font_height: 10.0,
            angle: 0.0,
            font_family: None,
        });
        assert_eq!(overlay.len(), 1);
        overlay.clear();
        assert!(overlay.is_empty());
    }
}
