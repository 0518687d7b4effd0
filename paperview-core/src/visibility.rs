use crate::geometry::PageSize;

/// Vertical extent of one page placeholder in presentation pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBand {
    pub number: u16,
    pub top: f32,
    pub height: f32,
}

impl PageBand {
    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }
}

/// Stacks pages vertically with a uniform gap, in document order.
pub fn layout_pages(sizes: &[PageSize], scale: f32, gap: f32) -> Vec<PageBand> {
    let mut bands = Vec::with_capacity(sizes.len());
    let mut top = gap;
    for (idx, size) in sizes.iter().enumerate() {
        let height = size.height * scale;
        bands.push(PageBand {
            number: idx as u16 + 1,
            top,
            height,
        });
        top += height + gap;
    }
    bands
}

pub fn total_height(bands: &[PageBand], gap: f32) -> f32 {
    bands.last().map(|band| band.bottom() + gap).unwrap_or(0.0)
}

/// Watches page placeholders against the scrolled viewport and reports
/// which pages sit inside the observation margin. Pages are identified
/// by number directly; batches are processed independently and carry no
/// ordering guarantee.
#[derive(Debug)]
pub struct VisibilityTracker {
    margin: f32,
    attached: bool,
}

impl VisibilityTracker {
    pub fn new(margin: f32) -> Self {
        Self {
            margin,
            attached: false,
        }
    }

    /// Registers the document's placeholders. Called once at load.
    pub fn attach(&mut self) {
        self.attached = true;
    }

    /// Teardown: after this, no further batches are produced, so no
    /// callback can reach a disposed page.
    pub fn detach(&mut self) {
        self.attached = false;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// One notification batch: every page whose band intersects the
    /// viewport extended by the prefetch margin.
    pub fn intersections(&self, bands: &[PageBand], scroll_y: f32, extent: f32) -> Vec<u16> {
        if !self.attached {
            return Vec::new();
        }
        let lo = scroll_y - self.margin;
        let hi = scroll_y + extent + self.margin;
        bands
            .iter()
            .filter(|band| band.bottom() >= lo && band.top <= hi)
            .map(|band| band.number)
            .collect()
    }
}
