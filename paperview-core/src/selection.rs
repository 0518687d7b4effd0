use serde::Serialize;

use crate::geometry::Rect;

/// A completed user text selection. Transient: it exists only between
/// the pointer release and the event emission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub text: String,
    pub page: u16,
    pub bounds: Option<Rect>,
}

/// Bridges platform selection state to the outward interface. Holds no
/// state of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionCapturer;

impl SelectionCapturer {
    pub fn capture(&self, page: u16, raw: &str, bounds: Option<Rect>) -> Option<Selection> {
        let text = raw.trim();
        if text.is_empty() {
            return None;
        }
        Some(Selection {
            text: text.to_string(),
            page,
            bounds,
        })
    }
}
