use serde::Serialize;

/// Zoom bounds enforced by the viewer shell. Callers of the pure
/// functions below are expected to pre-clamp.
pub const MIN_SCALE: f32 = 0.5;
pub const MAX_SCALE: f32 = 3.0;

/// Native page dimensions in document units (points for PDF).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

/// 2x3 affine transform `[a b c d e f]`, row-vector convention:
/// `(x, y) -> (x*a + y*c + e, x*b + y*d + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn scaling(scale: f32) -> Self {
        Transform {
            a: scale,
            b: 0.0,
            c: 0.0,
            d: scale,
            e: 0.0,
            f: 0.0,
        }
    }

    /// Composition: apply `self` first, then `next`.
    pub fn then(&self, next: &Transform) -> Transform {
        Transform {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            e: self.e * next.a + self.f * next.c + next.e,
            f: self.e * next.b + self.f * next.d + next.f,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.a + y * self.c + self.e,
            x * self.b + y * self.d + self.f,
        )
    }
}

/// Presentation-space realization of a page at one scale. Replaced
/// wholesale whenever the scale changes; never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scale: f32,
    pub width: f32,
    pub height: f32,
    pub transform: Transform,
}

impl Viewport {
    /// Pure: maps the page's native space (origin bottom-left, y up)
    /// onto presentation pixels (origin top-left, y down).
    pub fn compute(native: PageSize, scale: f32) -> Viewport {
        let height = native.height * scale;
        Viewport {
            scale,
            width: native.width * scale,
            height,
            transform: Transform {
                a: scale,
                b: 0.0,
                c: 0.0,
                d: -scale,
                e: 0.0,
                f: height,
            },
        }
    }
}

/// A glyph run from the page's extracted text stream, in native
/// coordinates. Immutable once extracted; cached per page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub content: String,
    pub transform: Transform,
    pub font_family: Option<String>,
}

/// Presentation-space realization of a [`TextRun`]. Recomputed on every
/// render; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSpan {
    pub content: String,
    pub x: f32,
    pub y: f32,
    pub font_height: f32,
    pub angle: f32,
    pub font_family: Option<String>,
}

/// Projects a text run through the viewport transform.
///
/// The vertical origin is shifted up by the font height: the run's
/// translation lands on the text baseline, while overlay boxes hang
/// from their top edge.
pub fn project_text_run(run: &TextRun, viewport: &Viewport) -> TextSpan {
    let composite = run.transform.then(&viewport.transform);
    let font_height = (composite.a * composite.a + composite.b * composite.b).sqrt();
    let angle = composite.b.atan2(composite.a);
    TextSpan {
        content: run.content.clone(),
        x: composite.e,
        y: composite.f - font_height,
        font_height,
        angle,
        font_family: run.font_family.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f32 = 1e-4;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < TOLERANCE,
            "expected {expected}, got {actual}"
        );
    }

    fn run(transform: Transform) -> TextRun {
        TextRun {
            content: "sample".to_string(),
            transform,
            font_family: None,
        }
    }

    #[test]
    fn viewport_scales_dimensions_and_flips_vertically() {
        let viewport = Viewport::compute(PageSize::new(612.0, 792.0), 2.0);
        assert_close(viewport.width, 1224.0);
        assert_close(viewport.height, 1584.0);

        // Native bottom-left corner lands at the presentation bottom,
        // native top-left at the presentation origin.
        let (x, y) = viewport.transform.apply(0.0, 0.0);
        assert_close(x, 0.0);
        assert_close(y, 1584.0);
        let (x, y) = viewport.transform.apply(0.0, 792.0);
        assert_close(x, 0.0);
        assert_close(y, 0.0);
    }

    #[test]
    fn composition_applies_left_operand_first() {
        let shift = Transform {
            e: 10.0,
            f: 5.0,
            ..Transform::IDENTITY
        };
        let double = Transform::scaling(2.0);

        let (x, y) = shift.then(&double).apply(1.0, 1.0);
        assert_close(x, 22.0);
        assert_close(y, 12.0);

        let identity = shift.then(&Transform::IDENTITY);
        assert_eq!(identity, shift);
    }

    #[test]
    fn identity_run_at_double_scale_doubles_font_height() {
        let viewport = Viewport::compute(PageSize::new(612.0, 792.0), 2.0);
        let span = project_text_run(&run(Transform::IDENTITY), &viewport);
        assert_close(span.font_height, 2.0);
        assert_close(span.angle, 0.0);
    }

    #[test]
    fn upright_run_projects_to_expected_origin() {
        // 12pt text with its baseline at native (72, 700) on a US
        // Letter page, viewed at 2x.
        let viewport = Viewport::compute(PageSize::new(612.0, 792.0), 2.0);
        let transform = Transform {
            a: 12.0,
            b: 0.0,
            c: 0.0,
            d: 12.0,
            e: 72.0,
            f: 700.0,
        };
        let span = project_text_run(&run(transform), &viewport);

        assert_close(span.font_height, 24.0);
        assert_close(span.angle, 0.0);
        assert_close(span.x, 144.0);
        // Baseline maps to (792 - 700) * 2 = 184; the span origin sits
        // one font height above it.
        assert_close(span.y, 160.0);
    }

    #[test]
    fn rotated_run_reports_angle_and_unscaled_height() {
        // 90-degree counter-clockwise rotation in native (y-up) space
        // reads as clockwise in presentation (y-down) space.
        let viewport = Viewport::compute(PageSize::new(612.0, 792.0), 1.0);
        let transform = Transform {
            a: 0.0,
            b: 12.0,
            c: -12.0,
            d: 0.0,
            e: 100.0,
            f: 100.0,
        };
        let span = project_text_run(&run(transform), &viewport);

        assert_close(span.font_height, 12.0);
        assert_close(span.angle, -std::f32::consts::FRAC_PI_2);
    }

    #[test]
    fn projection_preserves_content_and_font_family() {
        let viewport = Viewport::compute(PageSize::new(100.0, 100.0), 1.0);
        let run = TextRun {
            content: "Figure 3".to_string(),
            transform: Transform::IDENTITY,
            font_family: Some("Times".to_string()),
        };
        let span = project_text_run(&run, &viewport);
        assert_eq!(span.content, "Figure 3");
        assert_eq!(span.font_family.as_deref(), Some("Times"));
    }
}
