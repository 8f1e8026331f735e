//! Annotation drawing rules
//!
//! Every draw clears the surface and repaints the page's annotations in
//! sequence order, so later annotations land on top.

use crate::{OverlayError, OverlaySurface, SignatureFont};
use markup_model::{Annotation, AnnotationKind};
use pdf_engine::{Rect, Viewport};
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Stroke, Transform};

/// Side of the square comment marker, in pixels
pub const COMMENT_MARKER_SIZE: f32 = 20.0;
pub const UNDERLINE_WIDTH: f32 = 2.0;
pub const DEFAULT_SIGNATURE_SIZE: f32 = 16.0;

const HIGHLIGHT_COLOR: (u8, u8, u8, u8) = (255, 255, 0, 77);
const UNDERLINE_COLOR: (u8, u8, u8, u8) = (0, 0, 255, 255);
const COMMENT_COLOR: (u8, u8, u8, u8) = (0, 0, 255, 77);
const SIGNATURE_COLOR: (u8, u8, u8, u8) = (0, 0, 0, 255);

#[derive(Debug, Clone)]
pub struct OverlayCompositor {
    signature_font: Option<SignatureFont>,
    signature_size: f32,
}

impl Default for OverlayCompositor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl OverlayCompositor {
    /// Without a font, signature annotations are skipped.
    pub fn new(signature_font: Option<SignatureFont>) -> Self {
        Self { signature_font, signature_size: DEFAULT_SIGNATURE_SIZE }
    }

    pub fn with_signature_size(mut self, size: f32) -> Self {
        if size.is_finite() && size > 0.0 {
            self.signature_size = size;
        }
        self
    }

    pub fn signature_font(&self) -> Option<&SignatureFont> {
        self.signature_font.as_ref()
    }

    /// Redraw `surface` from scratch with the annotations on `page_index`.
    ///
    /// The surface is resized to the viewport first, keeping it aligned
    /// with the page bitmap.
    pub fn draw(
        &self,
        surface: &mut OverlaySurface,
        annotations: &[Annotation],
        viewport: &Viewport,
        page_index: u32,
    ) -> Result<(), OverlayError> {
        let (width, height) = viewport.pixel_size();
        surface.resize(width, height)?;
        surface.clear();

        let pixmap = surface.pixmap_mut();
        for annotation in annotations.iter().filter(|a| a.page_index() == page_index) {
            let region = annotation.region_in(viewport);
            match annotation.kind() {
                AnnotationKind::Highlight => fill_rect(pixmap, region, HIGHLIGHT_COLOR),
                AnnotationKind::Underline => draw_underline(pixmap, region),
                AnnotationKind::Comment => fill_rect(
                    pixmap,
                    Rect::new(region.x, region.y, COMMENT_MARKER_SIZE, COMMENT_MARKER_SIZE),
                    COMMENT_COLOR,
                ),
                AnnotationKind::Signature => {
                    self.draw_signature(pixmap, region, annotation.content())
                }
                AnnotationKind::Unsupported => {}
            }
        }

        Ok(())
    }

    /// Convenience wrapper allocating a fresh surface
    pub fn render(
        &self,
        annotations: &[Annotation],
        viewport: &Viewport,
        page_index: u32,
    ) -> Result<OverlaySurface, OverlayError> {
        let (width, height) = viewport.pixel_size();
        let mut surface = OverlaySurface::new(width, height)?;
        self.draw(&mut surface, annotations, viewport, page_index)?;
        Ok(surface)
    }

    fn draw_signature(&self, pixmap: &mut Pixmap, region: Rect, text: &str) {
        if text.is_empty() {
            return;
        }
        let Some(font) = &self.signature_font else {
            log::warn!("no signature font available, skipping signature text");
            return;
        };
        let Some(path) = font.outline(text, region.x, region.y, self.signature_size) else {
            return;
        };

        pixmap.fill_path(
            &path,
            &paint(SIGNATURE_COLOR),
            FillRule::Winding,
            Transform::identity(),
            None,
        );
    }
}

fn paint(color: (u8, u8, u8, u8)) -> Paint<'static> {
    let (r, g, b, a) = color;
    let mut paint = Paint::default();
    paint.set_color(Color::from_rgba8(r, g, b, a));
    paint.anti_alias = true;
    paint
}

fn fill_rect(pixmap: &mut Pixmap, region: Rect, color: (u8, u8, u8, u8)) {
    let Some(rect) = tiny_skia::Rect::from_xywh(region.x, region.y, region.width, region.height)
    else {
        return;
    };
    pixmap.fill_rect(rect, &paint(color), Transform::identity(), None);
}

fn draw_underline(pixmap: &mut Pixmap, region: Rect) {
    let mut builder = PathBuilder::new();
    builder.move_to(region.x, region.bottom());
    builder.line_to(region.right(), region.bottom());
    let Some(path) = builder.finish() else {
        return;
    };

    let stroke = Stroke { width: UNDERLINE_WIDTH, ..Stroke::default() };
    pixmap.stroke_path(&path, &paint(UNDERLINE_COLOR), &stroke, Transform::identity(), None);
}
