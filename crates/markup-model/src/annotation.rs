//! Annotation data model
//!
//! Regions are stored in normalized page space (fractions of the unrotated
//! page box, top-left origin) so a mark stays attached to the same spot of
//! the page when the viewer zooms or rotates. Pixel rectangles only exist at
//! the edges: when a gesture is captured and when the overlay is drawn.

use pdf_engine::{NormalizedRect, Rect, Viewport};
use serde::{Deserialize, Serialize};

/// Kind of mark placed on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Underline,
    Comment,
    Signature,
    /// Any kind this build does not know how to draw
    #[serde(other)]
    Unsupported,
}

impl AnnotationKind {
    /// Comment and signature marks carry a text payload
    pub fn takes_content(self) -> bool {
        matches!(self, Self::Comment | Self::Signature)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Highlight => "highlight",
            Self::Underline => "underline",
            Self::Comment => "comment",
            Self::Signature => "signature",
            Self::Unsupported => "unsupported",
        }
    }
}

/// One user-placed mark. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    kind: AnnotationKind,
    page_index: u32,
    region: NormalizedRect,
    content: String,
}

impl Annotation {
    /// `region` is in normalized page space. `content` is discarded for
    /// kinds that do not carry text.
    pub fn new(
        kind: AnnotationKind,
        page_index: u32,
        region: impl Into<NormalizedRect>,
        content: impl Into<String>,
    ) -> Self {
        let region = region.into();
        let content = if kind.takes_content() { content.into() } else { String::new() };

        Self { kind, page_index, region, content }
    }

    /// Capture a pixel rectangle drawn on `viewport`
    pub fn from_pixels(
        kind: AnnotationKind,
        page_index: u32,
        viewport: &Viewport,
        pixels: Rect,
        content: impl Into<String>,
    ) -> Self {
        Self::new(kind, page_index, viewport.rect_to_normalized(pixels), content)
    }

    pub fn kind(&self) -> AnnotationKind {
        self.kind
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    /// Region in normalized page space
    pub fn region(&self) -> NormalizedRect {
        self.region
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Region in pixels for the given viewport
    pub fn region_in(&self, viewport: &Viewport) -> Rect {
        viewport.rect_from_normalized(self.region)
    }
}
