//! Overlay compositing for page annotations.
//!
//! The overlay is a transparent raster the size of the page viewport. It is
//! redrawn from the full annotation sequence on every change and blended
//! over the page bitmap for display or export.

mod compositor;
mod font;
mod surface;

use std::path::PathBuf;

pub use compositor::{
    OverlayCompositor, COMMENT_MARKER_SIZE, DEFAULT_SIGNATURE_SIZE, UNDERLINE_WIDTH,
};
pub use font::SignatureFont;
pub use surface::OverlaySurface;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("invalid overlay size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("overlay size {overlay:?} does not match page size {page:?}")]
    SizeMismatch { page: (u32, u32), overlay: (u32, u32) },

    #[error("failed to read font {path}: {source}")]
    FontIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported font data{}", font_location(.0))]
    InvalidFont(Option<PathBuf>),
}

fn font_location(path: &Option<PathBuf>) -> String {
    path.as_ref().map(|path| format!(" in {}", path.display())).unwrap_or_default()
}
