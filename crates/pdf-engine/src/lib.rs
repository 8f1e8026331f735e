//! Document and page capability
//!
//! Everything the viewer needs from a PDF backend: open a blob, count pages,
//! resolve a page viewport, and rasterize a page into an RGBA bitmap with a
//! cancellation token. The default backend parses with lopdf and produces a
//! blank page raster; the `pdfium` feature adds a real rasterizer.

mod cancel;
mod viewport;

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;

pub use cancel::CancellationToken;
pub use viewport::{
    NormalizedRect, PageGeometry, Point, Rect, Rotation, Viewport, MAX_SCALE, MAX_SURFACE_PIXELS,
};

use image::{ImageBuffer, Rgba};
use lopdf::{Dictionary, Document, Object};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub type RgbaImage = ImageBuffer<Rgba<u8>, Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Handle to one page of an open document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRef {
    pub document: DocumentHandle,
    /// Zero-based page index
    pub page_index: u32,
}

#[derive(Debug, Clone)]
pub enum OpenSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for OpenSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for OpenSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for OpenSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PdfEngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("invalid handle {0}")]
    InvalidHandle(u64),
    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u32, page_count: u32 },
    #[error("encrypted PDFs are not supported in the default backend")]
    EncryptedUnsupported,
    #[error("scale {0} is out of range or exceeds the surface size limit")]
    InvalidScale(f32),
    #[error("rotation must be a multiple of 90 degrees, got {0}")]
    InvalidRotation(i32),
    #[error("render cancelled")]
    Cancelled,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Rasterization half of the engine.
///
/// Split out so a render can run on a worker thread against a shared engine
/// while the owning thread keeps the `&mut` half for opening documents.
pub trait PageRenderer: Send + Sync {
    /// Render `page` into a bitmap of exactly `viewport.pixel_size()`.
    ///
    /// Returns [`PdfEngineError::Cancelled`] if `cancel` fires first.
    fn render_page(
        &self,
        page: PageRef,
        viewport: &Viewport,
        cancel: &CancellationToken,
    ) -> Result<RgbaImage, PdfEngineError>;
}

pub trait PdfEngine: PageRenderer {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError>;

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError>;

    fn page_geometry(&self, page: PageRef) -> Result<PageGeometry, PdfEngineError>;

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError>;

    fn page(&self, handle: DocumentHandle, page_index: u32) -> Result<PageRef, PdfEngineError> {
        let page_count = self.page_count(handle)?;
        if page_index >= page_count {
            return Err(PdfEngineError::PageOutOfRange { page: page_index, page_count });
        }

        Ok(PageRef { document: handle, page_index })
    }

    fn viewport(
        &self,
        page: PageRef,
        scale: f32,
        rotation: Rotation,
    ) -> Result<Viewport, PdfEngineError> {
        Viewport::new(&self.page_geometry(page)?, scale, rotation)
    }
}

impl<E: PdfEngine> PageRenderer for RwLock<E> {
    fn render_page(
        &self,
        page: PageRef,
        viewport: &Viewport,
        cancel: &CancellationToken,
    ) -> Result<RgbaImage, PdfEngineError> {
        let engine = self
            .read()
            .map_err(|_| PdfEngineError::Backend("engine lock poisoned".to_owned()))?;
        engine.render_page(page, viewport, cancel)
    }
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    bytes: Vec<u8>,
    pages: Vec<PageGeometry>,
}

#[derive(Debug, Default)]
pub struct LopdfEngine {
    next_handle: u64,
    docs: HashMap<DocumentHandle, DocumentRecord>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_pages(bytes: &[u8]) -> Result<Vec<PageGeometry>, PdfEngineError> {
        if bytes.windows("/Encrypt".len()).any(|window| window == b"/Encrypt") {
            return Err(PdfEngineError::EncryptedUnsupported);
        }

        let doc = Document::load_mem(bytes)?;
        let pages = doc.get_pages();
        let mut geometries = Vec::with_capacity(pages.len());

        for (_, object_id) in pages {
            let dict = doc.get_dictionary(object_id)?;

            let rotation = inherited_attribute(&doc, dict, b"Rotate")
                .and_then(|obj| obj.as_i64().ok())
                .and_then(|degrees| Rotation::from_degrees(degrees as i32).ok())
                .unwrap_or_default();

            let geometry = inherited_attribute(&doc, dict, b"MediaBox")
                .and_then(|obj| obj.as_array().ok())
                .and_then(|array| {
                    if array.len() != 4 {
                        return None;
                    }
                    let x0 = array[0].as_float().ok()?;
                    let y0 = array[1].as_float().ok()?;
                    let x1 = array[2].as_float().ok()?;
                    let y1 = array[3].as_float().ok()?;
                    Some(PageGeometry::from_box(x0, y0, x1, y1, rotation))
                })
                .unwrap_or(PageGeometry { rotation, ..PageGeometry::LETTER });

            geometries.push(geometry);
        }

        if geometries.is_empty() {
            return Err(PdfEngineError::Backend("document has no pages".to_owned()));
        }

        Ok(geometries)
    }

    fn record(&self, handle: DocumentHandle) -> Result<&DocumentRecord, PdfEngineError> {
        self.docs.get(&handle).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }

    /// Raw bytes of an open document, for backends that re-parse on render
    pub fn document_bytes(&self, handle: DocumentHandle) -> Result<&[u8], PdfEngineError> {
        Ok(&self.record(handle)?.bytes)
    }
}

/// Guards against `/Parent` cycles in malformed page trees.
const MAX_PAGE_TREE_DEPTH: usize = 64;

/// Look up an inheritable page attribute, walking up the `/Parent` chain.
fn inherited_attribute<'a>(
    doc: &'a Document,
    page: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    let mut node = page;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return doc.dereference(value).ok().map(|(_, value)| value);
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

impl PageRenderer for LopdfEngine {
    fn render_page(
        &self,
        page: PageRef,
        viewport: &Viewport,
        cancel: &CancellationToken,
    ) -> Result<RgbaImage, PdfEngineError> {
        cancel.check()?;
        self.page_geometry(page)?;

        let (width, height) = viewport.pixel_size();
        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));

        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, Rgba([220, 220, 220, 255]));
                image.put_pixel(x, height - 1, Rgba([220, 220, 220, 255]));
            }
            for y in 0..height {
                image.put_pixel(0, y, Rgba([220, 220, 220, 255]));
                image.put_pixel(width - 1, y, Rgba([220, 220, 220, 255]));
            }
        }

        cancel.check()?;
        Ok(image)
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let pages = Self::parse_pages(&bytes)?;

        self.next_handle += 1;
        let handle = DocumentHandle(self.next_handle);
        log::debug!("opened document {} with {} page(s)", handle.raw(), pages.len());
        self.docs.insert(handle, DocumentRecord { bytes, pages });

        Ok(handle)
    }

    fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
        Ok(self.record(handle)?.pages.len() as u32)
    }

    fn page_geometry(&self, page: PageRef) -> Result<PageGeometry, PdfEngineError> {
        let record = self.record(page.document)?;
        record.pages.get(page.page_index as usize).copied().ok_or(
            PdfEngineError::PageOutOfRange {
                page: page.page_index,
                page_count: record.pages.len() as u32,
            },
        )
    }

    fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
        self.docs.remove(&handle).map(|_| ()).ok_or(PdfEngineError::InvalidHandle(handle.raw()))
    }
}

#[cfg(feature = "pdfium")]
pub mod pdfium_backend {
    use super::*;
    use pdfium_render::prelude::*;

    /// Real rasterizer backed by a system PDFium library.
    ///
    /// Document structure still comes from lopdf so both backends agree on
    /// page boxes and rotation.
    pub struct PdfiumEngine {
        pdfium: Pdfium,
        inner: LopdfEngine,
    }

    impl PdfiumEngine {
        pub fn from_system_library() -> Result<Self, PdfEngineError> {
            let bindings = Pdfium::bind_to_system_library().map_err(|err| {
                PdfEngineError::Backend(format!("failed to bind pdfium system library: {err}"))
            })?;

            Ok(Self { pdfium: Pdfium::new(bindings), inner: LopdfEngine::default() })
        }
    }

    impl PageRenderer for PdfiumEngine {
        fn render_page(
            &self,
            page: PageRef,
            viewport: &Viewport,
            cancel: &CancellationToken,
        ) -> Result<RgbaImage, PdfEngineError> {
            cancel.check()?;

            let geometry = self.inner.page_geometry(page)?;
            let bytes = self.inner.document_bytes(page.document)?;
            let document = self
                .pdfium
                .load_pdf_from_byte_slice(bytes, None)
                .map_err(|err| PdfEngineError::Backend(err.to_string()))?;

            let index = u16::try_from(page.page_index).map_err(|_| {
                PdfEngineError::PageOutOfRange {
                    page: page.page_index,
                    page_count: u32::from(u16::MAX),
                }
            })?;
            let pdf_page = document
                .pages()
                .get(index)
                .map_err(|err| PdfEngineError::Backend(err.to_string()))?;

            // PDFium applies the page's own /Rotate itself.
            let requested = viewport.rotation.rotate_by(geometry.rotation.inverse());
            let rotation = match requested {
                Rotation::Deg0 => PdfPageRenderRotation::None,
                Rotation::Deg90 => PdfPageRenderRotation::Degrees90,
                Rotation::Deg180 => PdfPageRenderRotation::Degrees180,
                Rotation::Deg270 => PdfPageRenderRotation::Degrees270,
            };

            let (width, height) = viewport.pixel_size();
            let config = PdfRenderConfig::new()
                .set_target_width(width as i32)
                .set_target_height(height as i32)
                .rotate(rotation, false);

            let bitmap = pdf_page
                .render_with_config(&config)
                .map_err(|err| PdfEngineError::Backend(err.to_string()))?;

            cancel.check()?;

            let rendered = RgbaImage::from_raw(
                bitmap.width() as u32,
                bitmap.height() as u32,
                bitmap.as_rgba_bytes(),
            )
            .ok_or_else(|| PdfEngineError::Backend("bitmap size mismatch".to_owned()))?;

            if rendered.dimensions() == (width, height) {
                Ok(rendered)
            } else {
                Ok(image::imageops::resize(
                    &rendered,
                    width,
                    height,
                    image::imageops::FilterType::Triangle,
                ))
            }
        }
    }

    impl PdfEngine for PdfiumEngine {
        fn open(&mut self, source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
            self.inner.open(source)
        }

        fn page_count(&self, handle: DocumentHandle) -> Result<u32, PdfEngineError> {
            self.inner.page_count(handle)
        }

        fn page_geometry(&self, page: PageRef) -> Result<PageGeometry, PdfEngineError> {
            self.inner.page_geometry(page)
        }

        fn close(&mut self, handle: DocumentHandle) -> Result<(), PdfEngineError> {
            self.inner.close(handle)
        }
    }
}

pub fn default_engine() -> LopdfEngine {
    LopdfEngine::new()
}
