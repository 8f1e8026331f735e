//! Signature font loading and glyph outlining

use crate::OverlayError;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiny_skia::PathBuilder;
use ttf_parser::OutlineBuilder;

/// Preferred file names when searching the system font directories
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "Arial.ttf",
    "arial.ttf",
    "LiberationSans-Regular.ttf",
    "DejaVuSans.ttf",
    "Helvetica.ttc",
    "NotoSans-Regular.ttf",
];

/// Directory depth scanned below each system font directory
const SEARCH_DEPTH: usize = 3;

/// DejaVu Serif Italic, see `assets/DejaVu-LICENSE.txt`.
static BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSerif-Italic.ttf");

/// Font used for signature text. Cheap to clone.
#[derive(Clone)]
pub struct SignatureFont {
    data: Arc<Cow<'static, [u8]>>,
    source: Option<PathBuf>,
}

impl std::fmt::Debug for SignatureFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureFont")
            .field("source", &self.source)
            .field("len", &self.data.len())
            .finish()
    }
}

impl SignatureFont {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, OverlayError> {
        if ttf_parser::Face::parse(&data, 0).is_err() {
            return Err(OverlayError::InvalidFont(None));
        }

        Ok(Self { data: Arc::new(Cow::Owned(data)), source: None })
    }

    /// Font compiled into the binary, available on every platform
    pub fn bundled() -> Self {
        Self { data: Arc::new(Cow::Borrowed(BUNDLED_FONT)), source: None }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OverlayError> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|source| OverlayError::FontIo { path: path.to_path_buf(), source })?;

        if ttf_parser::Face::parse(&data, 0).is_err() {
            return Err(OverlayError::InvalidFont(Some(path.to_path_buf())));
        }

        Ok(Self { data: Arc::new(Cow::Owned(data)), source: Some(path.to_path_buf()) })
    }

    /// First usable font in the platform font directories, or the bundled
    /// font when none is installed.
    pub fn from_system() -> Self {
        Self::search_system().unwrap_or_else(|| {
            log::debug!("no system font found, using the bundled signature font");
            Self::bundled()
        })
    }

    fn search_system() -> Option<Self> {
        let mut fallback = None;

        for dir in system_font_dirs() {
            let mut files = Vec::new();
            collect_font_files(&dir, SEARCH_DEPTH, &mut files);

            for name in SYSTEM_FONT_CANDIDATES {
                let found = files
                    .iter()
                    .filter(|path| path.file_name().is_some_and(|file| file == *name))
                    .find_map(|path| Self::from_path(path).ok());
                if found.is_some() {
                    return found;
                }
            }

            if fallback.is_none() {
                fallback = files
                    .iter()
                    .filter(|path| path.extension().is_some_and(|ext| ext == "ttf"))
                    .find_map(|path| Self::from_path(path).ok());
            }
        }

        fallback
    }

    /// Path the font was loaded from; `None` for bundled or in-memory fonts
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Outline `text` at `size` pixels with its baseline starting at
    /// `(x, baseline)` on a y-down surface.
    pub fn outline(&self, text: &str, x: f32, baseline: f32, size: f32) -> Option<tiny_skia::Path> {
        let face = ttf_parser::Face::parse(&self.data, 0).ok()?;
        let units_per_em = f32::from(face.units_per_em());
        if units_per_em <= 0.0 || size <= 0.0 {
            return None;
        }

        let scale = size / units_per_em;
        let mut builder = GlyphPathBuilder::new(x, baseline, scale);

        for ch in text.chars() {
            let Some(glyph) = face.glyph_index(ch) else {
                continue;
            };
            face.outline_glyph(glyph, &mut builder);
            let advance = face.glyph_hor_advance(glyph).map(f32::from).unwrap_or(0.0);
            builder.origin_x += advance * scale;
        }

        builder.builder.finish()
    }
}

fn collect_font_files(dir: &Path, depth: usize, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if depth > 0 {
                collect_font_files(&path, depth - 1, out);
            }
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf" | "ttc"))
        {
            out.push(path);
        }
    }

    out.sort();
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join(".fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    dirs
}

/// Glyph outlines are y-up in font units; the overlay is y-down in pixels.
struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self { builder: PathBuilder::new(), origin_x, origin_y, scale }
    }

    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}
