//! Page geometry and viewport transforms
//!
//! A [`Viewport`] describes how one page is laid out on a pixel surface for a
//! given scale and rotation. Both the page bitmap and the annotation overlay
//! take their size from [`Viewport::pixel_size`], so the two always line up.
//!
//! Coordinate spaces:
//! - page space: PDF points, origin at the bottom-left of the page box, y up
//! - viewport space: pixels, origin at the top-left of the surface, y down
//! - normalized space: fractions of the unrotated page box, origin at its
//!   top-left corner, y down; independent of scale and rotation

use crate::PdfEngineError;

/// Largest accepted zoom factor
pub const MAX_SCALE: f32 = 16.0;

/// Largest surface, in pixels, a viewport may describe. Both the page bitmap
/// and the overlay are allocated at this size.
pub const MAX_SURFACE_PIXELS: u64 = 1 << 26;

/// Point in any of the three coordinate spaces
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle with a top-left origin and non-negative extent
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanned by two opposite corners, in any order
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            x: a.x.min(b.x),
            y: a.y.min(b.y),
            width: (b.x - a.x).abs(),
            height: (b.y - a.y).abs(),
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn contains(&self, point: Point) -> bool {
        (self.x..=self.right()).contains(&point.x) && (self.y..=self.bottom()).contains(&point.y)
    }
}

/// Rectangle in normalized page space. Double precision keeps a region
/// captured on one viewport mapping back to the same pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    fn from_corners((ax, ay): (f64, f64), (bx, by): (f64, f64)) -> Self {
        Self { x: ax.min(bx), y: ay.min(by), width: (bx - ax).abs(), height: (by - ay).abs() }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

impl From<Rect> for NormalizedRect {
    fn from(rect: Rect) -> Self {
        Self::new(rect.x.into(), rect.y.into(), rect.width.into(), rect.height.into())
    }
}

/// Page rotation in quarter turns, clockwise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Accepts any multiple of 90, including negative values.
    pub fn from_degrees(degrees: i32) -> Result<Self, PdfEngineError> {
        match degrees.rem_euclid(360) {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            _ => Err(PdfEngineError::InvalidRotation(degrees)),
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Compose two rotations
    pub fn rotate_by(self, other: Rotation) -> Rotation {
        let degrees = (self.degrees() + other.degrees()) % 360;
        Self::from_quarter_turns(degrees / 90)
    }

    /// The rotation that undoes this one
    pub fn inverse(self) -> Rotation {
        Self::from_quarter_turns((4 - self.degrees() / 90) % 4)
    }

    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    fn from_quarter_turns(turns: u16) -> Rotation {
        match turns % 4 {
            0 => Self::Deg0,
            1 => Self::Deg90,
            2 => Self::Deg180,
            _ => Self::Deg270,
        }
    }
}

/// Page box and intrinsic rotation as stored in the document
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    /// `[x0, y0, x1, y1]` in page space, with `x0 < x1` and `y0 < y1`
    pub view_box: [f32; 4],
    /// The page's own `/Rotate` entry
    pub rotation: Rotation,
}

impl PageGeometry {
    /// US Letter, used when a page has no readable `MediaBox`
    pub const LETTER: PageGeometry =
        PageGeometry { view_box: [0.0, 0.0, 612.0, 792.0], rotation: Rotation::Deg0 };

    /// Build from two corners in any order. Degenerate boxes fall back to Letter.
    pub fn from_box(x0: f32, y0: f32, x1: f32, y1: f32, rotation: Rotation) -> Self {
        let view_box = [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)];
        if view_box[2] - view_box[0] <= 0.0 || view_box[3] - view_box[1] <= 0.0 {
            return Self { rotation, ..Self::LETTER };
        }

        Self { view_box, rotation }
    }

    pub fn width_pt(&self) -> f32 {
        self.view_box[2] - self.view_box[0]
    }

    pub fn height_pt(&self) -> f32 {
        self.view_box[3] - self.view_box[1]
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::LETTER
    }
}

/// Resolved pixel layout of one page at a scale and rotation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Surface width in (fractional) pixels
    pub width: f32,
    /// Surface height in (fractional) pixels
    pub height: f32,
    pub scale: f32,
    /// Effective rotation: the page's intrinsic rotation plus the requested one
    pub rotation: Rotation,
    view_box: [f32; 4],
    transform: [f64; 6],
}

impl Viewport {
    pub fn new(
        geometry: &PageGeometry,
        scale: f32,
        rotation: Rotation,
    ) -> Result<Self, PdfEngineError> {
        Self::check_scale(scale)?;

        let rotation = geometry.rotation.rotate_by(rotation);
        let [x0, y0, x1, y1] = geometry.view_box.map(f64::from);
        let scale64 = f64::from(scale);
        let center_x = (x0 + x1) / 2.0;
        let center_y = (y0 + y1) / 2.0;

        let (rotate_a, rotate_b, rotate_c, rotate_d): (f64, f64, f64, f64) = match rotation {
            Rotation::Deg0 => (1.0, 0.0, 0.0, -1.0),
            Rotation::Deg90 => (0.0, 1.0, 1.0, 0.0),
            Rotation::Deg180 => (-1.0, 0.0, 0.0, 1.0),
            Rotation::Deg270 => (0.0, -1.0, -1.0, 0.0),
        };

        let (offset_x, offset_y, width, height) = if rotation.is_quarter_turn() {
            (
                (center_y - y0).abs() * scale64,
                (center_x - x0).abs() * scale64,
                (y1 - y0).abs() * scale64,
                (x1 - x0).abs() * scale64,
            )
        } else {
            (
                (center_x - x0).abs() * scale64,
                (center_y - y0).abs() * scale64,
                (x1 - x0).abs() * scale64,
                (y1 - y0).abs() * scale64,
            )
        };

        let transform = [
            rotate_a * scale64,
            rotate_b * scale64,
            rotate_c * scale64,
            rotate_d * scale64,
            offset_x - rotate_a * scale64 * center_x - rotate_c * scale64 * center_y,
            offset_y - rotate_b * scale64 * center_x - rotate_d * scale64 * center_y,
        ];

        let viewport = Self {
            width: width as f32,
            height: height as f32,
            scale,
            rotation,
            view_box: geometry.view_box,
            transform,
        };
        let (pixel_width, pixel_height) = viewport.pixel_size();
        if u64::from(pixel_width) * u64::from(pixel_height) > MAX_SURFACE_PIXELS {
            return Err(PdfEngineError::InvalidScale(scale));
        }
        Ok(viewport)
    }

    /// Reject scales outside `(0, MAX_SCALE]` before any geometry is known.
    pub fn check_scale(scale: f32) -> Result<(), PdfEngineError> {
        if scale.is_finite() && scale > 0.0 && scale <= MAX_SCALE {
            Ok(())
        } else {
            Err(PdfEngineError::InvalidScale(scale))
        }
    }

    /// Integer surface size shared by the page bitmap and the overlay
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.width.round().max(1.0) as u32, self.height.round().max(1.0) as u32)
    }

    /// Affine `[a, b, c, d, e, f]` from page space to viewport space
    pub fn transform(&self) -> [f32; 6] {
        self.transform.map(|value| value as f32)
    }

    pub fn view_box(&self) -> [f32; 4] {
        self.view_box
    }

    pub fn to_viewport_point(&self, page: Point) -> Point {
        let (x, y) = self.apply(page.x.into(), page.y.into());
        Point::new(x as f32, y as f32)
    }

    pub fn to_page_point(&self, point: Point) -> Point {
        let (x, y) = self.invert(point.x.into(), point.y.into());
        Point::new(x as f32, y as f32)
    }

    /// Pixel position as `(x, y)` fractions of the unrotated page box
    pub fn to_normalized(&self, point: Point) -> (f64, f64) {
        let (page_x, page_y) = self.invert(point.x.into(), point.y.into());
        let [x0, y0, x1, y1] = self.view_box.map(f64::from);
        ((page_x - x0) / (x1 - x0), (y1 - page_y) / (y1 - y0))
    }

    pub fn from_normalized(&self, x: f64, y: f64) -> Point {
        let (x, y) = self.pixel_from_normalized(x, y);
        Point::new(x as f32, y as f32)
    }

    pub fn rect_to_normalized(&self, rect: Rect) -> NormalizedRect {
        NormalizedRect::from_corners(
            self.to_normalized(Point::new(rect.x, rect.y)),
            self.to_normalized(Point::new(rect.right(), rect.bottom())),
        )
    }

    pub fn rect_from_normalized(&self, rect: NormalizedRect) -> Rect {
        let (ax, ay) = self.pixel_from_normalized(rect.x, rect.y);
        let (bx, by) = self.pixel_from_normalized(rect.right(), rect.bottom());
        Rect::new(
            ax.min(bx) as f32,
            ay.min(by) as f32,
            (bx - ax).abs() as f32,
            (by - ay).abs() as f32,
        )
    }

    fn pixel_from_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        let [x0, y0, x1, y1] = self.view_box.map(f64::from);
        self.apply(x0 + x * (x1 - x0), y1 - y * (y1 - y0))
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.transform;
        (a * x + c * y + e, b * x + d * y + f)
    }

    fn invert(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.transform;
        // Quarter-turn transforms with positive scale are never singular.
        let det = a * d - b * c;
        let dx = x - e;
        let dy = y - f;
        ((d * dx - c * dy) / det, (a * dy - b * dx) / det)
    }
}
