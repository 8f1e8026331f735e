use crate::OverlayError;
use image::RgbaImage;
use tiny_skia::{IntSize, Pixmap, PixmapPaint, Transform};

/// Transparent drawing surface sized to a page viewport
#[derive(Debug, Clone)]
pub struct OverlaySurface {
    pixmap: Pixmap,
}

impl OverlaySurface {
    pub fn new(width: u32, height: u32) -> Result<Self, OverlayError> {
        let pixmap =
            Pixmap::new(width, height).ok_or(OverlayError::InvalidSize { width, height })?;
        Ok(Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Reallocate when the size changed. Contents are not preserved.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), OverlayError> {
        if self.size() != (width, height) {
            *self = Self::new(width, height)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.pixmap.fill(tiny_skia::Color::TRANSPARENT);
    }

    /// Straight (non-premultiplied) RGBA value at `(x, y)`
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let color = self.pixmap.pixel(x, y)?.demultiply();
        Some([color.red(), color.green(), color.blue(), color.alpha()])
    }

    pub fn is_blank(&self) -> bool {
        self.pixmap.pixels().iter().all(|pixel| pixel.alpha() == 0)
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        pixmap_to_image(&self.pixmap)
    }

    /// Blend this overlay over a page bitmap of the same size
    pub fn composite_over(&self, page: &RgbaImage) -> Result<RgbaImage, OverlayError> {
        if page.dimensions() != self.size() {
            return Err(OverlayError::SizeMismatch {
                page: page.dimensions(),
                overlay: self.size(),
            });
        }

        let mut base = image_to_pixmap(page)?;
        base.draw_pixmap(
            0,
            0,
            self.pixmap.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        Ok(pixmap_to_image(&base))
    }

    pub(crate) fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }
}

fn image_to_pixmap(image: &RgbaImage) -> Result<Pixmap, OverlayError> {
    let (width, height) = image.dimensions();
    let size = IntSize::from_wh(width, height).ok_or(OverlayError::InvalidSize { width, height })?;

    let data = image
        .pixels()
        .flat_map(|pixel| {
            let [r, g, b, a] = pixel.0;
            let premultiply = |channel: u8| ((u16::from(channel) * u16::from(a) + 127) / 255) as u8;
            [premultiply(r), premultiply(g), premultiply(b), a]
        })
        .collect();

    Pixmap::from_vec(data, size).ok_or(OverlayError::InvalidSize { width, height })
}

fn pixmap_to_image(pixmap: &Pixmap) -> RgbaImage {
    let data = pixmap
        .pixels()
        .iter()
        .flat_map(|pixel| {
            let color = pixel.demultiply();
            [color.red(), color.green(), color.blue(), color.alpha()]
        })
        .collect();

    RgbaImage::from_raw(pixmap.width(), pixmap.height(), data)
        .unwrap_or_else(|| RgbaImage::new(pixmap.width(), pixmap.height()))
}
