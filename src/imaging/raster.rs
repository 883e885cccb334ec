//! The canonical in-memory raster every codec decodes into and encodes from.
//!
//! A [`CanonicalImage`] is 8 bits per sample, row-major, interleaved, and
//! either RGB or RGBA. Sample `(x, y, c)` lives at
//! `pixels[(y * width + x) * channels + c]`. Dimensions and buffer length are
//! checked on construction and the layout never changes in place: converting
//! between RGB and RGBA always produces a new image.
//!
//! Conversions to and from `image::DynamicImage` live here too, since the
//! `image` crate backs most decoders and the resampler.

use image::DynamicImage;
use thiserror::Error;

/// Sample width of the canonical representation.
pub const BIT_DEPTH: u8 = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RasterError {
    #[error("image dimensions must be positive, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
    #[error("pixel buffer holds {actual} bytes, {width}x{height} {layout} needs {expected}")]
    BufferLength {
        width: u32,
        height: u32,
        layout: PixelLayout,
        expected: usize,
        actual: usize,
    },
}

/// Interleaved channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    Rgba,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb => 3,
            PixelLayout::Rgba => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelLayout::Rgba)
    }
}

impl std::fmt::Display for PixelLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelLayout::Rgb => f.write_str("RGB"),
            PixelLayout::Rgba => f.write_str("RGBA"),
        }
    }
}

/// An opaque background colour used when alpha has to be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Background(pub [u8; 3]);

impl Default for Background {
    fn default() -> Self {
        Self([255, 255, 255])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImage {
    width: u32,
    height: u32,
    layout: PixelLayout,
    pixels: Vec<u8>,
}

impl CanonicalImage {
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        pixels: Vec<u8>,
    ) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::EmptyDimensions { width, height });
        }
        let expected = width as usize * height as usize * layout.channels();
        if pixels.len() != expected {
            return Err(RasterError::BufferLength {
                width,
                height,
                layout,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            layout,
            pixels,
        })
    }

    /// Build an image by evaluating `f(x, y)` for every pixel.
    ///
    /// `f` must return `layout.channels()` samples; extra samples are ignored.
    pub fn from_fn(
        width: u32,
        height: u32,
        layout: PixelLayout,
        mut f: impl FnMut(u32, u32) -> [u8; 4],
    ) -> Result<Self, RasterError> {
        let channels = layout.channels();
        let mut pixels = Vec::with_capacity(width as usize * height as usize * channels);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&f(x, y)[..channels]);
            }
        }
        Self::new(width, height, layout, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn channels(&self) -> usize {
        self.layout.channels()
    }

    pub fn bit_depth(&self) -> u8 {
        BIT_DEPTH
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Samples of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels();
        let start = (y as usize * self.width as usize + x as usize) * c;
        &self.pixels[start..start + c]
    }

    /// One row of interleaved samples.
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * self.channels();
        let start = y as usize * stride;
        &self.pixels[start..start + stride]
    }

    /// True when at least one pixel is not fully opaque.
    pub fn has_translucency(&self) -> bool {
        self.layout.has_alpha() && self.pixels.chunks_exact(4).any(|p| p[3] != 255)
    }

    /// RGB copy of this image, compositing alpha over `background`.
    ///
    /// `out = (c * a + bg * (255 - a) + 127) / 255` per channel. An RGB image is
    /// returned unchanged.
    pub fn flatten(self, background: Background) -> Self {
        if self.layout == PixelLayout::Rgb {
            return self;
        }
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.pixels.chunks_exact(4) {
            let a = px[3] as u32;
            for c in 0..3 {
                let bg = background.0[c] as u32;
                rgb.push(((px[c] as u32 * a + bg * (255 - a) + 127) / 255) as u8);
            }
        }
        Self {
            width: self.width,
            height: self.height,
            layout: PixelLayout::Rgb,
            pixels: rgb,
        }
    }

    /// RGBA copy of this image; RGB pixels become fully opaque.
    pub fn to_rgba(&self) -> Self {
        match self.layout {
            PixelLayout::Rgba => self.clone(),
            PixelLayout::Rgb => {
                let mut rgba = Vec::with_capacity(self.width as usize * self.height as usize * 4);
                for px in self.pixels.chunks_exact(3) {
                    rgba.extend_from_slice(px);
                    rgba.push(255);
                }
                Self {
                    width: self.width,
                    height: self.height,
                    layout: PixelLayout::Rgba,
                    pixels: rgba,
                }
            }
        }
    }

    /// Convert a decoded `image` crate image, reducing it to 8-bit RGB(A).
    ///
    /// Grayscale widens to RGB, luma-alpha to RGBA, 16-bit and float samples
    /// narrow to 8 bits.
    pub fn from_dynamic(img: DynamicImage) -> Result<Self, RasterError> {
        let (width, height) = (img.width(), img.height());
        if img.color().has_alpha() {
            Self::new(width, height, PixelLayout::Rgba, img.into_rgba8().into_raw())
        } else {
            Self::new(width, height, PixelLayout::Rgb, img.into_rgb8().into_raw())
        }
    }
}
