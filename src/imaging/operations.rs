//! High-level image operations.
//!
//! These functions combine calculations with the `image` crate's resampler.
//! Resampling is bilinear (`FilterType::Triangle`) on 8-bit samples, channels
//! handled independently and alpha not premultiplied, so the same input and
//! target size always produce the same bytes.

use super::calculations::{fit_height, fit_width};
use super::params::ResizeSpec;
use super::raster::{CanonicalImage, PixelLayout};
use image::imageops::{self, FilterType};
use image::{RgbImage, RgbaImage};
use log::debug;
use thiserror::Error;

/// Largest edge a resize may produce.
pub const MAX_DIMENSION: u32 = 65_535;

const FILTER: FilterType = FilterType::Triangle;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResizeError {
    #[error("{axis} must be positive, got {value}")]
    NonPositive { axis: &'static str, value: i64 },
    #[error("{axis} {value} exceeds the maximum of {MAX_DIMENSION}")]
    TooLarge { axis: &'static str, value: i64 },
    #[error("resampling buffer mismatch: {0}")]
    Buffer(String),
}

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, ResizeError>;

/// Check a requested dimension before any pixel work is done.
pub fn validate(spec: ResizeSpec) -> Result<u32> {
    let value = spec.value();
    let axis = spec.axis_name();
    if value <= 0 {
        return Err(ResizeError::NonPositive { axis, value });
    }
    if value > MAX_DIMENSION as i64 {
        return Err(ResizeError::TooLarge { axis, value });
    }
    Ok(value as u32)
}

/// Output size for `spec` applied to an image of `source` size.
///
/// The derived axis is held to the same limit as the requested one.
pub fn target_dimensions(source: (u32, u32), spec: ResizeSpec) -> Result<(u32, u32)> {
    let target = validate(spec)?;
    let ((w, h), derived, axis) = match spec {
        ResizeSpec::Width(_) => {
            let size = fit_width(source, target);
            (size, size.1, "height")
        }
        ResizeSpec::Height(_) => {
            let size = fit_height(source, target);
            (size, size.0, "width")
        }
    };
    if derived > MAX_DIMENSION {
        return Err(ResizeError::TooLarge {
            axis,
            value: derived as i64,
        });
    }
    Ok((w, h))
}

/// Resize `img` per `spec`, preserving aspect ratio. `None` is a pass-through.
pub fn resize(img: CanonicalImage, spec: Option<ResizeSpec>) -> Result<CanonicalImage> {
    let Some(spec) = spec else {
        return Ok(img);
    };
    let (width, height) = target_dimensions(img.dimensions(), spec)?;
    if (width, height) == img.dimensions() {
        debug!("resize: already {width}x{height}, nothing to do");
        return Ok(img);
    }
    debug!(
        "resize: {}x{} -> {width}x{height} ({})",
        img.width(),
        img.height(),
        img.layout()
    );

    let (src_w, src_h, layout) = (img.width(), img.height(), img.layout());
    let short = || ResizeError::Buffer(format!("{src_w}x{src_h} {layout} source is short"));
    let pixels = match layout {
        PixelLayout::Rgb => {
            let buf = RgbImage::from_raw(src_w, src_h, img.into_pixels()).ok_or_else(short)?;
            imageops::resize(&buf, width, height, FILTER).into_raw()
        }
        PixelLayout::Rgba => {
            let buf = RgbaImage::from_raw(src_w, src_h, img.into_pixels()).ok_or_else(short)?;
            imageops::resize(&buf, width, height, FILTER).into_raw()
        }
    };
    CanonicalImage::new(width, height, layout, pixels).map_err(|e| ResizeError::Buffer(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: u32, h: u32, layout: PixelLayout) -> CanonicalImage {
        CanonicalImage::from_fn(w, h, layout, |x, y| {
            [(x * 255 / w) as u8, (y * 255 / h) as u8, 128, 200]
        })
        .unwrap()
    }

    #[test]
    fn none_is_pass_through() {
        let img = gradient(16, 8, PixelLayout::Rgb);
        let out = resize(img.clone(), None).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn width_only_preserves_aspect_ratio() {
        let out = resize(gradient(200, 100, PixelLayout::Rgb), Some(ResizeSpec::Width(50))).unwrap();
        assert_eq!(out.dimensions(), (50, 25));
        assert_eq!(out.layout(), PixelLayout::Rgb);
    }

    #[test]
    fn height_only_preserves_aspect_ratio() {
        let out =
            resize(gradient(90, 60, PixelLayout::Rgba), Some(ResizeSpec::Height(40))).unwrap();
        assert_eq!(out.dimensions(), (60, 40));
        assert_eq!(out.layout(), PixelLayout::Rgba);
    }

    #[test]
    fn alpha_survives_resampling() {
        let out = resize(gradient(32, 32, PixelLayout::Rgba), Some(ResizeSpec::Width(8))).unwrap();
        assert!(out.pixels().chunks_exact(4).all(|p| p[3] == 200));
    }

    #[test]
    fn same_size_request_is_pass_through() {
        let img = gradient(64, 32, PixelLayout::Rgb);
        let out = resize(img.clone(), Some(ResizeSpec::Width(64))).unwrap();
        assert_eq!(out, img);
    }

    #[test]
    fn resampling_is_deterministic() {
        let a = resize(gradient(77, 51, PixelLayout::Rgba), Some(ResizeSpec::Width(30))).unwrap();
        let b = resize(gradient(77, 51, PixelLayout::Rgba), Some(ResizeSpec::Width(30))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_and_negative_are_rejected() {
        let img = gradient(8, 8, PixelLayout::Rgb);
        assert_eq!(
            resize(img.clone(), Some(ResizeSpec::Width(0))).unwrap_err(),
            ResizeError::NonPositive {
                axis: "width",
                value: 0
            }
        );
        assert_eq!(
            resize(img, Some(ResizeSpec::Height(-100))).unwrap_err(),
            ResizeError::NonPositive {
                axis: "height",
                value: -100
            }
        );
    }

    #[test]
    fn oversized_target_is_rejected() {
        assert!(matches!(
            validate(ResizeSpec::Width(1 << 20)),
            Err(ResizeError::TooLarge { .. })
        ));
    }

    #[test]
    fn derived_axis_over_the_limit_is_rejected() {
        assert_eq!(
            target_dimensions((1, 1000), ResizeSpec::Width(100)).unwrap_err(),
            ResizeError::TooLarge {
                axis: "height",
                value: 100_000
            }
        );
        assert_eq!(
            target_dimensions((1000, 1), ResizeSpec::Height(100)).unwrap_err(),
            ResizeError::TooLarge {
                axis: "width",
                value: 100_000
            }
        );
        assert_eq!(
            target_dimensions((1, 1000), ResizeSpec::Width(65)).unwrap(),
            (65, 65_000)
        );
    }

    #[test]
    fn oversized_derived_axis_fails_without_resampling() {
        let img = gradient(1, 1000, PixelLayout::Rgb);
        assert!(matches!(
            resize(img, Some(ResizeSpec::Width(100))),
            Err(ResizeError::TooLarge { axis: "height", .. })
        ));
    }

    #[test]
    fn target_dimensions_round_half_up() {
        assert_eq!(
            target_dimensions((612, 528), ResizeSpec::Width(128)).unwrap(),
            (128, 110)
        );
    }
}
