//! Pixel-level work shared by every format, in pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Canonical raster** | [`CanonicalImage`] (8-bit RGB / RGBA, row-major) |
//! | **Alpha drop** | [`CanonicalImage::flatten`] over a [`Background`] |
//! | **Resize** | `image::imageops::resize` with `Triangle` (bilinear) |
//!
//! The module is split into:
//! - **Raster**: the canonical image type and its `image` crate conversions
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Operations**: The resize engine combining calculations + resampler

mod calculations;
pub mod operations;
mod params;
pub mod raster;

pub use calculations::{fit_height, fit_width, scale_other_axis};
pub use operations::{ResizeError, resize};
pub use params::{Quality, ResizeSpec};
pub use raster::{Background, CanonicalImage, PixelLayout, RasterError};
