//! Formats handled end to end by the `image` crate.
//!
//! Also hosts [`decode_with`], the shared decode path the hand-written
//! encoders (GIF, BMP, TIFF) pair with.

use super::{CodecError, EncodeOptions};
use crate::imaging::{CanonicalImage, PixelLayout};
use image::codecs::ico::IcoEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tga::TgaEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ImageEncoder, ImageFormat};

/// Decode `bytes` as `format` with the `image` crate.
pub fn decode_with(bytes: &[u8], format: ImageFormat) -> Result<CanonicalImage, CodecError> {
    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        CodecError::decode(format!("{} decode failed: {e}", format_name(format)))
    })?;
    Ok(CanonicalImage::from_dynamic(img)?)
}

fn format_name(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("image")
}

fn encode_failed(format: &str, err: impl std::fmt::Display) -> CodecError {
    CodecError::encode(format!("{format} encode failed: {err}"))
}

/// Feed a canonical image to an `image` crate encoder.
fn write_with(img: &CanonicalImage, encoder: impl ImageEncoder, format: &str) -> Result<(), CodecError> {
    let color = match img.layout() {
        PixelLayout::Rgb => image::ExtendedColorType::Rgb8,
        PixelLayout::Rgba => image::ExtendedColorType::Rgba8,
    };
    encoder
        .write_image(img.pixels(), img.width(), img.height(), color)
        .map_err(|e| encode_failed(format, e))
}

// =============================================================================
// PNG
// =============================================================================

pub fn decode_png(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    decode_with(bytes, ImageFormat::Png)
}

/// 8-bit RGB or RGBA, non-interlaced.
pub fn encode_png(img: &CanonicalImage, _opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    write_with(img, PngEncoder::new(&mut out), "png")?;
    Ok(out)
}

// =============================================================================
// JPEG
// =============================================================================

pub fn decode_jpeg(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    decode_with(bytes, ImageFormat::Jpeg)
}

/// Baseline JFIF. Alpha is composited over the configured background.
pub fn encode_jpeg(img: &CanonicalImage, opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let img = opts.opaque(img);
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, opts.quality.value() as u8);
    write_with(&img, encoder, "jpeg")?;
    mark_jfif_101(&mut out);
    Ok(out)
}

/// Stamp the APP0 segment as JFIF 1.01; the stream carries no JFXX extension,
/// which is the only thing later revisions add.
fn mark_jfif_101(jpeg: &mut [u8]) {
    // SOI, APP0 marker, 2-byte length, "JFIF\0", major, minor
    if jpeg.len() > 12 && jpeg[2..4] == [0xFF, 0xE0] && &jpeg[6..11] == b"JFIF\0" {
        jpeg[11] = 1;
        jpeg[12] = 1;
    }
}

// =============================================================================
// ICO
// =============================================================================

pub fn decode_ico(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    decode_with(bytes, ImageFormat::Ico)
}

/// One PNG-compressed 32-bit entry. Icons cannot exceed 256x256.
pub fn encode_ico(img: &CanonicalImage, _opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    if img.width() > 256 || img.height() > 256 {
        return Err(CodecError::encode(format!(
            "icons are limited to 256x256, image is {}x{}",
            img.width(),
            img.height()
        )));
    }
    let rgba = img.to_rgba();
    let mut out = Vec::new();
    write_with(&rgba, IcoEncoder::new(&mut out), "ico")?;
    Ok(out)
}

// =============================================================================
// TGA
// =============================================================================

pub fn decode_tga(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    decode_with(bytes, ImageFormat::Tga)
}

/// Truecolour Targa, run-length encoded unless disabled, with a TGA 2.0 footer.
pub fn encode_tga(img: &CanonicalImage, opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let encoder = TgaEncoder::new(&mut out);
    let encoder = if opts.tga_rle {
        encoder
    } else {
        encoder.disable_rle()
    };
    write_with(img, encoder, "tga")?;
    // extension area offset, developer directory offset, signature
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(b"TRUEVISION-XFILE.\0");
    Ok(out)
}

// =============================================================================
// WebP
// =============================================================================

pub fn decode_webp(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    decode_with(bytes, ImageFormat::WebP)
}

/// Lossless WebP.
pub fn encode_webp(img: &CanonicalImage, _opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    write_with(img, WebPEncoder::new_lossless(&mut out), "webp")?;
    Ok(out)
}
