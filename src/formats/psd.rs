//! Adobe Photoshop documents, flattened composite only.
//!
//! The reader takes the merged image data at the end of the file: 8-bit RGB
//! or grayscale, raw or PackBits, with a fourth (or second, for grayscale)
//! channel treated as alpha. Layers, masks and image resources are skipped.
//! The writer emits a minimal document with empty sections and raw planar
//! channels.

use super::bytes::{Reader, put_u16, put_u32, raster_len};
use super::{CodecError, EncodeOptions, packbits};
use crate::imaging::{CanonicalImage, PixelLayout};

const SIGNATURE: &[u8; 4] = b"8BPS";
const MODE_GRAYSCALE: u16 = 1;
const MODE_RGB: u16 = 3;
const COMPRESSION_RAW: u16 = 0;
const COMPRESSION_RLE: u16 = 1;
/// Version 1 documents are limited to 30000 pixels per side.
const MAX_SIDE: u32 = 30_000;

pub fn decode(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    let mut r = Reader::new(bytes);
    if r.take(4, "signature")? != SIGNATURE {
        return Err(CodecError::decode("not a Photoshop document"));
    }
    let version = r.u16_be("version")?;
    if version != 1 {
        return Err(CodecError::decode(format!(
            "unsupported Photoshop version {version}"
        )));
    }
    r.skip(6, "reserved bytes")?;
    let channels = r.u16_be("channel count")? as usize;
    let height = r.u32_be("height")?;
    let width = r.u32_be("width")?;
    let depth = r.u16_be("bit depth")?;
    let mode = r.u16_be("colour mode")?;
    if width > MAX_SIDE || height > MAX_SIDE {
        return Err(CodecError::decode(format!(
            "Photoshop documents are limited to {MAX_SIDE} pixels per side, header says {width}x{height}"
        )));
    }
    if depth != 8 {
        return Err(CodecError::decode(format!(
            "only 8-bit Photoshop documents are supported, got {depth}-bit"
        )));
    }
    let (colour_channels, layout) = match (mode, channels) {
        (MODE_RGB, 3) => (3, PixelLayout::Rgb),
        (MODE_RGB, n) if n >= 4 => (3, PixelLayout::Rgba),
        (MODE_GRAYSCALE, 1) => (1, PixelLayout::Rgb),
        (MODE_GRAYSCALE, n) if n >= 2 => (1, PixelLayout::Rgba),
        _ => {
            return Err(CodecError::decode(format!(
                "unsupported Photoshop colour mode {mode} with {channels} channels"
            )));
        }
    };
    let used = colour_channels + layout.has_alpha() as usize;

    for section in ["colour mode data", "image resources", "layer and mask data"] {
        let len = r.u32_be(section)? as usize;
        r.skip(len, section)?;
    }

    let plane = raster_len(width, height, 1, "Photoshop document")?;
    let compression = r.u16_be("compression")?;
    let planes = match compression {
        COMPRESSION_RAW => r.take(plane * used, "image data")?.to_vec(),
        COMPRESSION_RLE => {
            // row byte counts for every channel come first, then the packed rows
            let counts = r.take(channels * height as usize * 2, "row byte counts")?;
            let mut planes = Vec::with_capacity(plane * used);
            for (i, count) in counts.chunks_exact(2).take(used * height as usize).enumerate() {
                let count = u16::from_be_bytes([count[0], count[1]]) as usize;
                let row = r.take(count, "packed row")?;
                packbits::decode(row, &mut planes, width as usize).map_err(|e| {
                    CodecError::decode(format!("row {} of channel {}: {e}", i % height as usize, i / height as usize))
                })?;
            }
            planes
        }
        other => {
            return Err(CodecError::decode(format!(
                "unsupported Photoshop compression {other}"
            )));
        }
    };

    let channel = |c: usize, i: usize| planes[c * plane + i];
    let mut pixels = Vec::with_capacity(plane * layout.channels());
    for i in 0..plane {
        if colour_channels == 3 {
            pixels.extend_from_slice(&[channel(0, i), channel(1, i), channel(2, i)]);
        } else {
            let v = channel(0, i);
            pixels.extend_from_slice(&[v, v, v]);
        }
        if layout.has_alpha() {
            pixels.push(channel(colour_channels, i));
        }
    }
    Ok(CanonicalImage::new(width, height, layout, pixels)?)
}

pub fn encode(img: &CanonicalImage, _opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let (width, height) = img.dimensions();
    if width > MAX_SIDE || height > MAX_SIDE {
        return Err(CodecError::encode(format!(
            "Photoshop documents are limited to {MAX_SIDE} pixels per side, image is {width}x{height}"
        )));
    }
    let channels = img.channels();

    let mut out = Vec::with_capacity(26 + 14 + img.pixels().len());
    out.extend_from_slice(SIGNATURE);
    put_u16(&mut out, 1);
    out.extend_from_slice(&[0; 6]);
    put_u16(&mut out, channels as u16);
    put_u32(&mut out, height);
    put_u32(&mut out, width);
    put_u16(&mut out, 8);
    put_u16(&mut out, MODE_RGB);
    // colour mode data, image resources, layer and mask data
    for _ in 0..3 {
        put_u32(&mut out, 0);
    }
    put_u16(&mut out, COMPRESSION_RAW);
    for c in 0..channels {
        out.extend(img.pixels().iter().skip(c).step_by(channels));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::test_images;

    fn header(channels: u16, width: u32, height: u32, mode: u16) -> Vec<u8> {
        let mut out = SIGNATURE.to_vec();
        put_u16(&mut out, 1);
        out.extend_from_slice(&[0; 6]);
        put_u16(&mut out, channels);
        put_u32(&mut out, height);
        put_u32(&mut out, width);
        put_u16(&mut out, 8);
        put_u16(&mut out, mode);
        for _ in 0..3 {
            put_u32(&mut out, 0);
        }
        out
    }

    #[test]
    fn writes_planar_raw_channels() {
        let img = CanonicalImage::new(2, 1, PixelLayout::Rgb, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let bytes = encode(&img, &EncodeOptions::default()).unwrap();
        assert_eq!(&bytes[..4], b"8BPS");
        assert_eq!(&bytes[bytes.len() - 8..], &[0, 0, 1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn reads_packbits_data() {
        let img = test_images::flat(12, 5);
        let mut bytes = header(3, 12, 5, MODE_RGB);
        put_u16(&mut bytes, COMPRESSION_RLE);
        let mut rows = Vec::new();
        let mut counts = Vec::new();
        for c in 0..3 {
            for y in 0..5 {
                let row: Vec<u8> = img.row(y).iter().skip(c).step_by(3).copied().collect();
                let before = rows.len();
                packbits::encode(&row, &mut rows);
                counts.push((rows.len() - before) as u16);
            }
        }
        for count in counts {
            put_u16(&mut bytes, count);
        }
        bytes.extend_from_slice(&rows);
        assert_eq!(decode(&bytes).unwrap(), img);
    }

    #[test]
    fn grayscale_expands_to_rgb() {
        let mut bytes = header(2, 2, 1, MODE_GRAYSCALE);
        put_u16(&mut bytes, COMPRESSION_RAW);
        bytes.extend_from_slice(&[10, 20, 255, 0]);
        let img = decode(&bytes).unwrap();
        assert_eq!(img.layout(), PixelLayout::Rgba);
        assert_eq!(img.pixels(), &[10, 10, 10, 255, 20, 20, 20, 0]);
    }

    #[test]
    fn sixteen_bit_documents_are_rejected() {
        let mut bytes = header(3, 1, 1, MODE_RGB);
        bytes[22..24].copy_from_slice(&16u16.to_be_bytes());
        assert!(decode(&bytes).unwrap_err().to_string().contains("16-bit"));
    }

    #[test]
    fn truncated_image_data_is_an_error() {
        let bytes = encode(&test_images::rgb(8, 8), &EncodeOptions::default()).unwrap();
        assert!(decode(&bytes[..bytes.len() - 10]).is_err());
    }

    #[test]
    fn implausible_header_sizes_are_decode_errors() {
        let mut bytes = header(4, u32::MAX, u32::MAX, MODE_RGB);
        put_u16(&mut bytes, COMPRESSION_RLE);
        assert!(decode(&bytes).unwrap_err().to_string().contains("30000 pixels per side"));

        // within the side limit, but far more pixels than any decoder allocates
        let mut bytes = header(4, 29_000, 29_000, MODE_RGB);
        put_u16(&mut bytes, COMPRESSION_RLE);
        assert!(decode(&bytes).unwrap_err().to_string().contains("out of range"));
    }

    #[test]
    fn oversized_images_are_rejected() {
        let img = CanonicalImage::new(30_001, 1, PixelLayout::Rgb, vec![0; 90_003]).unwrap();
        assert!(encode(&img, &EncodeOptions::default()).is_err());
    }
}
