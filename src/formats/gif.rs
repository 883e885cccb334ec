//! GIF: decoded by the `image` crate, encoded here.
//!
//! The encoder writes a single-frame image with one global colour table.
//! Opaque images are written as GIF87a with no extension blocks; images with
//! pixels below half opacity get GIF89a and a Graphic Control Extension that
//! reserves one palette slot as transparent. More than 256 colours are reduced
//! with a deterministic weighted median cut.

use super::builtin::decode_with;
use super::{CodecError, EncodeOptions};
use crate::imaging::{Background, CanonicalImage};
use image::ImageFormat;
use std::collections::HashMap;

/// Alpha below this becomes the transparent index.
const ALPHA_CUTOFF: u8 = 128;
const MAX_CODE: u16 = 4096;

/// Decode the first frame. Frames that turn out fully opaque come back as RGB.
pub fn decode(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    let img = decode_with(bytes, ImageFormat::Gif)?;
    if img.has_translucency() {
        Ok(img)
    } else {
        Ok(img.flatten(Background::default()))
    }
}

pub fn encode(img: &CanonicalImage, _opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let (width, height) = img.dimensions();
    if width > u16::MAX as u32 || height > u16::MAX as u32 {
        return Err(CodecError::encode(format!(
            "GIF dimensions are limited to 65535, image is {width}x{height}"
        )));
    }

    let channels = img.channels();
    let is_transparent = |px: &[u8]| channels == 4 && px[3] < ALPHA_CUTOFF;
    let transparent = img.pixels().chunks_exact(channels).any(is_transparent);

    let mut histogram: HashMap<[u8; 3], u32> = HashMap::new();
    for px in img.pixels().chunks_exact(channels) {
        if !is_transparent(px) {
            *histogram.entry([px[0], px[1], px[2]]).or_insert(0) += 1;
        }
    }
    let max_colors = if transparent { 255 } else { 256 };
    let mut palette = build_palette(histogram, max_colors);
    let transparent_index = transparent.then(|| {
        palette.push([0, 0, 0]);
        (palette.len() - 1) as u8
    });

    let mut cache: HashMap<[u8; 3], u8> = HashMap::new();
    let indices: Vec<u8> = img
        .pixels()
        .chunks_exact(channels)
        .map(|px| match transparent_index {
            Some(t) if is_transparent(px) => t,
            _ => {
                let rgb = [px[0], px[1], px[2]];
                let opaque_len = palette.len() - transparent_index.is_some() as usize;
                *cache
                    .entry(rgb)
                    .or_insert_with(|| nearest(&palette[..opaque_len], rgb))
            }
        })
        .collect();

    // Colour table sizes are powers of two from 2 to 256.
    let table_bits = (palette.len().max(2) as u32).next_power_of_two().trailing_zeros() as u8;
    let table_len = 1usize << table_bits;

    let mut out = Vec::with_capacity(indices.len() / 2 + 64 + table_len * 3);
    out.extend_from_slice(if transparent { b"GIF89a" } else { b"GIF87a" });
    out.extend_from_slice(&(width as u16).to_le_bytes());
    out.extend_from_slice(&(height as u16).to_le_bytes());
    // global table present, 8-bit colour resolution, table size
    out.push(0x80 | 0x70 | (table_bits - 1));
    out.push(0); // background colour index
    out.push(0); // pixel aspect ratio
    for i in 0..table_len {
        out.extend_from_slice(palette.get(i).unwrap_or(&[0, 0, 0]));
    }

    if let Some(index) = transparent_index {
        out.extend_from_slice(&[0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, index, 0x00]);
    }

    out.push(0x2C);
    out.extend_from_slice(&[0, 0, 0, 0]);
    out.extend_from_slice(&(width as u16).to_le_bytes());
    out.extend_from_slice(&(height as u16).to_le_bytes());
    out.push(0); // no local table, not interlaced

    let min_code_size = table_bits.max(2);
    out.push(min_code_size);
    for block in lzw_encode(&indices, min_code_size).chunks(255) {
        out.push(block.len() as u8);
        out.extend_from_slice(block);
    }
    out.push(0);
    out.push(0x3B);
    Ok(out)
}

// =============================================================================
// Palette
// =============================================================================

/// Exact palette when the image fits, weighted median cut otherwise.
fn build_palette(histogram: HashMap<[u8; 3], u32>, max_colors: usize) -> Vec<[u8; 3]> {
    let mut colors: Vec<([u8; 3], u32)> = histogram.into_iter().collect();
    colors.sort_unstable();
    if colors.len() <= max_colors {
        return colors.into_iter().map(|(c, _)| c).collect();
    }

    let mut boxes = vec![colors];
    while boxes.len() < max_colors {
        let Some((index, channel)) = widest_box(&boxes) else {
            break;
        };
        let mut bucket = boxes.swap_remove(index);
        bucket.sort_unstable_by_key(|(c, _)| (c[channel], *c));
        let total: u64 = bucket.iter().map(|(_, n)| *n as u64).sum();
        let mut running = 0u64;
        let mut split = 1;
        for (i, (_, n)) in bucket.iter().enumerate() {
            running += *n as u64;
            if running * 2 >= total {
                split = (i + 1).clamp(1, bucket.len() - 1);
                break;
            }
        }
        let upper = bucket.split_off(split);
        boxes.push(bucket);
        boxes.push(upper);
    }

    boxes.iter().map(|b| average(b)).collect()
}

/// The splittable box with the largest channel range, and that channel.
fn widest_box(boxes: &[Vec<([u8; 3], u32)>]) -> Option<(usize, usize)> {
    let mut best: Option<(u8, usize, usize)> = None;
    for (i, bucket) in boxes.iter().enumerate() {
        if bucket.len() < 2 {
            continue;
        }
        for channel in 0..3 {
            let (lo, hi) = bucket.iter().fold((255u8, 0u8), |(lo, hi), (c, _)| {
                (lo.min(c[channel]), hi.max(c[channel]))
            });
            let range = hi - lo;
            if best.is_none_or(|(r, _, _)| range > r) {
                best = Some((range, i, channel));
            }
        }
    }
    best.map(|(_, i, channel)| (i, channel))
}

fn average(bucket: &[([u8; 3], u32)]) -> [u8; 3] {
    let mut sum = [0u64; 3];
    let mut weight = 0u64;
    for (c, n) in bucket {
        for ch in 0..3 {
            sum[ch] += c[ch] as u64 * *n as u64;
        }
        weight += *n as u64;
    }
    let weight = weight.max(1);
    [0, 1, 2].map(|ch| ((sum[ch] + weight / 2) / weight) as u8)
}

fn nearest(palette: &[[u8; 3]], rgb: [u8; 3]) -> u8 {
    let distance = |p: &[u8; 3]| -> u32 {
        (0..3)
            .map(|ch| {
                let d = p[ch] as i32 - rgb[ch] as i32;
                (d * d) as u32
            })
            .sum()
    };
    palette
        .iter()
        .enumerate()
        .min_by_key(|(_, p)| distance(p))
        .map(|(i, _)| i as u8)
        .unwrap_or(0)
}

// =============================================================================
// LZW
// =============================================================================

/// Variable-width LZW as used by GIF, packed least-significant bit first.
fn lzw_encode(indices: &[u8], min_code_size: u8) -> Vec<u8> {
    let clear = 1u16 << min_code_size;
    let end = clear + 1;
    let mut bits = BitWriter::default();
    let mut code_size = min_code_size + 1;
    let mut next_code = end + 1;
    let mut table: HashMap<(u16, u8), u16> = HashMap::new();

    bits.write(clear, code_size);
    let Some((&first, rest)) = indices.split_first() else {
        bits.write(end, code_size);
        return bits.finish();
    };

    let mut prefix = first as u16;
    for &k in rest {
        if let Some(&code) = table.get(&(prefix, k)) {
            prefix = code;
            continue;
        }
        bits.write(prefix, code_size);
        if next_code < MAX_CODE {
            table.insert((prefix, k), next_code);
            next_code += 1;
            if next_code > (1 << code_size) && code_size < 12 {
                code_size += 1;
            }
        } else {
            bits.write(clear, code_size);
            table.clear();
            code_size = min_code_size + 1;
            next_code = end + 1;
        }
        prefix = k as u16;
    }
    bits.write(prefix, code_size);
    bits.write(end, code_size);
    bits.finish()
}

#[derive(Default)]
struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    len: u8,
}

impl BitWriter {
    fn write(&mut self, code: u16, size: u8) {
        self.acc |= (code as u32) << self.len;
        self.len += size;
        while self.len >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.len -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.len > 0 {
            self.out.push(self.acc as u8);
        }
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::test_images;
    use crate::imaging::PixelLayout;

    #[test]
    fn opaque_image_is_gif87a() {
        let bytes = encode(&test_images::rgb(128, 128), &EncodeOptions::default()).unwrap();
        assert_eq!(&bytes[..6], b"GIF87a");
        assert_eq!(&bytes[6..10], &[128, 0, 128, 0]);
        // the image descriptor follows the colour table directly
        let table_len = 3 << ((bytes[10] & 0x07) + 1);
        assert_eq!(bytes[13 + table_len], 0x2C);
        assert_eq!(*bytes.last().unwrap(), 0x3B);
    }

    #[test]
    fn transparent_pixels_make_gif89a() {
        let bytes = encode(&test_images::rgba(16, 16), &EncodeOptions::default()).unwrap();
        assert_eq!(&bytes[..6], b"GIF89a");
        let back = decode(&bytes).unwrap();
        assert_eq!(back.layout(), PixelLayout::Rgba);
        // column 0 has alpha 0, the last column alpha 255
        assert_eq!(back.pixel(0, 3)[3], 0);
        assert_eq!(back.pixel(15, 3)[3], 255);
    }

    #[test]
    fn few_colours_round_trip_exactly() {
        let img = test_images::flat(37, 21);
        let back = decode(&encode(&img, &EncodeOptions::default()).unwrap()).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn many_colours_are_quantized_to_256() {
        let img = CanonicalImage::from_fn(64, 64, PixelLayout::Rgb, |x, y| {
            [(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 255]
        })
        .unwrap();
        let bytes = encode(&img, &EncodeOptions::default()).unwrap();
        // full 256-entry global table
        assert_eq!(bytes[10] & 0x07, 7);
        let back = decode(&bytes).unwrap();
        assert_eq!(back.dimensions(), (64, 64));
        let error: u64 = back
            .pixels()
            .iter()
            .zip(img.pixels())
            .map(|(a, b)| (*a as i64 - *b as i64).unsigned_abs())
            .sum();
        // mean absolute error per sample stays small
        assert!(error / (64 * 64 * 3) < 12, "mean error {}", error / (64 * 64 * 3));
    }

    #[test]
    fn long_runs_cross_the_code_table_limit() {
        // enough distinct sequences to fill the 4096-entry table and reset
        let img = CanonicalImage::from_fn(300, 200, PixelLayout::Rgb, |x, y| {
            let v = ((x * 31 + y * 17) % 16) as u8 * 16;
            [v, 255 - v, v / 2, 255]
        })
        .unwrap();
        let back = decode(&encode(&img, &EncodeOptions::default()).unwrap()).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn single_pixel() {
        let img = CanonicalImage::new(1, 1, PixelLayout::Rgb, vec![9, 8, 7]).unwrap();
        let back = decode(&encode(&img, &EncodeOptions::default()).unwrap()).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn median_cut_is_deterministic() {
        let img = test_images::rgb(64, 48);
        let a = encode(&img, &EncodeOptions::default()).unwrap();
        let b = encode(&img, &EncodeOptions::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn oversized_dimensions_are_rejected() {
        let img = CanonicalImage::new(70_000, 1, PixelLayout::Rgb, vec![0; 210_000]).unwrap();
        assert!(matches!(
            encode(&img, &EncodeOptions::default()),
            Err(CodecError::Encode(_))
        ));
    }
}
