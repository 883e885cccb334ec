//! Windows bitmap: decoded by the `image` crate, encoded here as a Windows 3.x
//! `BITMAPINFOHEADER` file with 24-bit BGR rows stored top-down.

use super::builtin::decode_with;
use super::{CodecError, EncodeOptions};
use crate::imaging::CanonicalImage;
use image::ImageFormat;

const FILE_HEADER_LEN: u32 = 14;
const INFO_HEADER_LEN: u32 = 40;
/// 72 dpi in pixels per metre.
const PIXELS_PER_METRE: i32 = 2835;

pub fn decode(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    decode_with(bytes, ImageFormat::Bmp)
}

pub fn encode(img: &CanonicalImage, opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let img = opts.opaque(img);
    let (width, height) = img.dimensions();
    let row_len = (width as usize * 3).next_multiple_of(4);
    let image_len = row_len
        .checked_mul(height as usize)
        .filter(|&n| n <= (u32::MAX - FILE_HEADER_LEN - INFO_HEADER_LEN) as usize)
        .ok_or_else(|| CodecError::encode("image is too large for a BMP file"))?;
    let offset = FILE_HEADER_LEN + INFO_HEADER_LEN;

    let mut out = Vec::with_capacity(offset as usize + image_len);
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&(offset + image_len as u32).to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&offset.to_le_bytes());

    out.extend_from_slice(&INFO_HEADER_LEN.to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    // negative height marks top-down row order
    out.extend_from_slice(&(-(height as i32)).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&24u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // BI_RGB
    out.extend_from_slice(&(image_len as u32).to_le_bytes());
    out.extend_from_slice(&PIXELS_PER_METRE.to_le_bytes());
    out.extend_from_slice(&PIXELS_PER_METRE.to_le_bytes());
    out.extend_from_slice(&[0; 8]); // palette counts

    for y in 0..height {
        let start = out.len();
        for px in img.row(y).chunks_exact(3) {
            out.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        out.resize(start + row_len, 0);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::test_images;
    use crate::imaging::PixelLayout;

    fn le_i32(b: &[u8]) -> i32 {
        i32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    #[test]
    fn header_describes_top_down_24_bit() {
        let bytes = encode(&test_images::rgb(5, 3), &EncodeOptions::default()).unwrap();
        assert_eq!(&bytes[..2], b"BM");
        assert_eq!(le_i32(&bytes[14..18]), 40);
        assert_eq!(le_i32(&bytes[18..22]), 5);
        assert_eq!(le_i32(&bytes[22..26]), -3);
        assert_eq!(u16::from_le_bytes([bytes[28], bytes[29]]), 24);
        // 5 pixels = 15 bytes, padded to 16
        assert_eq!(bytes.len(), 54 + 16 * 3);
        assert_eq!(le_i32(&bytes[2..6]) as usize, bytes.len());
    }

    #[test]
    fn first_row_is_stored_first_in_bgr_order() {
        let img = CanonicalImage::new(1, 2, PixelLayout::Rgb, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let bytes = encode(&img, &EncodeOptions::default()).unwrap();
        assert_eq!(&bytes[54..57], &[3, 2, 1]);
        assert_eq!(&bytes[58..61], &[6, 5, 4]);
    }

    #[test]
    fn alpha_is_flattened_over_the_background() {
        let img = CanonicalImage::new(1, 1, PixelLayout::Rgba, vec![0, 0, 0, 0]).unwrap();
        let back = decode(&encode(&img, &EncodeOptions::default()).unwrap()).unwrap();
        assert_eq!(back.layout(), PixelLayout::Rgb);
        assert_eq!(back.pixels(), &[255, 255, 255]);
    }
}
