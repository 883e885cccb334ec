//! JPEG 2000 Part 1, lossless subset, as a JP2 file or a bare codestream.
//!
//! Images are coded with zero wavelet decompositions, so every component is
//! one LL subband split into 64x64 code-blocks. Tier-1 ([`t1`]) runs the
//! bit-plane passes over each block with the MQ coder ([`mq`]), tier-2
//! ([`t2`]) packs the blocks of one component into a packet, and
//! [`codestream`] frames the packets with marker segments. This keeps every
//! file standard-conforming while avoiding the wavelet and rate control
//! machinery entirely.
//!
//! Decoding accepts the same subset plus the variations other encoders
//! commonly produce inside it (SOP/EPH markers, the reversible colour
//! transform, any progression order, smaller code-blocks, tile-parts).
//! Components map by count: one is gray, two gray + alpha, three RGB, and
//! four or more RGBA.

mod codestream;
mod mq;
mod t1;
mod t2;

use super::bytes::{Reader, put_u16, put_u32};
use super::{CodecError, EncodeOptions};
use crate::imaging::{CanonicalImage, PixelLayout};

const SIGNATURE_BOX: [u8; 12] = [0, 0, 0, 0x0C, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A];
const BRAND: &[u8; 4] = b"jp2 ";
/// sRGB enumerated colour space.
const SRGB: u32 = 16;

pub fn is_jp2(bytes: &[u8]) -> bool {
    bytes.starts_with(&SIGNATURE_BOX)
}

pub fn is_codestream(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0x4F, 0xFF, 0x51])
}

pub fn decode(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    let stream = if is_jp2(bytes) {
        find_codestream(bytes)?
    } else if is_codestream(bytes) {
        bytes
    } else {
        return Err(CodecError::decode("not a JPEG 2000 file or codestream"));
    };
    let planes = codestream::decode(stream)?;
    to_image(planes)
}

pub fn encode_codestream(img: &CanonicalImage, _opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    codestream::encode(img.width(), img.height(), img.channels(), img.pixels())
}

pub fn encode_jp2(img: &CanonicalImage, opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let stream = encode_codestream(img, opts)?;
    let channels = img.channels() as u16;

    let mut header = Vec::new();
    let mut ihdr = Vec::with_capacity(14);
    put_u32(&mut ihdr, img.height());
    put_u32(&mut ihdr, img.width());
    put_u16(&mut ihdr, channels);
    ihdr.extend_from_slice(&[7, 7, 0, 0]); // 8-bit unsigned, wavelet coded, known colour space, no IPR
    write_box(&mut header, b"ihdr", &ihdr);

    let mut colr = vec![1, 0, 0]; // enumerated, precedence, approximation
    put_u32(&mut colr, SRGB);
    write_box(&mut header, b"colr", &colr);

    if img.layout().has_alpha() {
        let mut cdef = Vec::new();
        put_u16(&mut cdef, 4);
        // (channel, type, association): colour channels then unassociated opacity
        for (channel, kind, assoc) in [(0, 0, 1), (1, 0, 2), (2, 0, 3), (3, 1, 0)] {
            put_u16(&mut cdef, channel);
            put_u16(&mut cdef, kind);
            put_u16(&mut cdef, assoc);
        }
        write_box(&mut header, b"cdef", &cdef);
    }

    let mut out = SIGNATURE_BOX.to_vec();
    let mut ftyp = BRAND.to_vec();
    put_u32(&mut ftyp, 0);
    ftyp.extend_from_slice(BRAND);
    write_box(&mut out, b"ftyp", &ftyp);
    write_box(&mut out, b"jp2h", &header);
    if stream.len() + 8 > u32::MAX as usize {
        return Err(CodecError::encode("codestream exceeds 4 GiB"));
    }
    write_box(&mut out, b"jp2c", &stream);
    Ok(out)
}

fn write_box(out: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
    put_u32(out, (body.len() + 8) as u32);
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
}

/// Walk the top-level boxes and return the body of the first `jp2c`.
fn find_codestream(bytes: &[u8]) -> Result<&[u8], CodecError> {
    let mut r = Reader::new(bytes);
    while r.remaining() > 0 {
        let start = r.position();
        let len = r.u32_be("box length")? as u64;
        let kind = r.take(4, "box type")?;
        let len = match len {
            0 => (bytes.len() - start) as u64,
            1 => r.u64_be("extended box length")?,
            n => n,
        };
        let header = (r.position() - start) as u64;
        if len < header {
            return Err(CodecError::decode(format!(
                "JP2 box {} has invalid length {len}",
                String::from_utf8_lossy(kind)
            )));
        }
        let body_len = usize::try_from(len - header)
            .map_err(|_| CodecError::decode("JP2 box length overflows"))?;
        let body = r.take(body_len, "box body")?;
        match kind {
            b"jp2c" => return Ok(body),
            b"jp2h" => check_header(body)?,
            _ => {}
        }
    }
    Err(CodecError::decode("JP2 file has no codestream box"))
}

/// Reject header boxes that change how components turn into colours.
fn check_header(body: &[u8]) -> Result<(), CodecError> {
    let mut r = Reader::new(body);
    while r.remaining() >= 8 {
        let len = r.u32_be("box length")? as usize;
        let kind = r.take(4, "box type")?;
        let body_len = match len {
            0 => r.remaining(),
            n if n >= 8 => n - 8,
            _ => return Err(CodecError::decode("JP2 header box has invalid length")),
        };
        let sub = r.take(body_len, "header box body")?;
        match kind {
            b"ihdr" => {
                let mut ihdr = Reader::new(sub);
                ihdr.skip(10, "image header")?;
                let depth = ihdr.u8("bit depth")?;
                // 255 defers to the per-component depths in the codestream
                if depth != 7 && depth != 255 {
                    return Err(CodecError::decode(format!(
                        "unsupported JPEG 2000 feature: {}-bit samples",
                        (depth & 0x7F) + 1
                    )));
                }
            }
            b"pclr" | b"cmap" => {
                return Err(CodecError::decode(
                    "unsupported JPEG 2000 feature: palette colour",
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

fn to_image(planes: codestream::Planes) -> Result<CanonicalImage, CodecError> {
    let codestream::Planes {
        width,
        height,
        components,
    } = planes;
    let (colour, layout) = match components.len() {
        1 => (1, PixelLayout::Rgb),
        2 => (1, PixelLayout::Rgba),
        3 => (3, PixelLayout::Rgb),
        _ => (3, PixelLayout::Rgba),
    };
    let count = width as usize * height as usize;
    let mut pixels = Vec::with_capacity(count * layout.channels());
    for i in 0..count {
        if colour == 1 {
            let v = components[0][i];
            pixels.extend_from_slice(&[v, v, v]);
        } else {
            pixels.extend(components[..3].iter().map(|p| p[i]));
        }
        if layout.has_alpha() {
            pixels.push(components[colour][i]);
        }
    }
    Ok(CanonicalImage::new(width, height, layout, pixels)?)
}
