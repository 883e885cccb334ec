//! TIFF: decoded by the `image` crate, encoded here.
//!
//! Output is a big-endian ("MM") baseline file with one IFD and one strip.
//! Rows are PackBits-compressed individually, RGB is chunky 8-bit, and alpha
//! is written as an unassociated extra sample.

use super::builtin::decode_with;
use super::bytes::{patch_u32, put_u16, put_u32};
use super::{CodecError, EncodeOptions, packbits};
use crate::imaging::CanonicalImage;
use image::ImageFormat;

const SHORT: u16 = 3;
const LONG: u16 = 4;
const RATIONAL: u16 = 5;

const COMPRESSION_PACKBITS: u16 = 32773;
const PHOTOMETRIC_RGB: u16 = 2;
const EXTRA_SAMPLE_UNASSOCIATED_ALPHA: u16 = 2;
const RESOLUTION_UNIT_INCH: u16 = 2;

pub fn decode(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    decode_with(bytes, ImageFormat::Tiff)
}

/// One IFD entry whose value either fits inline or points at `offset` data.
struct Entry {
    tag: u16,
    kind: u16,
    count: u32,
    value: u32,
}

impl Entry {
    fn short(tag: u16, v: u16) -> Self {
        // inline SHORTs are left-justified in the 4-byte field
        Self { tag, kind: SHORT, count: 1, value: (v as u32) << 16 }
    }

    fn long(tag: u16, v: u32) -> Self {
        Self { tag, kind: LONG, count: 1, value: v }
    }
}

pub fn encode(img: &CanonicalImage, _opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let (width, height) = img.dimensions();
    let spp = img.channels() as u16;

    let mut out = Vec::new();
    out.extend_from_slice(b"MM");
    put_u16(&mut out, 42);
    put_u32(&mut out, 0); // IFD offset, patched below

    let strip_offset = out.len() as u32;
    for y in 0..height {
        packbits::encode(img.row(y), &mut out);
    }
    let strip_len = out.len() as u32 - strip_offset;
    if out.len() % 2 == 1 {
        out.push(0);
    }

    let bits_offset = out.len() as u32;
    for _ in 0..spp {
        put_u16(&mut out, 8);
    }
    let resolution_offset = out.len() as u32;
    // 72/1 for both axes
    for _ in 0..2 {
        put_u32(&mut out, 72);
        put_u32(&mut out, 1);
    }

    let mut entries = vec![
        Entry::long(256, width),
        Entry::long(257, height),
        Entry { tag: 258, kind: SHORT, count: spp as u32, value: bits_offset },
        Entry::short(259, COMPRESSION_PACKBITS),
        Entry::short(262, PHOTOMETRIC_RGB),
        Entry::long(273, strip_offset),
        Entry::short(277, spp),
        Entry::long(278, height),
        Entry::long(279, strip_len),
        Entry { tag: 282, kind: RATIONAL, count: 1, value: resolution_offset },
        Entry { tag: 283, kind: RATIONAL, count: 1, value: resolution_offset + 8 },
        Entry::short(284, 1),
        Entry::short(296, RESOLUTION_UNIT_INCH),
    ];
    if img.layout().has_alpha() {
        entries.push(Entry::short(338, EXTRA_SAMPLE_UNASSOCIATED_ALPHA));
    }

    let ifd_offset = out.len();
    if ifd_offset > u32::MAX as usize {
        return Err(CodecError::encode("image is too large for a TIFF file"));
    }
    patch_u32(&mut out, 4, ifd_offset as u32);
    put_u16(&mut out, entries.len() as u16);
    for entry in &entries {
        put_u16(&mut out, entry.tag);
        put_u16(&mut out, entry.kind);
        put_u32(&mut out, entry.count);
        put_u32(&mut out, entry.value);
    }
    put_u32(&mut out, 0);
    Ok(out)
}
