//! QuickDraw PICT version 2 pictures holding one direct-colour pixmap.
//!
//! Files start with a 512-byte application header (zeros when we write it),
//! then the picture: size, frame, and a stream of word-aligned opcodes. The
//! writer emits a `DirectBitsRect` with 32-bit pixels, packed as component
//! planes per row (packType 4): alpha, red, green, blue, or just the colour
//! planes for opaque images. The reader walks the opcode stream, skipping
//! drawing state it does not need, and decodes the first `DirectBitsRect` or
//! `DirectBitsRgn` with packType 1, 2 or 4.

use super::bytes::{Reader, patch_u16, put_u16, put_u32, raster_len};
use super::{CodecError, EncodeOptions, packbits};
use crate::imaging::{CanonicalImage, PixelLayout};

const HEADER_LEN: usize = 512;
const VERSION_2: [u8; 4] = [0x00, 0x11, 0x02, 0xFF];
const VERSION_1: [u8; 2] = [0x11, 0x01];
/// 72 dpi as a 16.16 fixed-point number.
const DPI_72: u32 = 0x0048_0000;
/// `rowBytes` is a 14-bit field; 32-bit pixels limit the width to this.
const MAX_WIDTH: u32 = 0x3FFF / 4;

const OP_END: u16 = 0x00FF;
const OP_DIRECT_BITS_RECT: u16 = 0x009A;
const OP_DIRECT_BITS_RGN: u16 = 0x009B;

/// True at either the usual offset or right at the start (no file header).
pub fn sniff(bytes: &[u8]) -> bool {
    let at = |base: usize| {
        bytes
            .get(base + 10..)
            .is_some_and(|rest| rest.starts_with(&VERSION_2) || rest.starts_with(&VERSION_1))
    };
    at(HEADER_LEN) || (at(0) && bytes.len() > 14)
}

pub fn decode(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    let base = if bytes
        .get(HEADER_LEN + 10..)
        .is_some_and(|rest| rest.starts_with(&VERSION_2) || rest.starts_with(&VERSION_1))
    {
        HEADER_LEN
    } else {
        0
    };
    let mut r = Reader::new(bytes);
    r.seek(base, "picture header")?;
    r.skip(2 + 8, "picture size and frame")?;
    if r.take(2, "version opcode")? == VERSION_1 {
        return Err(CodecError::decode("PICT version 1 pictures are not supported"));
    }
    r.seek(base + 10, "version opcode")?;

    loop {
        // version 2 opcodes are word aligned relative to the picture start
        if (r.position() - base) % 2 == 1 {
            r.skip(1, "opcode padding")?;
        }
        let opcode = r.u16_be("opcode")?;
        match opcode {
            OP_END => {
                return Err(CodecError::decode(
                    "PICT contains no direct-colour pixmap",
                ));
            }
            OP_DIRECT_BITS_RECT | OP_DIRECT_BITS_RGN => {
                return read_direct_bits(&mut r, opcode == OP_DIRECT_BITS_RGN);
            }
            0x0090 | 0x0091 | 0x0098 | 0x0099 => {
                return Err(CodecError::decode(
                    "indexed-colour PICT pixmaps are not supported",
                ));
            }
            0x8200 | 0x8201 => {
                return Err(CodecError::decode(
                    "QuickTime-compressed PICT images are not supported",
                ));
            }
            _ => skip_opcode(&mut r, opcode)?,
        }
    }
}

/// Skip the data of an opcode we do not interpret.
fn skip_opcode(r: &mut Reader, opcode: u16) -> Result<(), CodecError> {
    let what = "opcode data";
    let fixed = match opcode {
        0x0000 | 0x0017..=0x0019 | 0x001C | 0x001E | 0x0038..=0x003F | 0x0048..=0x004F | 0x0058..=0x005F
        | 0x0078..=0x007F | 0x0088..=0x008F | 0x00B0..=0x00CF | 0x8000..=0x80FF => 0,
        0x0004 => 1,
        0x0003 | 0x0005 | 0x0008 | 0x000D | 0x0011 | 0x0015 | 0x0016 | 0x0023 | 0x00A0 => 2,
        0x0006 | 0x0007 | 0x000B | 0x000C | 0x000E | 0x000F | 0x0021 | 0x0068..=0x006F => 4,
        0x001A | 0x001B | 0x001D | 0x001F | 0x0022 => 6,
        0x0002 | 0x0009 | 0x000A | 0x0010 | 0x0020 | 0x0030..=0x0037 | 0x0040..=0x0047
        | 0x0050..=0x0057 => 8,
        0x0060..=0x0067 => 12,
        0x0C00 => 24,
        // regions and polygons carry their own size, which includes the size word
        0x0001 | 0x0070..=0x0077 | 0x0080..=0x0087 => {
            let size = r.u16_be("region size")? as usize;
            return r.skip(size.saturating_sub(2), what);
        }
        0x00A1 => {
            r.skip(2, "comment kind")?;
            let size = r.u16_be("comment size")? as usize;
            return r.skip(size, what);
        }
        0x0024..=0x002F | 0x0092..=0x0097 | 0x009C..=0x009F | 0x00A2..=0x00AF => {
            let size = r.u16_be("opcode length")? as usize;
            return r.skip(size, what);
        }
        0x00D0..=0x00FE | 0x8100..=0xFFFF => {
            let size = r.u32_be("opcode length")? as usize;
            return r.skip(size, what);
        }
        // reserved opcodes encode their length in the high byte
        0x0100..=0x7FFF => (opcode >> 8) as usize * 2,
        other => {
            return Err(CodecError::decode(format!(
                "unsupported PICT opcode {other:#06x}"
            )));
        }
    };
    r.skip(fixed, what)
}

fn read_rect(r: &mut Reader) -> Result<(i16, i16, i16, i16), CodecError> {
    Ok((
        r.i16_be("rect top")?,
        r.i16_be("rect left")?,
        r.i16_be("rect bottom")?,
        r.i16_be("rect right")?,
    ))
}

fn read_direct_bits(r: &mut Reader, with_region: bool) -> Result<CanonicalImage, CodecError> {
    r.skip(4, "base address")?;
    let row_bytes = (r.u16_be("rowBytes")? & 0x3FFF) as usize;
    let (top, left, bottom, right) = read_rect(r)?;
    r.skip(2, "pixmap version")?;
    let pack_type = r.u16_be("packType")?;
    r.skip(4 + 4 + 4 + 2, "pixmap resolution")?;
    let pixel_size = r.u16_be("pixelSize")?;
    let cmp_count = r.u16_be("cmpCount")? as usize;
    let cmp_size = r.u16_be("cmpSize")?;
    r.skip(12, "pixmap tail")?;
    r.skip(8 + 8 + 2, "source and destination rects, transfer mode")?;
    if with_region {
        let size = r.u16_be("mask region size")? as usize;
        r.skip(size.saturating_sub(2), "mask region")?;
    }

    if pixel_size != 32 || cmp_size != 8 || !(cmp_count == 3 || cmp_count == 4) {
        return Err(CodecError::decode(format!(
            "unsupported PICT pixmap: {pixel_size}-bit pixels, {cmp_count}x{cmp_size}-bit components"
        )));
    }
    let width = (right as i32 - left as i32).max(0) as u32;
    let height = (bottom as i32 - top as i32).max(0) as u32;
    let w = width as usize;
    let layout = if cmp_count == 4 {
        PixelLayout::Rgba
    } else {
        PixelLayout::Rgb
    };

    let mut pixels = Vec::with_capacity(raster_len(width, height, layout.channels(), "PICT pixmap")?);
    let mut push = |a: u8, rgb: [u8; 3]| {
        pixels.extend_from_slice(&rgb);
        if layout.has_alpha() {
            pixels.push(a);
        }
    };
    for _ in 0..height {
        if row_bytes < 8 || pack_type == 1 {
            // interleaved alpha (or padding), red, green, blue
            let row = r.take(row_bytes.max(w * 4), "unpacked row")?;
            for px in row[..w * 4].chunks_exact(4) {
                push(px[0], [px[1], px[2], px[3]]);
            }
        } else if pack_type == 2 {
            let row = r.take(w * 3, "unpacked row")?;
            for px in row.chunks_exact(3) {
                push(255, [px[0], px[1], px[2]]);
            }
        } else if pack_type == 0 || pack_type == 4 {
            let count = if row_bytes > 250 {
                r.u16_be("row byte count")? as usize
            } else {
                r.u8("row byte count")? as usize
            };
            let packed = r.take(count, "packed row")?;
            let mut planes = Vec::with_capacity(w * cmp_count);
            packbits::decode(packed, &mut planes, w * cmp_count)?;
            let plane = |c: usize, x: usize| planes[c * w + x];
            for x in 0..w {
                if cmp_count == 4 {
                    push(plane(0, x), [plane(1, x), plane(2, x), plane(3, x)]);
                } else {
                    push(255, [plane(0, x), plane(1, x), plane(2, x)]);
                }
            }
        } else {
            return Err(CodecError::decode(format!(
                "unsupported PICT packType {pack_type}"
            )));
        }
    }
    Ok(CanonicalImage::new(width, height, layout, pixels)?)
}

pub fn encode(img: &CanonicalImage, _opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let (width, height) = img.dimensions();
    if width > MAX_WIDTH || height > i16::MAX as u32 {
        return Err(CodecError::encode(format!(
            "PICT pixmaps are limited to {MAX_WIDTH}x{} pixels, image is {width}x{height}",
            i16::MAX
        )));
    }
    let (w, h) = (width as u16, height as u16);
    let rect = |out: &mut Vec<u8>| {
        for v in [0, 0, h, w] {
            put_u16(out, v);
        }
    };
    let alpha = img.layout().has_alpha();
    let cmp_count: u16 = if alpha { 4 } else { 3 };
    let row_bytes = width as usize * 4;

    let mut out = vec![0u8; HEADER_LEN];
    put_u16(&mut out, 0); // picture size, patched below
    rect(&mut out);
    out.extend_from_slice(&VERSION_2);

    put_u16(&mut out, 0x0C00);
    put_u16(&mut out, 0xFFFE); // extended version 2 header
    put_u16(&mut out, 0);
    put_u32(&mut out, DPI_72);
    put_u32(&mut out, DPI_72);
    rect(&mut out);
    put_u32(&mut out, 0);

    put_u16(&mut out, 0x001E); // DefHilite
    put_u16(&mut out, 0x0001); // Clip
    put_u16(&mut out, 10);
    rect(&mut out);

    put_u16(&mut out, OP_DIRECT_BITS_RECT);
    put_u32(&mut out, 0x0000_00FF); // base address placeholder
    put_u16(&mut out, row_bytes as u16 | 0x8000);
    rect(&mut out);
    put_u16(&mut out, 0); // pmVersion
    put_u16(&mut out, 4); // packType: component planes, PackBits
    put_u32(&mut out, 0); // packSize
    put_u32(&mut out, DPI_72);
    put_u32(&mut out, DPI_72);
    put_u16(&mut out, 16); // RGBDirect
    put_u16(&mut out, 32);
    put_u16(&mut out, cmp_count);
    put_u16(&mut out, 8);
    put_u32(&mut out, 0); // planeBytes
    put_u32(&mut out, 0); // pmTable
    put_u32(&mut out, 0); // reserved
    rect(&mut out); // source
    rect(&mut out); // destination
    put_u16(&mut out, 0); // srcCopy

    let channels = img.channels();
    let order: &[usize] = if alpha { &[3, 0, 1, 2] } else { &[0, 1, 2] };
    let mut planes = Vec::with_capacity(width as usize * channels);
    let mut packed = Vec::new();
    for y in 0..height {
        let row = img.row(y);
        if row_bytes < 8 {
            // too narrow to pack: interleaved alpha-or-pad, red, green, blue
            for px in row.chunks_exact(channels) {
                out.push(if alpha { px[3] } else { 0 });
                out.extend_from_slice(&px[..3]);
            }
            continue;
        }
        planes.clear();
        for &c in order {
            planes.extend(row.iter().skip(c).step_by(channels));
        }
        packed.clear();
        packbits::encode(&planes, &mut packed);
        if row_bytes > 250 {
            put_u16(&mut out, packed.len() as u16);
        } else {
            out.push(packed.len() as u8);
        }
        out.extend_from_slice(&packed);
    }
    if (out.len() - HEADER_LEN) % 2 == 1 {
        out.push(0);
    }
    put_u16(&mut out, OP_END);

    // only the low 16 bits of the size survive in version 2 pictures
    let size = (out.len() - HEADER_LEN) as u16;
    patch_u16(&mut out, HEADER_LEN, size);
    Ok(out)
}
