//! Codestream syntax: marker segments around the tile data.
//!
//! The writer always emits the same shape: `SOC`, `SIZ`, `COD`, `QCD`, one
//! tile-part (`SOT` ... `SOD` + one packet per component) and `EOC`. The
//! reader accepts anything within the subset the tier-1/tier-2 code can
//! handle and names the first feature outside it.

use super::t1::{self, CodedBlock};
use super::t2;
use crate::formats::CodecError;
use crate::formats::bytes::{MAX_DECODE_PIXELS, Reader, patch_u32, put_u16, put_u32, raster_len};

pub const SOC: u16 = 0xFF4F;
const SIZ: u16 = 0xFF51;
const COD: u16 = 0xFF52;
const COC: u16 = 0xFF53;
const TLM: u16 = 0xFF55;
const PLM: u16 = 0xFF57;
const PLT: u16 = 0xFF58;
const QCD: u16 = 0xFF5C;
const QCC: u16 = 0xFF5D;
const RGN: u16 = 0xFF5E;
const POC: u16 = 0xFF5F;
const PPM: u16 = 0xFF60;
const PPT: u16 = 0xFF61;
const CRG: u16 = 0xFF63;
const COM: u16 = 0xFF64;
const SOT: u16 = 0xFF90;
const SOP: u16 = 0xFF91;
const SOD: u16 = 0xFF93;
const EOC: u16 = 0xFFD9;

/// 64x64 code-blocks, stored as exponent minus two.
const CODE_BLOCK_EXPONENT: u8 = 4;
const GUARD_BITS: u8 = 2;
/// Dynamic range exponent of the LL band for 8-bit samples.
const EPSILON: u8 = 8;
const DC_OFFSET: i32 = 128;
/// Magnitude bit-planes the decoder accepts; 8-bit samples need at most 10.
const MAX_PLANES: u32 = 16;

/// Decoded 8-bit planes, one per component.
#[derive(Debug)]
pub struct Planes {
    pub width: u32,
    pub height: u32,
    pub components: Vec<Vec<u8>>,
}

// =============================================================================
// Writer
// =============================================================================

/// Encode interleaved 8-bit samples with `channels` components per pixel.
pub fn encode(width: u32, height: u32, channels: usize, samples: &[u8]) -> Result<Vec<u8>, CodecError> {
    let max_planes = (GUARD_BITS + EPSILON - 1) as u32;
    let block_side = 1usize << (CODE_BLOCK_EXPONENT + 2);
    let (w, h) = (width as usize, height as usize);
    let cols = w.div_ceil(block_side);
    let rows = h.div_ceil(block_side);

    let mut out = Vec::new();
    put_u16(&mut out, SOC);

    put_u16(&mut out, SIZ);
    put_u16(&mut out, 38 + 3 * channels as u16);
    put_u16(&mut out, 0); // Rsiz: no profile restrictions claimed
    put_u32(&mut out, width);
    put_u32(&mut out, height);
    put_u32(&mut out, 0);
    put_u32(&mut out, 0);
    put_u32(&mut out, width); // one tile covering the image
    put_u32(&mut out, height);
    put_u32(&mut out, 0);
    put_u32(&mut out, 0);
    put_u16(&mut out, channels as u16);
    for _ in 0..channels {
        out.extend_from_slice(&[7, 1, 1]); // 8-bit unsigned, no subsampling
    }

    put_u16(&mut out, COD);
    put_u16(&mut out, 12);
    out.push(0); // no precincts, SOP or EPH
    out.push(0); // LRCP
    put_u16(&mut out, 1); // layers
    out.push(0); // no component transform
    out.push(0); // decomposition levels
    out.push(CODE_BLOCK_EXPONENT);
    out.push(CODE_BLOCK_EXPONENT);
    out.push(0); // code-block style
    out.push(1); // reversible 5/3

    put_u16(&mut out, QCD);
    put_u16(&mut out, 4);
    out.push(GUARD_BITS << 5); // no quantization
    out.push(EPSILON << 3);

    let sot = out.len();
    put_u16(&mut out, SOT);
    put_u16(&mut out, 10);
    put_u16(&mut out, 0); // tile index
    put_u32(&mut out, 0); // Psot, patched below
    out.push(0); // tile-part index
    out.push(1); // tile-part count
    put_u16(&mut out, SOD);

    let mut plane = vec![0i32; w * h];
    for c in 0..channels {
        for (dst, px) in plane.iter_mut().zip(samples.chunks_exact(channels)) {
            *dst = px[c] as i32 - DC_OFFSET;
        }
        let mut blocks: Vec<Option<CodedBlock>> = Vec::with_capacity(cols * rows);
        for by in 0..rows {
            for bx in 0..cols {
                let (x0, y0) = (bx * block_side, by * block_side);
                let bw = block_side.min(w - x0);
                let bh = block_side.min(h - y0);
                let mut coefficients = Vec::with_capacity(bw * bh);
                for y in y0..y0 + bh {
                    coefficients.extend_from_slice(&plane[y * w + x0..y * w + x0 + bw]);
                }
                blocks.push(t1::encode_block(&coefficients, bw, bh, max_planes)?);
            }
        }
        out.extend_from_slice(&t2::encode_packet(&blocks, cols, rows));
    }

    let psot = out.len() - sot;
    let psot = u32::try_from(psot).map_err(|_| CodecError::encode("tile data exceeds 4 GiB"))?;
    patch_u32(&mut out, sot + 6, psot);
    put_u16(&mut out, EOC);
    Ok(out)
}

// =============================================================================
// Reader
// =============================================================================

fn unsupported(feature: impl std::fmt::Display) -> CodecError {
    CodecError::decode(format!("unsupported JPEG 2000 feature: {feature}"))
}

#[derive(Default)]
struct Header {
    width: u32,
    height: u32,
    components: usize,
    /// Code-block width and height exponents.
    block: (u8, u8),
    sop: bool,
    eph: bool,
    colour_transform: bool,
    max_planes: u32,
    has_siz: bool,
    has_cod: bool,
    has_qcd: bool,
}

impl Header {
    fn read_siz(&mut self, seg: &[u8]) -> Result<(), CodecError> {
        let mut r = Reader::new(seg);
        r.skip(2, "Rsiz")?;
        let width = r.u32_be("Xsiz")?;
        let height = r.u32_be("Ysiz")?;
        let (x_off, y_off) = (r.u32_be("XOsiz")?, r.u32_be("YOsiz")?);
        let (tile_w, tile_h) = (r.u32_be("XTsiz")?, r.u32_be("YTsiz")?);
        let (tile_x, tile_y) = (r.u32_be("XTOsiz")?, r.u32_be("YTOsiz")?);
        let components = r.u16_be("Csiz")? as usize;
        if x_off != 0 || y_off != 0 || tile_x != 0 || tile_y != 0 {
            return Err(unsupported("image or tile offsets"));
        }
        if width == 0 || height == 0 || components == 0 {
            return Err(CodecError::decode("JPEG 2000 image has no samples"));
        }
        let samples = raster_len(width, height, components, "JPEG 2000 image")?;
        if samples > 4 * MAX_DECODE_PIXELS {
            return Err(CodecError::decode(format!(
                "JPEG 2000 image has too many samples ({components} components of {width}x{height})"
            )));
        }
        if tile_w < width || tile_h < height {
            return Err(unsupported("multiple tiles"));
        }
        for c in 0..components {
            let depth = r.u8("Ssiz")?;
            let (dx, dy) = (r.u8("XRsiz")?, r.u8("YRsiz")?);
            if depth & 0x80 != 0 {
                return Err(unsupported(format!("signed samples in component {c}")));
            }
            if depth != 7 {
                return Err(unsupported(format!("{}-bit samples in component {c}", depth + 1)));
            }
            if (dx, dy) != (1, 1) {
                return Err(unsupported(format!("subsampled component {c}")));
            }
        }
        self.width = width;
        self.height = height;
        self.components = components;
        self.has_siz = true;
        Ok(())
    }

    fn read_cod(&mut self, seg: &[u8]) -> Result<(), CodecError> {
        let mut r = Reader::new(seg);
        let style = r.u8("Scod")?;
        r.skip(1, "progression order")?;
        let layers = r.u16_be("layer count")?;
        let mct = r.u8("MCT")?;
        let levels = r.u8("decomposition levels")?;
        let xcb = r.u8("code-block width")?;
        let ycb = r.u8("code-block height")?;
        let cb_style = r.u8("code-block style")?;
        let transform = r.u8("transform")?;
        if layers != 1 {
            return Err(unsupported(format!("{layers} quality layers")));
        }
        if levels != 0 {
            return Err(unsupported(format!("{levels} wavelet decomposition levels")));
        }
        if xcb > 8 || ycb > 8 || xcb + ycb > 8 {
            return Err(CodecError::decode("invalid JPEG 2000 code-block size"));
        }
        if cb_style != 0 {
            let names = [
                "selective arithmetic coding bypass",
                "context resets",
                "termination on every pass",
                "vertically causal contexts",
                "predictable termination",
                "segmentation symbols",
            ];
            let name = names
                .iter()
                .enumerate()
                .find(|(bit, _)| cb_style & (1 << bit) != 0)
                .map_or("high-throughput block coding", |(_, n)| *n);
            return Err(unsupported(name));
        }
        let (mut bw, mut bh) = (xcb + 2, ycb + 2);
        if style & 1 != 0 {
            let precinct = r.u8("precinct size")?;
            let (px, py) = (precinct & 0x0F, precinct >> 4);
            if (1u64 << px) < self.width as u64 || (1u64 << py) < self.height as u64 {
                return Err(unsupported("multiple precincts"));
            }
            bw = bw.min(px);
            bh = bh.min(py);
        }
        if mct == 1 && transform != 1 {
            return Err(unsupported("irreversible colour transform"));
        }
        self.block = (bw, bh);
        self.sop = style & 2 != 0;
        self.eph = style & 4 != 0;
        self.colour_transform = mct == 1;
        self.has_cod = true;
        Ok(())
    }

    fn read_qcd(&mut self, seg: &[u8]) -> Result<(), CodecError> {
        let mut r = Reader::new(seg);
        let style = r.u8("Sqcd")?;
        if style & 0x1F != 0 {
            return Err(unsupported("quantized coefficients"));
        }
        let exponent = r.u8("SPqcd")? >> 3;
        let planes = ((style >> 5) + exponent) as u32;
        if planes == 0 {
            return Err(CodecError::decode("JPEG 2000 QCD leaves no magnitude bit-planes"));
        }
        if planes - 1 > MAX_PLANES {
            return Err(unsupported(format!("{} magnitude bit-planes", planes - 1)));
        }
        self.max_planes = planes - 1;
        self.has_qcd = true;
        Ok(())
    }
}

/// Read the marker segment body at the cursor.
fn segment<'a>(r: &mut Reader<'a>, marker: u16) -> Result<&'a [u8], CodecError> {
    let len = r.u16_be("marker segment length")? as usize;
    if len < 2 {
        return Err(CodecError::decode(format!(
            "marker {marker:#06X} has invalid length {len}"
        )));
    }
    r.take(len - 2, "marker segment")
}

pub fn decode(bytes: &[u8]) -> Result<Planes, CodecError> {
    let mut r = Reader::new(bytes);
    if r.u16_be("SOC marker")? != SOC {
        return Err(CodecError::decode("JPEG 2000 codestream does not start with SOC"));
    }

    let mut header = Header::default();
    loop {
        let marker = r.u16_be("main header marker")?;
        if marker == SOT {
            break;
        }
        let seg = segment(&mut r, marker)?;
        match marker {
            SIZ => header.read_siz(seg)?,
            COD => header.read_cod(seg)?,
            QCD => header.read_qcd(seg)?,
            COM | TLM | PLM | CRG => {}
            COC | QCC => return Err(unsupported("per-component coding parameters")),
            RGN => return Err(unsupported("region of interest")),
            POC => return Err(unsupported("progression order changes")),
            PPM => return Err(unsupported("packed packet headers")),
            other => {
                return Err(CodecError::decode(format!(
                    "unexpected marker {other:#06X} in JPEG 2000 main header"
                )));
            }
        }
    }
    if !(header.has_siz && header.has_cod && header.has_qcd) {
        return Err(CodecError::decode(
            "JPEG 2000 main header is missing SIZ, COD or QCD",
        ));
    }
    if header.colour_transform && header.components < 3 {
        return Err(CodecError::decode("colour transform needs three components"));
    }

    // gather every tile-part of the single tile
    let mut tile = Vec::new();
    loop {
        let start = r.position() - 2;
        let seg = segment(&mut r, SOT)?;
        let mut sot = Reader::new(seg);
        let index = sot.u16_be("Isot")?;
        let psot = sot.u32_be("Psot")? as usize;
        if index != 0 {
            return Err(unsupported("multiple tiles"));
        }
        loop {
            let marker = r.u16_be("tile-part header marker")?;
            if marker == SOD {
                break;
            }
            segment(&mut r, marker)?;
            match marker {
                COM | PLT => {}
                PPT => return Err(unsupported("packed packet headers")),
                _ => return Err(unsupported("tile-part coding parameters")),
            }
        }
        let end = if psot == 0 {
            // last tile-part runs to EOC
            if bytes.ends_with(&EOC.to_be_bytes()) {
                bytes.len() - 2
            } else {
                bytes.len()
            }
        } else {
            start + psot
        };
        if end < r.position() || end > bytes.len() {
            return Err(CodecError::decode("JPEG 2000 tile-part length is out of range"));
        }
        tile.extend_from_slice(r.take(end - r.position(), "tile data")?);
        if r.remaining() < 2 || r.u16_be("marker")? != SOT {
            break;
        }
    }

    decode_tile(&header, &tile)
}

fn decode_tile(header: &Header, data: &[u8]) -> Result<Planes, CodecError> {
    let (w, h) = (header.width as usize, header.height as usize);
    let (bw, bh) = (1usize << header.block.0, 1usize << header.block.1);
    let (cols, rows) = (w.div_ceil(bw), h.div_ceil(bh));

    let mut pos = 0;
    let mut planes: Vec<Vec<i32>> = Vec::with_capacity(header.components);
    for c in 0..header.components {
        if header.sop {
            if data.get(pos..pos + 2) != Some(&SOP.to_be_bytes()[..]) {
                return Err(CodecError::decode("missing SOP marker before packet"));
            }
            pos += 6;
        }
        let rest = data
            .get(pos..)
            .ok_or_else(|| CodecError::decode("JPEG 2000 tile data ended early"))?;
        let (blocks, used) = t2::decode_packet(rest, cols, rows, header.max_planes, header.eph)
            .map_err(|e| CodecError::decode(format!("component {c}: {e}")))?;
        pos += used;

        let mut plane = vec![0i32; w * h];
        for (n, block) in blocks.iter().enumerate() {
            let Some(block) = block else {
                continue;
            };
            let (x0, y0) = ((n % cols) * bw, (n / cols) * bh);
            let (cw, ch) = (bw.min(w - x0), bh.min(h - y0));
            let coefficients = t1::decode_block(block, cw, ch, header.max_planes)?;
            for (y, row) in coefficients.chunks_exact(cw).enumerate() {
                let at = (y0 + y) * w + x0;
                plane[at..at + cw].copy_from_slice(row);
            }
        }
        planes.push(plane);
    }

    if header.colour_transform {
        inverse_rct(&mut planes);
    }
    let components = planes
        .into_iter()
        .map(|p| {
            p.into_iter()
                .map(|v| (v + DC_OFFSET).clamp(0, 255) as u8)
                .collect()
        })
        .collect();
    Ok(Planes {
        width: header.width,
        height: header.height,
        components,
    })
}

/// Undo the reversible component transform on the first three planes.
fn inverse_rct(planes: &mut [Vec<i32>]) {
    let [y, u, v, ..] = planes else {
        return;
    };
    for i in 0..y.len() {
        let g = y[i] - ((u[i] + v[i]) >> 2);
        let r = v[i] + g;
        let b = u[i] + g;
        (y[i], u[i], v[i]) = (r, g, b);
    }
}
