//! Encapsulated PostScript rasters.
//!
//! The writer emits a one-page EPSF-3.0 file holding a single image with
//! ASCIIHex data inline: a Level 2 `colorimage` for opaque images, and a
//! Level 3 masked image (`ImageType 3`, `InterleaveType 1`) with an 8-bit
//! mask sample before each pixel when the image has alpha.
//!
//! The reader is not a PostScript interpreter. It finds the first `image`
//! or `colorimage` operator, reads the operands or image dictionary pushed
//! before it, and decodes the hex samples that follow. A masked image comes
//! back as RGBA, anything else as RGB. DOS EPS binaries (with the `C5D0D3C6`
//! header) fall back to their embedded TIFF preview when the PostScript part
//! holds no readable raster.

use super::builtin::decode_with;
use super::bytes::raster_len;
use super::{CodecError, EncodeOptions};
use crate::imaging::{CanonicalImage, PixelLayout};
use image::ImageFormat;

const DOS_EPS_MAGIC: [u8; 4] = [0xC5, 0xD0, 0xD3, 0xC6];
/// Sample bytes per hex line; 64 characters keeps lines well under 255.
const HEX_LINE_BYTES: usize = 32;
const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

pub fn sniff(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%!PS") || bytes.starts_with(&DOS_EPS_MAGIC)
}

pub fn decode(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    if bytes.starts_with(&DOS_EPS_MAGIC) {
        return decode_dos_eps(bytes);
    }
    decode_postscript(bytes)
}

fn decode_dos_eps(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    let mut r = super::bytes::Reader::new(bytes);
    r.skip(4, "DOS EPS magic")?;
    let ps_offset = r.u32_le("PostScript offset")? as usize;
    let ps_len = r.u32_le("PostScript length")? as usize;
    r.skip(8, "metafile section")?;
    let tiff_offset = r.u32_le("TIFF offset")? as usize;
    let tiff_len = r.u32_le("TIFF length")? as usize;

    let section = |offset: usize, len: usize| {
        bytes
            .get(offset..offset.saturating_add(len))
            .filter(|s| !s.is_empty())
    };
    let postscript = section(ps_offset, ps_len)
        .ok_or_else(|| CodecError::decode("DOS EPS PostScript section is out of bounds"))?;
    match decode_postscript(postscript) {
        Ok(img) => Ok(img),
        Err(ps_err) => match section(tiff_offset, tiff_len) {
            Some(tiff) => {
                log::debug!("EPS raster unreadable ({ps_err}), using TIFF preview");
                decode_with(tiff, ImageFormat::Tiff)
            }
            None => Err(ps_err),
        },
    }
}

/// How an interleaved mask sample becomes alpha. A mask sample that decodes
/// to 0 marks a painted pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mask {
    /// `/Decode [1 0]`: the sample is the opacity.
    Opacity,
    /// `/Decode [0 1]`, the default: the sample is the transparency.
    Transparency,
}

impl Mask {
    fn alpha(self, sample: u8) -> u8 {
        match self {
            Mask::Opacity => sample,
            Mask::Transparency => 255 - sample,
        }
    }
}

/// Where an image operator sits and what was pushed before it.
#[derive(Debug)]
struct ImageCall {
    width: u32,
    height: u32,
    components: usize,
    mask: Option<Mask>,
    bottom_up: bool,
    /// Byte offset just past the operator token.
    data_start: usize,
}

fn decode_postscript(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    let call = find_image_call(bytes)?;
    let per_pixel = call.components + call.mask.is_some() as usize;
    let samples = raster_len(call.width, call.height, per_pixel, "PostScript raster")?;
    let data = read_hex(&bytes[call.data_start..], samples)?;

    let layout = if call.mask.is_some() {
        PixelLayout::Rgba
    } else {
        PixelLayout::Rgb
    };
    let (width, height) = (call.width as usize, call.height as usize);
    let row_len = width * per_pixel;
    let mut pixels = Vec::with_capacity(width * height * layout.channels());
    for y in 0..height {
        let src_row = if call.bottom_up { height - 1 - y } else { y };
        for px in data[src_row * row_len..(src_row + 1) * row_len].chunks_exact(per_pixel) {
            let (alpha, colour) = match call.mask {
                Some(mask) => (Some(mask.alpha(px[0])), &px[1..]),
                None => (None, px),
            };
            match colour {
                [v] => pixels.extend_from_slice(&[*v, *v, *v]),
                rgb => pixels.extend_from_slice(rgb),
            }
            pixels.extend(alpha);
        }
    }
    Ok(CanonicalImage::new(call.width, call.height, layout, pixels)?)
}

// =============================================================================
// Tokens
// =============================================================================

/// A token and the byte offset just past it.
type Token<'a> = (&'a [u8], usize);

fn is_delimiter(c: u8) -> bool {
    c.is_ascii_whitespace() || b"()<>[]{}/%".contains(&c)
}

fn is_image_operator(token: &[u8]) -> bool {
    token == b"image" || token == b"colorimage"
}

/// Tokens up to and including the first image operator. Comments are
/// dropped and strings come back whole.
fn tokens(data: &[u8]) -> Vec<Token<'_>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let c = data[i];
        let start = i;
        match c {
            b'%' => {
                while i < data.len() && data[i] != b'\n' && data[i] != b'\r' {
                    i += 1;
                }
                continue;
            }
            c if c.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'(' => {
                let mut depth = 0;
                while i < data.len() {
                    match data[i] {
                        b'\\' => i += 1,
                        b'(' => depth += 1,
                        b')' => depth -= 1,
                        _ => {}
                    }
                    i += 1;
                    if depth == 0 {
                        break;
                    }
                }
            }
            b'[' | b']' | b'{' | b'}' => i += 1,
            b'<' | b'>' if data.get(i + 1) == Some(&c) => i += 2,
            _ => {
                i += 1;
                while i < data.len() && !is_delimiter(data[i]) {
                    i += 1;
                }
            }
        }
        let end = i.min(data.len());
        let token = &data[start..end];
        out.push((token, end));
        if is_image_operator(token) {
            break;
        }
    }
    out
}

fn number(token: &[u8]) -> Option<f64> {
    std::str::from_utf8(token).ok()?.parse().ok()
}

// =============================================================================
// Image operands
// =============================================================================

fn no_raster() -> CodecError {
    CodecError::decode("no image or colorimage raster found in PostScript")
}

fn find_image_call(data: &[u8]) -> Result<ImageCall, CodecError> {
    let tokens = tokens(data);
    let Some((&(op, data_start), operands)) = tokens.split_last() else {
        return Err(no_raster());
    };
    if !is_image_operator(op) {
        return Err(no_raster());
    }

    if op == b"colorimage" {
        let n = operands.last().map(|t| t.0).ok_or_else(no_raster)?;
        let multi = operands.len().checked_sub(2).map(|i| operands[i].0);
        if multi != Some(b"false".as_slice()) {
            return Err(CodecError::decode(
                "colorimage with separate data sources is not supported",
            ));
        }
        let components = match n {
            b"1" => 1,
            b"3" => 3,
            other => {
                return Err(CodecError::decode(format!(
                    "colorimage with {} components is not supported",
                    String::from_utf8_lossy(other)
                )));
            }
        };
        return operand_form(operands, components, data_start);
    }
    if operands.last().map(|t| t.0) == Some(b">>".as_slice()) {
        return dictionary_form(operands, data_start);
    }
    operand_form(operands, 1, data_start)
}

/// `width height bits [a b c d tx ty] source image`
fn operand_form(operands: &[Token], components: usize, data_start: usize) -> Result<ImageCall, CodecError> {
    let bracket = operands
        .iter()
        .rposition(|t| t.0 == b"[")
        .ok_or_else(no_raster)?;
    let at = |i: usize| operands.get(i).and_then(|t| number(t.0));
    let first = bracket.checked_sub(3).ok_or_else(no_raster)?;
    let (Some(width), Some(height), Some(bits)) = (at(first), at(first + 1), at(first + 2)) else {
        return Err(no_raster());
    };
    check_bits(bits)?;
    let (width, height) = raster_size(width, height)?;
    let d = at(bracket + 4).unwrap_or(-1.0);

    Ok(ImageCall {
        width,
        height,
        components,
        mask: None,
        bottom_up: d > 0.0,
        data_start,
    })
}

fn check_bits(bits: f64) -> Result<(), CodecError> {
    if bits != 8.0 {
        return Err(CodecError::decode(format!(
            "only 8-bit PostScript rasters are supported, got {bits}"
        )));
    }
    Ok(())
}

fn raster_size(width: f64, height: f64) -> Result<(u32, u32), CodecError> {
    let valid = |v: f64| v >= 1.0 && v <= u32::MAX as f64 && v.fract() == 0.0;
    if !valid(width) || !valid(height) {
        return Err(CodecError::decode(format!(
            "invalid PostScript raster size {width}x{height}"
        )));
    }
    Ok((width as u32, height as u32))
}

// =============================================================================
// Image dictionaries
// =============================================================================

#[derive(Debug)]
enum Value<'a> {
    Number(f64),
    Name(&'a [u8]),
    Array(Vec<f64>),
    Dict(Dict<'a>),
    /// A data source or any other executable value.
    Source,
}

#[derive(Debug, Default)]
struct Dict<'a>(Vec<(&'a [u8], Value<'a>)>);

impl<'a> Dict<'a> {
    fn get(&self, key: &[u8]) -> Option<&Value<'a>> {
        self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    fn number(&self, key: &[u8]) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn array(&self, key: &[u8]) -> Option<&[f64]> {
        match self.get(key)? {
            Value::Array(a) => Some(a.as_slice()),
            _ => None,
        }
    }

    fn dict(&self, key: &[u8]) -> Option<&Dict<'a>> {
        match self.get(key)? {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }
}

fn unterminated() -> CodecError {
    CodecError::decode("unterminated image dictionary in PostScript")
}

/// Parse `/key value` pairs up to the closing `>>`; `pos` starts just after `<<`.
fn parse_dict<'a>(tokens: &[Token<'a>], pos: &mut usize) -> Result<Dict<'a>, CodecError> {
    let mut dict = Dict::default();
    loop {
        let key = tokens.get(*pos).ok_or_else(unterminated)?.0;
        *pos += 1;
        if key == b">>" {
            return Ok(dict);
        }
        let Some(name) = key.strip_prefix(b"/") else {
            return Err(CodecError::decode(format!(
                "expected a key in image dictionary, found {:?}",
                String::from_utf8_lossy(key)
            )));
        };
        let value = parse_value(tokens, pos)?;
        dict.0.push((name, value));
    }
}

fn parse_value<'a>(tokens: &[Token<'a>], pos: &mut usize) -> Result<Value<'a>, CodecError> {
    let token = tokens.get(*pos).ok_or_else(unterminated)?.0;
    *pos += 1;
    match token {
        b"<<" => Ok(Value::Dict(parse_dict(tokens, pos)?)),
        b"[" => {
            let mut values = Vec::new();
            loop {
                let t = tokens.get(*pos).ok_or_else(unterminated)?.0;
                *pos += 1;
                if t == b"]" {
                    return Ok(Value::Array(values));
                }
                values.push(number(t).ok_or_else(|| {
                    CodecError::decode("non-numeric array in image dictionary")
                })?);
            }
        }
        b"{" => {
            let mut depth = 1;
            while depth > 0 {
                match tokens.get(*pos).ok_or_else(unterminated)?.0 {
                    b"{" => depth += 1,
                    b"}" => depth -= 1,
                    _ => {}
                }
                *pos += 1;
            }
            Ok(Value::Source)
        }
        b"currentfile" => {
            // each `/Name filter` pair wraps the file in one more filter
            while tokens.get(*pos + 1).is_some_and(|t| t.0 == b"filter") {
                *pos += 2;
            }
            Ok(Value::Source)
        }
        t if t.starts_with(b"/") => Ok(Value::Name(&t[1..])),
        t => Ok(number(t).map_or(Value::Source, Value::Number)),
    }
}

/// Width, height, components and orientation of an `ImageType 1` dictionary.
fn image_dict(dict: &Dict) -> Result<(u32, u32, usize, bool), CodecError> {
    let missing = |key: &str| CodecError::decode(format!("image dictionary has no {key}"));
    let width = dict.number(b"Width").ok_or_else(|| missing("Width"))?;
    let height = dict.number(b"Height").ok_or_else(|| missing("Height"))?;
    check_bits(dict.number(b"BitsPerComponent").ok_or_else(|| missing("BitsPerComponent"))?)?;
    let (width, height) = raster_size(width, height)?;
    let components = match dict.array(b"Decode").ok_or_else(|| missing("Decode"))?.len() {
        2 => 1,
        6 => 3,
        n => {
            return Err(CodecError::decode(format!(
                "images with {} colour components are not supported",
                n / 2
            )));
        }
    };
    let matrix = dict.array(b"ImageMatrix").ok_or_else(|| missing("ImageMatrix"))?;
    let bottom_up = matrix.get(3).is_some_and(|&d| d > 0.0);
    Ok((width, height, components, bottom_up))
}

/// `<< /ImageType 1 ... >> image`, or a masked `ImageType 3` image.
fn dictionary_form(operands: &[Token], data_start: usize) -> Result<ImageCall, CodecError> {
    let mut depth = 0usize;
    let mut open = None;
    for (i, t) in operands.iter().enumerate().rev() {
        match t.0 {
            b">>" => depth += 1,
            b"<<" => {
                depth -= 1;
                if depth == 0 {
                    open = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let mut pos = open.ok_or_else(unterminated)? + 1;
    let top = parse_dict(operands, &mut pos)?;

    let image_type = top.number(b"ImageType").unwrap_or(0.0);
    if image_type == 1.0 {
        let (width, height, components, bottom_up) = image_dict(&top)?;
        return Ok(ImageCall {
            width,
            height,
            components,
            mask: None,
            bottom_up,
            data_start,
        });
    }
    if image_type != 3.0 {
        return Err(CodecError::decode(format!(
            "PostScript ImageType {image_type} is not supported"
        )));
    }

    let interleave = top.number(b"InterleaveType").unwrap_or(0.0);
    if interleave != 1.0 {
        return Err(CodecError::decode(format!(
            "masked images with InterleaveType {interleave} are not supported"
        )));
    }
    let data = top
        .dict(b"DataDict")
        .ok_or_else(|| CodecError::decode("masked image has no DataDict"))?;
    let mask = top
        .dict(b"MaskDict")
        .ok_or_else(|| CodecError::decode("masked image has no MaskDict"))?;
    let (width, height, components, bottom_up) = image_dict(data)?;
    let mask_bits = mask.number(b"BitsPerComponent").unwrap_or(0.0);
    if mask.number(b"Width") != Some(width as f64)
        || mask.number(b"Height") != Some(height as f64)
        || mask_bits != 8.0
    {
        return Err(CodecError::decode(
            "image mask must be 8-bit and match the image size",
        ));
    }
    let sense = match mask.array(b"Decode") {
        Some(d) if d == [1.0, 0.0] => Mask::Opacity,
        _ => Mask::Transparency,
    };

    Ok(ImageCall {
        width,
        height,
        components,
        mask: Some(sense),
        bottom_up,
        data_start,
    })
}

/// Decode `count` bytes of hex digits, skipping whitespace.
fn read_hex(data: &[u8], count: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(count.min(data.len() / 2));
    let mut high: Option<u8> = None;
    for &c in data {
        if out.len() == count {
            break;
        }
        let nibble = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            c if c.is_ascii_whitespace() => continue,
            b'>' => break,
            other => {
                return Err(CodecError::decode(format!(
                    "unexpected character {:?} in hex raster data",
                    other as char
                )));
            }
        };
        match high.take() {
            Some(h) => out.push(h << 4 | nibble),
            None => high = Some(nibble),
        }
    }
    if out.len() < count {
        return Err(CodecError::decode(format!(
            "hex raster data ended after {} of {count} bytes",
            out.len()
        )));
    }
    Ok(out)
}

// =============================================================================
// Writer
// =============================================================================

pub fn encode(img: &CanonicalImage, _opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let (w, h) = img.dimensions();
    let alpha = img.layout().has_alpha();
    let matrix = format!("[{w} 0 0 -{h} 0 {h}]");

    let mut ps = String::with_capacity(768 + img.pixels().len() * 2 + img.pixels().len() / 16);
    ps.push_str("%!PS-Adobe-3.0 EPSF-3.0\n%%Creator: transmute\n");
    ps.push_str(&format!("%%BoundingBox: 0 0 {w} {h}\n"));
    ps.push_str(if alpha {
        "%%LanguageLevel: 3\n"
    } else {
        "%%LanguageLevel: 2\n"
    });
    ps.push_str("%%Pages: 1\n%%EndComments\n%%Page: 1 1\ngsave\n");
    ps.push_str(&format!("{w} {h} scale\n"));
    if alpha {
        ps.push_str(&format!(
            "/DeviceRGB setcolorspace\n\
             << /ImageType 3 /InterleaveType 1\n\
             /DataDict << /ImageType 1 /Width {w} /Height {h} /BitsPerComponent 8\n\
             /Decode [0 1 0 1 0 1] /ImageMatrix {matrix}\n\
             /DataSource currentfile /ASCIIHexDecode filter >>\n\
             /MaskDict << /ImageType 1 /Width {w} /Height {h} /BitsPerComponent 8\n\
             /Decode [1 0] /ImageMatrix {matrix} >>\n\
             >> image\n"
        ));
    } else {
        ps.push_str(&format!(
            "{w} {h} 8 {matrix}\n\
             currentfile /ASCIIHexDecode filter\n\
             false 3 colorimage\n"
        ));
    }

    // the mask sample leads each pixel
    let order: &[usize] = if alpha { &[3, 0, 1, 2] } else { &[0, 1, 2] };
    let channels = img.channels();
    let samples = img
        .pixels()
        .chunks_exact(channels)
        .flat_map(|px| order.iter().map(move |&c| px[c]));
    for (i, b) in samples.enumerate() {
        ps.push(HEX_DIGITS[(b >> 4) as usize] as char);
        ps.push(HEX_DIGITS[(b & 0x0F) as usize] as char);
        if (i + 1) % HEX_LINE_BYTES == 0 {
            ps.push('\n');
        }
    }
    if !ps.ends_with('\n') {
        ps.push('\n');
    }
    ps.push_str(">\ngrestore\nshowpage\n%%EOF\n");
    Ok(ps.into_bytes())
}
