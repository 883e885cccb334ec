//! Single-image PDF documents.
//!
//! The writer produces a one-page document whose page is exactly the image
//! size in points, drawing one image XObject. Pixel data is Flate-compressed
//! unless disabled in config, and alpha becomes a DeviceGray soft mask (which
//! needs PDF 1.4; opaque output stays at 1.3).
//!
//! The reader is deliberately small: it scans every `N G obj` in the file,
//! parses the object syntax it finds, and decodes the first image XObject
//! that is not itself somebody's soft mask. Cross-reference tables are not
//! consulted, so damaged or incrementally updated files still work as long as
//! the objects themselves are intact. Compressed object streams and
//! encryption are not supported.

use super::bytes::raster_len;
use super::builtin::decode_with;
use super::{CodecError, EncodeOptions};
use crate::imaging::{CanonicalImage, PixelLayout};
use image::ImageFormat;
use std::collections::{HashMap, HashSet};

/// Nesting limit for arrays and dictionaries.
const MAX_DEPTH: usize = 64;
const FLATE_LEVEL: u8 = 6;

// =============================================================================
// Object model
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Object {
    Null,
    Bool(bool),
    Number(f64),
    Name(String),
    String(Vec<u8>),
    Array(Vec<Object>),
    Dict(HashMap<String, Object>),
    Ref(u32),
}

impl Object {
    fn as_dict(&self) -> Option<&HashMap<String, Object>> {
        match self {
            Object::Dict(d) => Some(d),
            _ => None,
        }
    }

    fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(n) => Some(n),
            _ => None,
        }
    }
}

struct Indirect {
    value: Object,
    /// Offset of the first stream byte, when the object is a stream.
    stream: Option<usize>,
}

fn malformed(what: impl std::fmt::Display) -> CodecError {
    CodecError::decode(format!("malformed PDF: {what}"))
}

fn is_whitespace(c: u8) -> bool {
    matches!(c, 0 | b'\t' | b'\n' | 0x0C | b'\r' | b' ')
}

fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

// =============================================================================
// Lexer / parser
// =============================================================================

struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if is_whitespace(c) {
                self.pos += 1;
            } else if c == b'%' {
                while self.peek().is_some_and(|c| c != b'\n' && c != b'\r') {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// A run of regular characters, possibly empty.
    fn keyword(&mut self) -> &'a [u8] {
        let start = self.pos;
        while self.peek().is_some_and(is_regular) {
            self.pos += 1;
        }
        &self.data[start..self.pos]
    }

    fn integer(&mut self) -> Option<u32> {
        self.skip_whitespace();
        let word = self.keyword();
        std::str::from_utf8(word).ok()?.parse().ok()
    }

    fn parse(&mut self, depth: usize) -> Result<Object, CodecError> {
        if depth > MAX_DEPTH {
            return Err(malformed("objects nested too deeply"));
        }
        self.skip_whitespace();
        let c = self.peek().ok_or_else(|| malformed("unexpected end of file"))?;
        match c {
            b'/' => {
                self.pos += 1;
                Ok(Object::Name(decode_name(self.keyword())))
            }
            b'<' if self.data.get(self.pos + 1) == Some(&b'<') => {
                self.pos += 2;
                let mut dict = HashMap::new();
                loop {
                    self.skip_whitespace();
                    if self.data[self.pos..].starts_with(b">>") {
                        self.pos += 2;
                        return Ok(Object::Dict(dict));
                    }
                    let key = match self.parse(depth + 1)? {
                        Object::Name(n) => n,
                        other => return Err(malformed(format!("dictionary key {other:?}"))),
                    };
                    let value = self.parse(depth + 1)?;
                    dict.insert(key, value);
                }
            }
            b'<' => {
                self.pos += 1;
                let end = self.data[self.pos..]
                    .iter()
                    .position(|&c| c == b'>')
                    .ok_or_else(|| malformed("unterminated hex string"))?;
                let hex = &self.data[self.pos..self.pos + end];
                self.pos += end + 1;
                Ok(Object::String(decode_hex(hex)?))
            }
            b'(' => self.literal_string(),
            b'[' => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    self.skip_whitespace();
                    match self.peek() {
                        Some(b']') => {
                            self.pos += 1;
                            return Ok(Object::Array(items));
                        }
                        Some(_) => items.push(self.parse(depth + 1)?),
                        None => return Err(malformed("unterminated array")),
                    }
                }
            }
            _ => self.scalar(),
        }
    }

    fn literal_string(&mut self) -> Result<Object, CodecError> {
        self.pos += 1;
        let mut out = Vec::new();
        let mut nesting = 0;
        loop {
            let c = self.peek().ok_or_else(|| malformed("unterminated string"))?;
            self.pos += 1;
            match c {
                b'\\' => {
                    if let Some(next) = self.peek() {
                        self.pos += 1;
                        out.push(next);
                    }
                }
                b'(' => {
                    nesting += 1;
                    out.push(c);
                }
                b')' if nesting == 0 => return Ok(Object::String(out)),
                b')' => {
                    nesting -= 1;
                    out.push(c);
                }
                _ => out.push(c),
            }
        }
    }

    /// Numbers, booleans, `null`, and `N G R` references.
    fn scalar(&mut self) -> Result<Object, CodecError> {
        let start = self.pos;
        let word = self.keyword();
        match word {
            b"true" => return Ok(Object::Bool(true)),
            b"false" => return Ok(Object::Bool(false)),
            b"null" => return Ok(Object::Null),
            _ => {}
        }
        let text = std::str::from_utf8(word).map_err(|_| malformed("non-ASCII token"))?;
        let number: f64 = text
            .parse()
            .map_err(|_| malformed(format!("unexpected token {text:?} at byte {start}")))?;

        if let Ok(num) = text.parse::<u32>() {
            let after = self.pos;
            let is_ref = self.integer().is_some() && {
                self.skip_whitespace();
                self.keyword() == b"R"
            };
            if is_ref {
                return Ok(Object::Ref(num));
            }
            self.pos = after;
        }
        Ok(Object::Number(number))
    }
}

/// Names may escape bytes as `#xx`.
fn decode_name(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let escaped = (raw[i] == b'#')
            .then(|| raw.get(i + 1..i + 3))
            .flatten()
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match escaped {
            Some(v) => {
                out.push(v);
                i += 3;
            }
            None => {
                out.push(raw[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn decode_hex(hex: &[u8]) -> Result<Vec<u8>, CodecError> {
    let digits: Vec<u8> = hex
        .iter()
        .copied()
        .filter(|c| !is_whitespace(*c))
        .map(|c| {
            (c as char)
                .to_digit(16)
                .map(|d| d as u8)
                .ok_or_else(|| malformed(format!("bad hex digit {:?}", c as char)))
        })
        .collect::<Result<_, _>>()?;
    // an odd trailing digit is padded with 0
    Ok(digits
        .chunks(2)
        .map(|p| p[0] << 4 | p.get(1).copied().unwrap_or(0))
        .collect())
}

// =============================================================================
// Document
// =============================================================================

struct Document<'a> {
    data: &'a [u8],
    objects: HashMap<u32, Indirect>,
}

impl<'a> Document<'a> {
    fn parse(data: &'a [u8]) -> Self {
        let mut objects = HashMap::new();
        let mut search = 0;
        while let Some(found) = find(&data[search..], b"obj") {
            let at = search + found;
            search = at + 3;
            let follows_token = data.get(at + 3).is_none_or(|&c| !is_regular(c));
            let Some(number) = object_number(data, at).filter(|_| follows_token) else {
                continue;
            };
            let mut lexer = Lexer::new(data, at + 3);
            let Ok(value) = lexer.parse(0) else {
                continue;
            };
            lexer.skip_whitespace();
            let mut stream = None;
            if lexer.keyword() == b"stream" {
                let mut start = lexer.pos;
                if data.get(start) == Some(&b'\r') {
                    start += 1;
                }
                if data.get(start) == Some(&b'\n') {
                    start += 1;
                }
                stream = Some(start);
                // skip stream bodies with a direct length so their bytes are not scanned
                if let Some(Object::Number(len)) = value.as_dict().and_then(|d| d.get("Length")) {
                    lexer.pos = (start + *len as usize).min(data.len());
                }
            }
            search = search.max(lexer.pos);
            // later definitions replace earlier ones, as in incremental updates
            objects.insert(number, Indirect { value, stream });
        }
        Self { data, objects }
    }

    fn resolve<'o>(&'o self, mut obj: &'o Object) -> &'o Object {
        for _ in 0..MAX_DEPTH {
            match obj {
                Object::Ref(n) => match self.objects.get(n) {
                    Some(ind) => obj = &ind.value,
                    None => return &Object::Null,
                },
                _ => return obj,
            }
        }
        &Object::Null
    }

    fn get<'o>(&'o self, dict: &'o HashMap<String, Object>, key: &str) -> &'o Object {
        dict.get(key).map_or(&Object::Null, |v| self.resolve(v))
    }

    fn number(&self, dict: &HashMap<String, Object>, key: &str) -> Option<f64> {
        match self.get(dict, key) {
            Object::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn object(&self, number: u32) -> Result<&Indirect, CodecError> {
        self.objects
            .get(&number)
            .ok_or_else(|| malformed(format!("object {number} is referenced but missing")))
    }

    fn stream_data(&self, number: u32) -> Result<&'a [u8], CodecError> {
        let ind = self.object(number)?;
        let start = ind
            .stream
            .ok_or_else(|| malformed(format!("object {number} is not a stream")))?;
        let declared = ind
            .value
            .as_dict()
            .and_then(|d| self.number(d, "Length"))
            .map(|n| n as usize)
            .and_then(|len| self.data.get(start..start.checked_add(len)?));
        if let Some(data) = declared {
            return Ok(data);
        }
        // missing or wrong /Length: fall back to the endstream keyword
        let end = find(&self.data[start..], b"endstream")
            .ok_or_else(|| malformed(format!("stream {number} has no end")))?;
        let mut data = &self.data[start..start + end];
        if let Some(trimmed) = data.strip_suffix(b"\n") {
            data = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
        }
        Ok(data)
    }

    fn image_numbers(&self) -> Vec<u32> {
        let mut numbers: Vec<u32> = self
            .objects
            .iter()
            .filter(|(_, ind)| {
                ind.stream.is_some()
                    && ind.value.as_dict().is_some_and(|d| {
                        self.get(d, "Subtype").as_name() == Some("Image")
                            && self.get(d, "ImageMask") != &Object::Bool(true)
                    })
            })
            .map(|(n, _)| *n)
            .collect();
        numbers.sort_unstable();
        numbers
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parse `N G` backwards from the `obj` keyword at `at`.
fn object_number(data: &[u8], at: usize) -> Option<u32> {
    // move `i` back over a non-empty run matching `class`
    fn back_over(data: &[u8], i: &mut usize, class: fn(u8) -> bool) -> Option<()> {
        let end = *i;
        while *i > 0 && class(data[*i - 1]) {
            *i -= 1;
        }
        (*i < end).then_some(())
    }
    let digit: fn(u8) -> bool = |c| c.is_ascii_digit();

    let mut i = at;
    back_over(data, &mut i, is_whitespace)?;
    back_over(data, &mut i, digit)?;
    back_over(data, &mut i, is_whitespace)?;
    let end = i;
    back_over(data, &mut i, digit)?;
    if i > 0 && is_regular(data[i - 1]) {
        return None;
    }
    std::str::from_utf8(&data[i..end]).ok()?.parse().ok()
}

// =============================================================================
// Image decoding
// =============================================================================

pub fn decode(bytes: &[u8]) -> Result<CanonicalImage, CodecError> {
    let doc = Document::parse(bytes);
    let images = doc.image_numbers();
    let masks: HashSet<u32> = images
        .iter()
        .filter_map(|n| match doc.objects[n].value.as_dict()?.get("SMask") {
            Some(Object::Ref(m)) => Some(*m),
            _ => None,
        })
        .collect();
    let number = images
        .iter()
        .copied()
        .find(|n| !masks.contains(n))
        .ok_or_else(|| CodecError::decode("PDF contains no image XObject"))?;

    let colour = decode_xobject(&doc, number)?;
    let dict = doc.objects[&number].value.as_dict().ok_or_else(|| malformed("image without dictionary"))?;
    let Some(Object::Ref(mask)) = dict.get("SMask") else {
        return Ok(colour);
    };
    let alpha = decode_xobject(&doc, *mask)?;
    if alpha.dimensions() != colour.dimensions() {
        return Err(CodecError::decode(format!(
            "soft mask is {}x{} but the image is {}x{}",
            alpha.width(),
            alpha.height(),
            colour.width(),
            colour.height()
        )));
    }
    let pixels = colour
        .pixels()
        .chunks_exact(3)
        .zip(alpha.pixels().chunks_exact(3))
        .flat_map(|(c, a)| [c[0], c[1], c[2], a[0]])
        .collect();
    Ok(CanonicalImage::new(colour.width(), colour.height(), PixelLayout::Rgba, pixels)?)
}

enum Samples {
    Raw(Vec<u8>),
    /// Already a full image (DCT data goes through the JPEG decoder).
    Decoded(CanonicalImage),
}

/// Decode one image XObject to RGB.
fn decode_xobject(doc: &Document, number: u32) -> Result<CanonicalImage, CodecError> {
    let dict = doc
        .object(number)?
        .value
        .as_dict()
        .ok_or_else(|| malformed(format!("image {number} has no dictionary")))?;
    let dimension = |key| {
        doc.number(dict, key)
            .filter(|v| *v >= 1.0 && *v <= u32::MAX as f64)
            .map(|v| v as u32)
            .ok_or_else(|| malformed(format!("image {number} has no valid /{key}")))
    };
    let width = dimension("Width")?;
    let height = dimension("Height")?;

    let filters: Vec<String> = match doc.get(dict, "Filter") {
        Object::Name(n) => vec![n.clone()],
        Object::Array(items) => items
            .iter()
            .filter_map(|f| doc.resolve(f).as_name().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    let parms: Vec<Option<&HashMap<String, Object>>> = match doc.get(dict, "DecodeParms") {
        Object::Dict(d) => vec![Some(d)],
        Object::Array(items) => items.iter().map(|p| doc.resolve(p).as_dict()).collect(),
        _ => Vec::new(),
    };

    let mut samples = Samples::Raw(doc.stream_data(number)?.to_vec());
    for (i, filter) in filters.iter().enumerate() {
        let Samples::Raw(data) = samples else {
            return Err(malformed(format!("filter {filter} follows DCTDecode")));
        };
        let parms = parms.get(i).copied().flatten();
        samples = match filter.as_str() {
            "FlateDecode" | "Fl" => {
                let inflated = miniz_oxide::inflate::decompress_to_vec_zlib(&data).map_err(|e| {
                    CodecError::decode(format!("PDF image stream inflate failed: {:?}", e.status))
                })?;
                Samples::Raw(undo_predictor(doc, parms, inflated)?)
            }
            "DCTDecode" | "DCT" => Samples::Decoded(decode_with(&data, ImageFormat::Jpeg)?),
            "ASCIIHexDecode" | "AHx" => {
                let end = data.iter().position(|&c| c == b'>').unwrap_or(data.len());
                Samples::Raw(decode_hex(&data[..end])?)
            }
            other => {
                return Err(CodecError::decode(format!(
                    "unsupported PDF image filter /{other}"
                )));
            }
        };
    }

    let data = match samples {
        Samples::Decoded(img) => {
            if img.dimensions() != (width, height) {
                return Err(malformed("DCT data does not match the image size"));
            }
            return Ok(img.flatten(Default::default()));
        }
        Samples::Raw(data) => data,
    };

    let bits = doc.number(dict, "BitsPerComponent").unwrap_or(8.0);
    if bits != 8.0 {
        return Err(CodecError::decode(format!(
            "only 8-bit PDF images are supported, got {bits}"
        )));
    }
    let components = colour_components(doc, doc.get(dict, "ColorSpace"))?;
    let needed = raster_len(width, height, components, "PDF image")?;
    if data.len() < needed {
        return Err(CodecError::decode(format!(
            "PDF image data holds {} bytes, {width}x{height} needs {needed}",
            data.len()
        )));
    }
    let pixels = match components {
        1 => data[..needed].iter().flat_map(|&v| [v, v, v]).collect(),
        3 => data[..needed].to_vec(),
        _ => data[..needed].chunks_exact(4).flat_map(cmyk_to_rgb).collect(),
    };
    Ok(CanonicalImage::new(width, height, PixelLayout::Rgb, pixels)?)
}

fn colour_components(doc: &Document, space: &Object) -> Result<usize, CodecError> {
    let unsupported = |what: &str| CodecError::decode(format!("unsupported PDF colour space {what}"));
    match space {
        // soft masks may omit it; they are always gray
        Object::Null => Ok(1),
        Object::Name(n) => match n.as_str() {
            "DeviceGray" | "G" | "CalGray" => Ok(1),
            "DeviceRGB" | "RGB" | "CalRGB" => Ok(3),
            "DeviceCMYK" | "CMYK" => Ok(4),
            other => Err(unsupported(other)),
        },
        Object::Array(items) => {
            let family = items.first().map(|f| doc.resolve(f)).and_then(Object::as_name);
            match family {
                Some("ICCBased") => {
                    let n = items
                        .get(1)
                        .and_then(|r| match r {
                            Object::Ref(num) => doc.objects.get(num),
                            _ => None,
                        })
                        .and_then(|ind| ind.value.as_dict())
                        .and_then(|d| doc.number(d, "N"))
                        .ok_or_else(|| malformed("ICCBased colour space without /N"))?;
                    match n as usize {
                        n @ (1 | 3 | 4) => Ok(n),
                        n => Err(unsupported(&format!("ICCBased with {n} components"))),
                    }
                }
                Some("CalRGB") => Ok(3),
                Some("CalGray") => Ok(1),
                Some(other) => Err(unsupported(other)),
                None => Err(unsupported("[]")),
            }
        }
        other => Err(unsupported(&format!("{other:?}"))),
    }
}

fn cmyk_to_rgb(px: &[u8]) -> [u8; 3] {
    let k = 255 - px[3] as u32;
    [0, 1, 2].map(|i| (((255 - px[i] as u32) * k + 127) / 255) as u8)
}

/// Reverse PNG row predictors (`/Predictor` 10-15) for 8-bit samples.
fn undo_predictor(
    doc: &Document,
    parms: Option<&HashMap<String, Object>>,
    data: Vec<u8>,
) -> Result<Vec<u8>, CodecError> {
    let Some(parms) = parms else {
        return Ok(data);
    };
    let predictor = doc.number(parms, "Predictor").unwrap_or(1.0) as u32;
    match predictor {
        1 => return Ok(data),
        10..=15 => {}
        other => {
            return Err(CodecError::decode(format!(
                "unsupported PDF predictor {other}"
            )));
        }
    }
    let colors = doc.number(parms, "Colors").unwrap_or(1.0).max(1.0) as usize;
    let columns = doc.number(parms, "Columns").unwrap_or(1.0).max(1.0) as usize;
    let bpp = colors;
    let row_len = colors
        .checked_mul(columns)
        .filter(|&n| n < data.len())
        .ok_or_else(|| malformed(format!("predictor rows of {columns}x{colors} exceed the stream")))?;

    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];
    for chunk in data.chunks_exact(row_len + 1) {
        let mut row = chunk[1..].to_vec();
        for i in 0..row_len {
            let a = if i >= bpp { row[i - bpp] } else { 0 };
            let b = prev[i];
            let c = if i >= bpp { prev[i - bpp] } else { 0 };
            let delta = match chunk[0] {
                0 => 0,
                1 => a,
                2 => b,
                3 => ((a as u16 + b as u16) / 2) as u8,
                4 => paeth(a, b, c),
                other => {
                    return Err(CodecError::decode(format!(
                        "bad PNG predictor tag {other} in PDF stream"
                    )));
                }
            };
            row[i] = row[i].wrapping_add(delta);
        }
        out.extend_from_slice(&row);
        prev = row;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

// =============================================================================
// Writer
// =============================================================================

struct Writer {
    out: Vec<u8>,
    offsets: Vec<usize>,
}

impl Writer {
    fn object(&mut self, dict: &str, stream: Option<&[u8]>) {
        self.offsets.push(self.out.len());
        let number = self.offsets.len();
        match stream {
            None => {
                self.out
                    .extend_from_slice(format!("{number} 0 obj\n{dict}\nendobj\n").as_bytes());
            }
            Some(data) => {
                self.out.extend_from_slice(
                    format!(
                        "{number} 0 obj\n<< {dict} /Length {} >>\nstream\n",
                        data.len()
                    )
                    .as_bytes(),
                );
                self.out.extend_from_slice(data);
                self.out.extend_from_slice(b"\nendstream\nendobj\n");
            }
        }
    }
}

pub fn encode(img: &CanonicalImage, opts: &EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let (w, h) = img.dimensions();
    let alpha = img.layout().has_alpha();
    let (rgb, mask): (Vec<u8>, Option<Vec<u8>>) = if alpha {
        let rgb = img
            .pixels()
            .chunks_exact(4)
            .flat_map(|p| [p[0], p[1], p[2]])
            .collect();
        let mask = img.pixels().iter().skip(3).step_by(4).copied().collect();
        (rgb, Some(mask))
    } else {
        (img.pixels().to_vec(), None)
    };

    let (filter, pack): (&str, fn(Vec<u8>) -> Vec<u8>) = if opts.pdf_compress {
        (" /Filter /FlateDecode", |data| {
            miniz_oxide::deflate::compress_to_vec_zlib(&data, FLATE_LEVEL)
        })
    } else {
        ("", |data| data)
    };

    let mut writer = Writer {
        out: Vec::new(),
        offsets: Vec::new(),
    };
    writer
        .out
        .extend_from_slice(if alpha { b"%PDF-1.4\n" } else { b"%PDF-1.3\n" });
    // binary marker so transfer tools treat the file as binary
    writer.out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

    writer.object("<< /Type /Catalog /Pages 2 0 R >>", None);
    writer.object("<< /Type /Pages /Kids [3 0 R] /Count 1 >>", None);
    writer.object(
        &format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {w} {h}] \
             /Resources << /XObject << /Im0 5 0 R >> >> /Contents 4 0 R >>"
        ),
        None,
    );
    let content = format!("q\n{w} 0 0 {h} 0 0 cm\n/Im0 Do\nQ\n");
    writer.object("", Some(content.as_bytes()));
    let smask = if mask.is_some() { " /SMask 6 0 R" } else { "" };
    writer.object(
        &format!(
            "/Type /XObject /Subtype /Image /Width {w} /Height {h} \
             /ColorSpace /DeviceRGB /BitsPerComponent 8{smask}{filter}"
        ),
        Some(&pack(rgb)),
    );
    if let Some(mask) = mask {
        writer.object(
            &format!(
                "/Type /XObject /Subtype /Image /Width {w} /Height {h} \
                 /ColorSpace /DeviceGray /BitsPerComponent 8{filter}"
            ),
            Some(&pack(mask)),
        );
    }

    let xref = writer.out.len();
    let count = writer.offsets.len() + 1;
    let mut tail = format!("xref\n0 {count}\n0000000000 65535 f \n");
    for offset in &writer.offsets {
        tail.push_str(&format!("{offset:010} 00000 n \n"));
    }
    tail.push_str(&format!(
        "trailer\n<< /Size {count} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n"
    ));
    writer.out.extend_from_slice(tail.as_bytes());
    Ok(writer.out)
}
