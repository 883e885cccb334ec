//! Apple PackBits run-length coding, shared by TIFF, PSD and PICT.
//!
//! Each packet starts with a signed header byte `n`: `0..=127` copies the next
//! `n + 1` bytes literally, `-127..=-1` repeats the next byte `1 - n` times,
//! and `-128` is a no-op.

use super::CodecError;

/// Append the PackBits encoding of `src` to `out`.
pub fn encode(src: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < src.len() {
        let mut run = 1;
        while i + run < src.len() && run < 128 && src[i + run] == src[i] {
            run += 1;
        }
        if run >= 3 {
            out.push((1 - run as i16) as u8);
            out.push(src[i]);
            i += run;
            continue;
        }

        let start = i;
        while i < src.len() && i - start < 128 {
            if i + 2 < src.len() && src[i] == src[i + 1] && src[i] == src[i + 2] {
                break;
            }
            i += 1;
        }
        out.push((i - start - 1) as u8);
        out.extend_from_slice(&src[start..i]);
    }
}

/// Unpack from `src` until `expected` bytes have been appended to `out`.
///
/// Returns the number of input bytes consumed.
pub fn decode(src: &[u8], out: &mut Vec<u8>, expected: usize) -> Result<usize, CodecError> {
    let target = out.len() + expected;
    let mut i = 0;
    while out.len() < target {
        let header = *src
            .get(i)
            .ok_or_else(|| CodecError::decode("PackBits data ended early"))? as i8;
        i += 1;
        match header {
            -128 => {}
            n if n < 0 => {
                let value = *src
                    .get(i)
                    .ok_or_else(|| CodecError::decode("PackBits run is missing its value"))?;
                i += 1;
                let count = (1 - n as i16) as usize;
                out.extend(std::iter::repeat_n(value, count));
            }
            n => {
                let count = n as usize + 1;
                let literal = src
                    .get(i..i + count)
                    .ok_or_else(|| CodecError::decode("PackBits literal ended early"))?;
                out.extend_from_slice(literal);
                i += count;
            }
        }
    }
    if out.len() != target {
        return Err(CodecError::decode("PackBits packet overran its row"));
    }
    Ok(i)
}
