//! Tier-2: packet headers and bodies.
//!
//! With one quality layer, one resolution level and one precinct, each
//! component's data is exactly one packet holding every code-block of its
//! single subband. The header says which blocks are present (inclusion tag
//! tree), how many leading bit-planes are zero (a second tag tree), how many
//! coding passes each block has, and how long its codeword is. Header bits
//! are bit-stuffed so no `0xFF` is followed by a byte above `0x7F`.

use super::t1::CodedBlock;
use crate::formats::CodecError;

/// Starting value of the per-block length indicator.
const INITIAL_LBLOCK: u32 = 3;

// =============================================================================
// Bit I/O
// =============================================================================

pub struct BitWriter {
    out: Vec<u8>,
    current: u8,
    free: u8,
}

impl Default for BitWriter {
    fn default() -> Self {
        Self {
            out: Vec::new(),
            current: 0,
            free: 8,
        }
    }
}

impl BitWriter {
    pub fn put(&mut self, bit: bool) {
        if self.free == 0 {
            self.emit();
        }
        self.free -= 1;
        self.current |= (bit as u8) << self.free;
    }

    pub fn put_bits(&mut self, value: u32, count: u32) {
        for i in (0..count).rev() {
            self.put((value >> i) & 1 == 1);
        }
    }

    fn emit(&mut self) {
        self.out.push(self.current);
        self.free = if self.current == 0xFF { 7 } else { 8 };
        self.current = 0;
    }

    /// Pad the last byte; a final `0xFF` gets a stuffed zero byte after it.
    pub fn finish(mut self) -> Vec<u8> {
        self.emit();
        if self.free == 7 {
            self.emit();
        }
        self.out
    }
}

pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    current: u8,
    left: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            current: 0,
            left: 0,
        }
    }

    pub fn bit(&mut self) -> Result<bool, CodecError> {
        if self.left == 0 {
            let after_ff = self.pos > 0 && self.data[self.pos - 1] == 0xFF;
            self.current = *self
                .data
                .get(self.pos)
                .ok_or_else(|| CodecError::decode("packet header ended early"))?;
            self.pos += 1;
            self.left = if after_ff { 7 } else { 8 };
        }
        self.left -= 1;
        Ok((self.current >> self.left) & 1 == 1)
    }

    pub fn bits(&mut self, count: u32) -> Result<u32, CodecError> {
        let mut value = 0;
        for _ in 0..count {
            value = (value << 1) | self.bit()? as u32;
        }
        Ok(value)
    }

    /// Bytes consumed by the header, including a stuffed byte after `0xFF`.
    pub fn finish(self) -> usize {
        if self.pos > 0 && self.data[self.pos - 1] == 0xFF {
            self.pos + 1
        } else {
            self.pos
        }
    }
}

// =============================================================================
// Tag trees
// =============================================================================

/// Quad-tree coding of a grid of non-negative values where each parent holds
/// the minimum of its children. Encoder and decoder keep the same per-node
/// progress so repeated queries only send new information.
pub struct TagTree {
    /// `(width, first node index)` per level, leaves first.
    levels: Vec<(usize, usize)>,
    value: Vec<u32>,
    low: Vec<u32>,
    known: Vec<bool>,
}

impl TagTree {
    pub fn new(width: usize, height: usize) -> Self {
        let mut levels = Vec::new();
        let (mut w, mut h, mut total) = (width.max(1), height.max(1), 0);
        loop {
            levels.push((w, total));
            total += w * h;
            if w == 1 && h == 1 {
                break;
            }
            w = w.div_ceil(2);
            h = h.div_ceil(2);
        }
        Self {
            levels,
            value: vec![u32::MAX; total],
            low: vec![0; total],
            known: vec![false; total],
        }
    }

    /// Node indices from the leaf at `(x, y)` up to the root.
    fn path(&self, x: usize, y: usize) -> Vec<usize> {
        self.levels
            .iter()
            .enumerate()
            .map(|(level, &(w, first))| first + (y >> level) * w + (x >> level))
            .collect()
    }

    pub fn set(&mut self, x: usize, y: usize, value: u32) {
        for node in self.path(x, y) {
            self.value[node] = self.value[node].min(value);
        }
    }

    /// Send enough bits for the decoder to tell whether the leaf is below
    /// `threshold` (or, with an unbounded threshold, its exact value).
    pub fn encode(&mut self, bits: &mut BitWriter, x: usize, y: usize, threshold: u32) {
        let mut low = 0;
        for node in self.path(x, y).into_iter().rev() {
            low = low.max(self.low[node]);
            while low < threshold {
                if low >= self.value[node] {
                    if !self.known[node] {
                        bits.put(true);
                        self.known[node] = true;
                    }
                    break;
                }
                bits.put(false);
                low += 1;
            }
            self.low[node] = low;
        }
    }

    /// Whether the leaf's value is below `threshold`.
    pub fn decode(
        &mut self,
        bits: &mut BitReader,
        x: usize,
        y: usize,
        threshold: u32,
    ) -> Result<bool, CodecError> {
        let mut low = 0;
        let mut leaf = 0;
        for node in self.path(x, y).into_iter().rev() {
            low = low.max(self.low[node]);
            while low < threshold && low < self.value[node] {
                if bits.bit()? {
                    self.value[node] = low;
                } else {
                    low += 1;
                }
            }
            self.low[node] = low;
            leaf = node;
        }
        Ok(self.value[leaf] < threshold)
    }

    /// The leaf's exact value, decoding as many bits as needed.
    pub fn decode_value(
        &mut self,
        bits: &mut BitReader,
        x: usize,
        y: usize,
        limit: u32,
    ) -> Result<u32, CodecError> {
        let mut threshold = 1;
        while !self.decode(bits, x, y, threshold)? {
            threshold += 1;
            if threshold > limit {
                return Err(CodecError::decode("tag tree value out of range"));
            }
        }
        Ok(threshold - 1)
    }
}

// =============================================================================
// Packets
// =============================================================================

fn floor_log2(n: u32) -> u32 {
    u32::BITS - 1 - n.leading_zeros()
}

fn put_pass_count(bits: &mut BitWriter, n: u32) {
    match n {
        1 => bits.put(false),
        2 => bits.put_bits(0b10, 2),
        3..=5 => {
            bits.put_bits(0b11, 2);
            bits.put_bits(n - 3, 2);
        }
        6..=36 => {
            bits.put_bits(0b1111, 4);
            bits.put_bits(n - 6, 5);
        }
        _ => {
            bits.put_bits(0b1_1111_1111, 9);
            bits.put_bits(n - 37, 7);
        }
    }
}

fn read_pass_count(bits: &mut BitReader) -> Result<u32, CodecError> {
    if !bits.bit()? {
        return Ok(1);
    }
    if !bits.bit()? {
        return Ok(2);
    }
    match bits.bits(2)? {
        3 => {}
        n => return Ok(3 + n),
    }
    match bits.bits(5)? {
        31 => {}
        n => return Ok(6 + n),
    }
    Ok(37 + bits.bits(7)?)
}

/// Write the packet for one subband's `cols x rows` grid of code-blocks,
/// given in raster order.
pub fn encode_packet(blocks: &[Option<CodedBlock>], cols: usize, rows: usize) -> Vec<u8> {
    let mut bits = BitWriter::default();
    if blocks.iter().all(Option::is_none) {
        bits.put(false);
        return bits.finish();
    }
    bits.put(true);

    let mut inclusion = TagTree::new(cols, rows);
    let mut zero_planes = TagTree::new(cols, rows);
    for (n, block) in blocks.iter().enumerate() {
        let (x, y) = (n % cols, n / cols);
        // the only layer is 0; absent blocks would first appear in layer 1
        inclusion.set(x, y, if block.is_some() { 0 } else { 1 });
        zero_planes.set(x, y, block.as_ref().map_or(0, |b| b.zero_planes));
    }

    for (n, block) in blocks.iter().enumerate() {
        let (x, y) = (n % cols, n / cols);
        inclusion.encode(&mut bits, x, y, 1);
        let Some(block) = block else {
            continue;
        };
        zero_planes.encode(&mut bits, x, y, u32::MAX);
        put_pass_count(&mut bits, block.passes);

        let length = block.data.len() as u32;
        let length_bits = u32::BITS - length.leading_zeros();
        let pass_bits = floor_log2(block.passes);
        let increase = length_bits.saturating_sub(INITIAL_LBLOCK + pass_bits);
        for _ in 0..increase {
            bits.put(true);
        }
        bits.put(false);
        bits.put_bits(length, INITIAL_LBLOCK + increase + pass_bits);
    }

    let mut packet = bits.finish();
    for block in blocks.iter().flatten() {
        packet.extend_from_slice(&block.data);
    }
    packet
}

/// Read one packet from the front of `data`. Returns the blocks in raster
/// order and the number of bytes consumed.
pub fn decode_packet(
    data: &[u8],
    cols: usize,
    rows: usize,
    max_planes: u32,
    eph: bool,
) -> Result<(Vec<Option<CodedBlock>>, usize), CodecError> {
    let mut bits = BitReader::new(data);
    let mut blocks: Vec<Option<CodedBlock>> = vec![None; cols * rows];
    if !bits.bit()? {
        let mut used = bits.finish();
        if eph {
            used = skip_eph(data, used)?;
        }
        return Ok((blocks, used));
    }

    let mut inclusion = TagTree::new(cols, rows);
    let mut zero_planes = TagTree::new(cols, rows);
    let mut lengths = vec![0usize; cols * rows];
    for n in 0..cols * rows {
        let (x, y) = (n % cols, n / cols);
        if !inclusion.decode(&mut bits, x, y, 1)? {
            continue;
        }
        let zero = zero_planes.decode_value(&mut bits, x, y, max_planes + 1)?;
        let passes = read_pass_count(&mut bits)?;
        let mut lblock = INITIAL_LBLOCK;
        while bits.bit()? {
            lblock += 1;
            if lblock > 32 {
                return Err(CodecError::decode("code-block length indicator out of range"));
            }
        }
        let width = lblock + floor_log2(passes);
        if width > 32 {
            return Err(CodecError::decode("code-block length indicator out of range"));
        }
        lengths[n] = bits.bits(width)? as usize;
        blocks[n] = Some(CodedBlock {
            data: Vec::new(),
            passes,
            zero_planes: zero,
        });
    }

    let mut pos = bits.finish();
    if eph {
        pos = skip_eph(data, pos)?;
    }
    for (block, len) in blocks.iter_mut().zip(lengths) {
        if let Some(block) = block {
            let body = data
                .get(pos..pos + len)
                .ok_or_else(|| CodecError::decode("packet body ended early"))?;
            block.data = body.to_vec();
            pos += len;
        }
    }
    Ok((blocks, pos))
}

/// Expect an end-of-packet-header marker at `pos`.
fn skip_eph(data: &[u8], pos: usize) -> Result<usize, CodecError> {
    if data.get(pos..pos + 2) == Some(&[0xFF, 0x92][..]) {
        Ok(pos + 2)
    } else {
        Err(CodecError::decode("missing EPH marker after packet header"))
    }
}
