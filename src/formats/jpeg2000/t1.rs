//! Tier-1: embedded block coding of one code-block's coefficients.
//!
//! Coefficients are coded bit-plane by bit-plane, most significant first.
//! The top plane gets a single cleanup pass; every later plane gets a
//! significance propagation, a magnitude refinement and a cleanup pass, so a
//! block with `n` magnitude planes produces `3n - 2` passes. Samples are
//! scanned in stripes four rows high, column by column within a stripe.
//! Only the default code-block style is supported: one arithmetic codeword
//! for the whole block, no bypass, no context resets, no vertically causal
//! contexts.

use super::mq::{self, CTX_RUN, CTX_UNIFORM};
use crate::formats::CodecError;

const SIG: u8 = 1;
const NEG: u8 = 1 << 1;
/// Coded in the current plane's significance pass.
const VISIT: u8 = 1 << 2;
const REFINED: u8 = 1 << 3;

const CTX_SIGN: usize = 9;
const CTX_REFINE: usize = 14;

/// A coded code-block as it travels in a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedBlock {
    pub data: Vec<u8>,
    pub passes: u32,
    /// Magnitude planes above the first non-zero one, out of `Mb`.
    pub zero_planes: u32,
}

/// Significance, sign and pass state with a one-sample border, so neighbour
/// lookups never need bounds checks.
struct State {
    width: usize,
    height: usize,
    stride: usize,
    flags: Vec<u8>,
}

impl State {
    fn new(width: usize, height: usize) -> Self {
        let stride = width + 2;
        Self {
            width,
            height,
            stride,
            flags: vec![0; stride * (height + 2)],
        }
    }

    fn index(&self, x: usize, y: usize) -> usize {
        (y + 1) * self.stride + x + 1
    }

    fn sig(&self, i: usize) -> u8 {
        self.flags[i] & SIG
    }

    /// Significant horizontal, vertical and diagonal neighbours.
    fn neighbours(&self, i: usize) -> (u8, u8, u8) {
        let s = self.stride;
        let h = self.sig(i - 1) + self.sig(i + 1);
        let v = self.sig(i - s) + self.sig(i + s);
        let d = self.sig(i - s - 1) + self.sig(i - s + 1) + self.sig(i + s - 1) + self.sig(i + s + 1);
        (h, v, d)
    }

    fn has_neighbours(&self, i: usize) -> bool {
        self.neighbours(i) != (0, 0, 0)
    }

    /// Zero coding context for the LL (and LH) orientation.
    fn zero_context(&self, i: usize) -> usize {
        match self.neighbours(i) {
            (2, _, _) => 8,
            (1, v, _) if v >= 1 => 7,
            (1, 0, d) if d >= 1 => 6,
            (1, _, _) => 5,
            (0, 2, _) => 4,
            (0, 1, _) => 3,
            (0, 0, d) if d >= 2 => 2,
            (0, 0, 1) => 1,
            _ => 0,
        }
    }

    /// Sign coding context and the bit the sign is XORed with.
    fn sign_context(&self, i: usize) -> (usize, u8) {
        let contribution = |j: usize| -> i8 {
            match self.flags[j] & (SIG | NEG) {
                f if f == SIG => 1,
                f if f == SIG | NEG => -1,
                _ => 0,
            }
        };
        let s = self.stride;
        let h = (contribution(i - 1) + contribution(i + 1)).clamp(-1, 1);
        let v = (contribution(i - s) + contribution(i + s)).clamp(-1, 1);
        match (h, v) {
            (1, 1) => (CTX_SIGN + 4, 0),
            (1, 0) => (CTX_SIGN + 3, 0),
            (1, -1) => (CTX_SIGN + 2, 0),
            (0, 1) => (CTX_SIGN + 1, 0),
            (0, 0) => (CTX_SIGN, 0),
            (0, -1) => (CTX_SIGN + 1, 1),
            (-1, 1) => (CTX_SIGN + 2, 1),
            (-1, 0) => (CTX_SIGN + 3, 1),
            _ => (CTX_SIGN + 4, 1),
        }
    }

    fn refine_context(&self, i: usize) -> usize {
        if self.flags[i] & REFINED != 0 {
            CTX_REFINE + 2
        } else if self.has_neighbours(i) {
            CTX_REFINE + 1
        } else {
            CTX_REFINE
        }
    }

    /// Stripe-ordered sample positions: `(x, y, index)`.
    fn scan(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        (0..self.height).step_by(4).flat_map(move |top| {
            (0..self.width).flat_map(move |x| {
                (top..(top + 4).min(self.height)).map(move |y| (x, y, self.index(x, y)))
            })
        })
    }

    /// Column of four samples eligible for run-length coding in a cleanup pass.
    fn run_eligible(&self, x: usize, top: usize) -> bool {
        top + 4 <= self.height
            && (top..top + 4).all(|y| {
                let i = self.index(x, y);
                self.flags[i] & (SIG | VISIT) == 0 && !self.has_neighbours(i)
            })
    }

    fn clear_visits(&mut self) {
        for f in &mut self.flags {
            *f &= !VISIT;
        }
    }
}

/// The three pass kinds in coding order within a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Significance,
    Refinement,
    Cleanup,
}

/// Pass sequence for `planes` magnitude planes, as `(plane, pass)`.
fn passes(planes: u32) -> impl Iterator<Item = (u32, Pass)> {
    (0..planes).rev().flat_map(move |plane| {
        let kinds: &[Pass] = if plane + 1 == planes {
            &[Pass::Cleanup]
        } else {
            &[Pass::Significance, Pass::Refinement, Pass::Cleanup]
        };
        kinds.iter().map(move |&kind| (plane, kind))
    })
}

// =============================================================================
// Encoder
// =============================================================================

/// Code one block of signed coefficients. All-zero blocks return `None` and
/// are left out of the packet.
pub fn encode_block(
    coefficients: &[i32],
    width: usize,
    height: usize,
    max_planes: u32,
) -> Result<Option<CodedBlock>, CodecError> {
    let magnitudes: Vec<u32> = coefficients.iter().map(|c| c.unsigned_abs()).collect();
    let top = magnitudes.iter().copied().max().unwrap_or(0);
    if top == 0 {
        return Ok(None);
    }
    let planes = u32::BITS - top.leading_zeros();
    if planes > max_planes {
        return Err(CodecError::encode(format!(
            "coefficient needs {planes} bit-planes, only {max_planes} available"
        )));
    }

    let mut state = State::new(width, height);
    for (k, c) in coefficients.iter().enumerate() {
        if *c < 0 {
            let i = state.index(k % width, k / width);
            state.flags[i] |= NEG;
        }
    }
    let bit = |x: usize, y: usize, plane: u32| ((magnitudes[y * width + x] >> plane) & 1) as u8;
    let mut mq = mq::Encoder::default();
    let encode_sign = |state: &State, mq: &mut mq::Encoder, i: usize| {
        let (cx, xor) = state.sign_context(i);
        mq.encode(((state.flags[i] & NEG != 0) as u8) ^ xor, cx);
    };

    let mut count = 0;
    for (plane, pass) in passes(planes) {
        count += 1;
        match pass {
            Pass::Significance => {
                for (x, y, i) in state.scan().collect::<Vec<_>>() {
                    if state.flags[i] & SIG == 0 && state.has_neighbours(i) {
                        let b = bit(x, y, plane);
                        mq.encode(b, state.zero_context(i));
                        if b == 1 {
                            encode_sign(&state, &mut mq, i);
                            state.flags[i] |= SIG;
                        }
                        state.flags[i] |= VISIT;
                    }
                }
            }
            Pass::Refinement => {
                for (x, y, i) in state.scan().collect::<Vec<_>>() {
                    if state.flags[i] & (SIG | VISIT) == SIG {
                        mq.encode(bit(x, y, plane), state.refine_context(i));
                        state.flags[i] |= REFINED;
                    }
                }
            }
            Pass::Cleanup => {
                for top in (0..height).step_by(4) {
                    for x in 0..width {
                        let rows = (height - top).min(4);
                        let mut start = 0;
                        if state.run_eligible(x, top) {
                            match (0..4).find(|&k| bit(x, top + k, plane) == 1) {
                                None => {
                                    mq.encode(0, CTX_RUN);
                                    continue;
                                }
                                Some(k) => {
                                    mq.encode(1, CTX_RUN);
                                    mq.encode((k >> 1) as u8, CTX_UNIFORM);
                                    mq.encode((k & 1) as u8, CTX_UNIFORM);
                                    let i = state.index(x, top + k);
                                    encode_sign(&state, &mut mq, i);
                                    state.flags[i] |= SIG;
                                    start = k + 1;
                                }
                            }
                        }
                        for k in start..rows {
                            let i = state.index(x, top + k);
                            if state.flags[i] & (SIG | VISIT) == 0 {
                                let b = bit(x, top + k, plane);
                                mq.encode(b, state.zero_context(i));
                                if b == 1 {
                                    encode_sign(&state, &mut mq, i);
                                    state.flags[i] |= SIG;
                                }
                            }
                        }
                    }
                }
                state.clear_visits();
            }
        }
    }

    Ok(Some(CodedBlock {
        data: mq.finish(),
        passes: count,
        zero_planes: max_planes - planes,
    }))
}

// =============================================================================
// Decoder
// =============================================================================

/// Reconstruct a block's coefficients from its codeword.
pub fn decode_block(
    block: &CodedBlock,
    width: usize,
    height: usize,
    max_planes: u32,
) -> Result<Vec<i32>, CodecError> {
    let planes = max_planes.checked_sub(block.zero_planes).ok_or_else(|| {
        CodecError::decode(format!(
            "code-block claims {} zero bit-planes, only {max_planes} exist",
            block.zero_planes
        ))
    })?;
    if planes == 0 || block.passes > 3 * planes - 2 {
        return Err(CodecError::decode(format!(
            "code-block has {} coding passes for {planes} bit-planes",
            block.passes
        )));
    }

    let mut state = State::new(width, height);
    let mut magnitudes = vec![0u32; width * height];
    let mut mq = mq::Decoder::new(&block.data);
    let decode_sign = |state: &mut State, mq: &mut mq::Decoder, i: usize| {
        let (cx, xor) = state.sign_context(i);
        if mq.decode(cx) ^ xor == 1 {
            state.flags[i] |= NEG;
        }
        state.flags[i] |= SIG;
    };

    for (plane, pass) in passes(planes).take(block.passes as usize) {
        match pass {
            Pass::Significance => {
                for (x, y, i) in state.scan().collect::<Vec<_>>() {
                    if state.flags[i] & SIG == 0 && state.has_neighbours(i) {
                        if mq.decode(state.zero_context(i)) == 1 {
                            decode_sign(&mut state, &mut mq, i);
                            magnitudes[y * width + x] |= 1 << plane;
                        }
                        state.flags[i] |= VISIT;
                    }
                }
            }
            Pass::Refinement => {
                for (x, y, i) in state.scan().collect::<Vec<_>>() {
                    if state.flags[i] & (SIG | VISIT) == SIG {
                        let b = mq.decode(state.refine_context(i));
                        magnitudes[y * width + x] |= (b as u32) << plane;
                        state.flags[i] |= REFINED;
                    }
                }
            }
            Pass::Cleanup => {
                for top in (0..height).step_by(4) {
                    for x in 0..width {
                        let rows = (height - top).min(4);
                        let mut start = 0;
                        if state.run_eligible(x, top) {
                            if mq.decode(CTX_RUN) == 0 {
                                continue;
                            }
                            let k = ((mq.decode(CTX_UNIFORM) << 1) | mq.decode(CTX_UNIFORM)) as usize;
                            let i = state.index(x, top + k);
                            decode_sign(&mut state, &mut mq, i);
                            magnitudes[(top + k) * width + x] |= 1 << plane;
                            start = k + 1;
                        }
                        for k in start..rows {
                            let i = state.index(x, top + k);
                            if state.flags[i] & (SIG | VISIT) == 0
                                && mq.decode(state.zero_context(i)) == 1
                            {
                                decode_sign(&mut state, &mut mq, i);
                                magnitudes[(top + k) * width + x] |= 1 << plane;
                            }
                        }
                    }
                }
                state.clear_visits();
            }
        }
    }

    Ok(state
        .scan_raster()
        .zip(magnitudes)
        .map(|(i, m)| {
            if state.flags[i] & NEG != 0 {
                -(m as i32)
            } else {
                m as i32
            }
        })
        .collect())
}

impl State {
    /// Flag indices in raster order.
    fn scan_raster(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| self.index(x, y)))
    }
}
