//! The MQ binary arithmetic coder shared by every code-block coding pass.
//!
//! Both halves follow the software conventions of ITU-T T.800 Annex C: the
//! encoder keeps the byte under construction as the last element of its
//! output (behind one scratch byte that absorbs carries before the first real
//! byte), and the decoder treats bytes past the end of its segment as `0xFF`.

/// Contexts used by tier-1 coding: 9 zero coding, 5 sign, 3 refinement,
/// run-length and uniform.
pub const CONTEXTS: usize = 19;
pub const CTX_RUN: usize = 17;
pub const CTX_UNIFORM: usize = 18;

struct State {
    qe: u32,
    nmps: u8,
    nlps: u8,
    switch: bool,
}

const fn s(qe: u32, nmps: u8, nlps: u8, switch: u8) -> State {
    State {
        qe,
        nmps,
        nlps,
        switch: switch == 1,
    }
}

#[rustfmt::skip]
const STATES: [State; 47] = [
    s(0x5601, 1, 1, 1),   s(0x3401, 2, 6, 0),   s(0x1801, 3, 9, 0),   s(0x0AC1, 4, 12, 0),
    s(0x0521, 5, 29, 0),  s(0x0221, 38, 33, 0), s(0x5601, 7, 6, 1),   s(0x5401, 8, 14, 0),
    s(0x4801, 9, 14, 0),  s(0x3801, 10, 14, 0), s(0x3001, 11, 17, 0), s(0x2401, 12, 18, 0),
    s(0x1C01, 13, 20, 0), s(0x1601, 29, 21, 0), s(0x5601, 15, 14, 1), s(0x5401, 16, 14, 0),
    s(0x5101, 17, 15, 0), s(0x4801, 18, 16, 0), s(0x3801, 19, 17, 0), s(0x3401, 20, 18, 0),
    s(0x3001, 21, 19, 0), s(0x2801, 22, 19, 0), s(0x2401, 23, 20, 0), s(0x2201, 24, 21, 0),
    s(0x1C01, 25, 22, 0), s(0x1801, 26, 23, 0), s(0x1601, 27, 24, 0), s(0x1401, 28, 25, 0),
    s(0x1201, 29, 26, 0), s(0x1101, 30, 27, 0), s(0x0AC1, 31, 28, 0), s(0x09C1, 32, 29, 0),
    s(0x08A1, 33, 30, 0), s(0x0521, 34, 31, 0), s(0x0441, 35, 32, 0), s(0x02A1, 36, 33, 0),
    s(0x0221, 37, 34, 0), s(0x0141, 38, 35, 0), s(0x0111, 39, 36, 0), s(0x0085, 40, 37, 0),
    s(0x0049, 41, 38, 0), s(0x0025, 42, 39, 0), s(0x0015, 43, 40, 0), s(0x0009, 44, 41, 0),
    s(0x0005, 45, 42, 0), s(0x0001, 45, 43, 0), s(0x5601, 46, 46, 0),
];

/// Adaptive probability state of one context.
#[derive(Clone, Copy)]
struct Context {
    index: u8,
    mps: u8,
}

/// All contexts at their initial states: zero coding context 0 starts at
/// state 4, run-length at 3, uniform at 46, everything else at 0.
fn initial_contexts() -> [Context; CONTEXTS] {
    let mut contexts = [Context { index: 0, mps: 0 }; CONTEXTS];
    contexts[0].index = 4;
    contexts[CTX_RUN].index = 3;
    contexts[CTX_UNIFORM].index = 46;
    contexts
}

pub struct Encoder {
    a: u32,
    c: u32,
    ct: u32,
    out: Vec<u8>,
    contexts: [Context; CONTEXTS],
}

impl Default for Encoder {
    fn default() -> Self {
        Self {
            a: 0x8000,
            c: 0,
            ct: 12,
            out: vec![0],
            contexts: initial_contexts(),
        }
    }
}

impl Encoder {
    pub fn encode(&mut self, bit: u8, cx: usize) {
        let ctx = self.contexts[cx];
        let state = &STATES[ctx.index as usize];
        let qe = state.qe;
        self.a -= qe;
        if bit == ctx.mps {
            if self.a & 0x8000 == 0 {
                if self.a < qe {
                    self.a = qe;
                } else {
                    self.c += qe;
                }
                self.contexts[cx].index = state.nmps;
                self.renormalize();
            } else {
                self.c += qe;
            }
        } else {
            if self.a < qe {
                self.c += qe;
            } else {
                self.a = qe;
            }
            if state.switch {
                self.contexts[cx].mps = 1 - ctx.mps;
            }
            self.contexts[cx].index = state.nlps;
            self.renormalize();
        }
    }

    fn renormalize(&mut self) {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    fn byte_out(&mut self) {
        let last = self.out.len() - 1;
        if self.out[last] == 0xFF {
            self.emit_7();
        } else if self.c < 0x800_0000 {
            self.emit_8();
        } else {
            self.out[last] += 1;
            if self.out[last] == 0xFF {
                self.c &= 0x7FF_FFFF;
                self.emit_7();
            } else {
                self.emit_8();
            }
        }
    }

    /// After an `0xFF`, only seven bits go into the next byte.
    fn emit_7(&mut self) {
        self.out.push((self.c >> 20) as u8);
        self.c &= 0xF_FFFF;
        self.ct = 7;
    }

    fn emit_8(&mut self) {
        self.out.push((self.c >> 19) as u8);
        self.c &= 0x7_FFFF;
        self.ct = 8;
    }

    /// Terminate the codeword and return it.
    pub fn finish(mut self) -> Vec<u8> {
        let temp = self.c + self.a;
        self.c |= 0xFFFF;
        if self.c >= temp {
            self.c -= 0x8000;
        }
        self.c <<= self.ct;
        self.byte_out();
        self.c <<= self.ct;
        self.byte_out();
        // a trailing 0xFF is implied by the decoder
        if self.out.last() == Some(&0xFF) {
            self.out.pop();
        }
        self.out.remove(0);
        self.out
    }
}

pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    a: u32,
    c: u32,
    ct: u32,
    contexts: [Context; CONTEXTS],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            data,
            pos: 0,
            a: 0,
            c: 0,
            ct: 0,
            contexts: initial_contexts(),
        };
        decoder.c = (decoder.byte(0) as u32) << 16;
        decoder.byte_in();
        decoder.c <<= 7;
        decoder.ct -= 7;
        decoder.a = 0x8000;
        decoder
    }

    fn byte(&self, at: usize) -> u8 {
        self.data.get(at).copied().unwrap_or(0xFF)
    }

    fn byte_in(&mut self) {
        if self.byte(self.pos) == 0xFF {
            if self.byte(self.pos + 1) > 0x8F {
                // marker or end of data: feed ones without advancing
                self.c = self.c.wrapping_add(0xFF00);
                self.ct = 8;
            } else {
                self.pos += 1;
                self.c = self.c.wrapping_add((self.byte(self.pos) as u32) << 9);
                self.ct = 7;
            }
        } else {
            self.pos += 1;
            self.c = self.c.wrapping_add((self.byte(self.pos) as u32) << 8);
            self.ct = 8;
        }
    }

    pub fn decode(&mut self, cx: usize) -> u8 {
        let ctx = self.contexts[cx];
        let state = &STATES[ctx.index as usize];
        let qe = state.qe;
        self.a -= qe;
        let bit;
        if (self.c >> 16) < qe {
            // LPS exchange
            if self.a < qe {
                bit = ctx.mps;
                self.contexts[cx].index = state.nmps;
            } else {
                bit = 1 - ctx.mps;
                if state.switch {
                    self.contexts[cx].mps = 1 - ctx.mps;
                }
                self.contexts[cx].index = state.nlps;
            }
            self.a = qe;
            self.renormalize();
        } else {
            self.c -= qe << 16;
            if self.a & 0x8000 == 0 {
                // MPS exchange
                if self.a < qe {
                    bit = 1 - ctx.mps;
                    if state.switch {
                        self.contexts[cx].mps = 1 - ctx.mps;
                    }
                    self.contexts[cx].index = state.nlps;
                } else {
                    bit = ctx.mps;
                    self.contexts[cx].index = state.nmps;
                }
                self.renormalize();
            } else {
                bit = ctx.mps;
            }
        }
        bit
    }

    fn renormalize(&mut self) {
        loop {
            if self.ct == 0 {
                self.byte_in();
            }
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(bits: &[(u8, usize)]) {
        let mut enc = Encoder::default();
        for &(bit, cx) in bits {
            enc.encode(bit, cx);
        }
        let data = enc.finish();
        let mut dec = Decoder::new(&data);
        for (i, &(bit, cx)) in bits.iter().enumerate() {
            assert_eq!(dec.decode(cx), bit, "symbol {i}");
        }
    }

    #[test]
    fn skewed_and_uniform_sequences_round_trip() {
        let skewed: Vec<(u8, usize)> = (0..5000).map(|i| ((i % 17 == 0) as u8, 0)).collect();
        round_trip(&skewed);
        let mixed: Vec<(u8, usize)> = (0u32..5000)
            .map(|i| {
                let x = i.wrapping_mul(2_654_435_761);
                (((x >> 13) & 1) as u8, (x >> 7) as usize % CONTEXTS)
            })
            .collect();
        round_trip(&mixed);
    }

    #[test]
    fn long_runs_compress_well() {
        let mut enc = Encoder::default();
        for _ in 0..10_000 {
            enc.encode(0, 3);
        }
        assert!(enc.finish().len() < 40);
    }

    #[test]
    fn output_never_contains_markers() {
        let mut enc = Encoder::default();
        let mut x = 12345u32;
        for _ in 0..20_000 {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            enc.encode((x & 1) as u8, CTX_UNIFORM);
        }
        let data = enc.finish();
        for pair in data.windows(2) {
            assert!(!(pair[0] == 0xFF && pair[1] > 0x8F));
        }
    }

    #[test]
    fn empty_input_decodes_from_padding() {
        let data = Encoder::default().finish();
        let mut dec = Decoder::new(&data);
        // the decoder must not panic reading past the end
        for _ in 0..100 {
            dec.decode(CTX_UNIFORM);
        }
    }
}
