//! Binary range decoder, decoding one packet at a time with the ability to roll back.
//!
//! A packet is only committed when all of its input bytes were available. When the input runs dry halfway,
//! every probability touched so far is restored, so the packet can be decoded again once more input arrived.

const NUM_BIT_MODEL_TOTAL_BITS: u32 = 11;
const BIT_MODEL_TOTAL: u32 = 1 << NUM_BIT_MODEL_TOTAL_BITS;
const NUM_MOVE_BITS: u32 = 5;
const TOP_VALUE: u32 = 1 << 24;

pub(super) const PROB_INIT: u16 = (BIT_MODEL_TOTAL / 2) as u16;

/// Number of bytes a range decoder consumes on initialisation.
pub(super) const INIT_SIZE: usize = 5;

/// Upper bound of probabilities updated by a single packet.
const UNDO_SIZE: usize = 48;

/// Reason a packet could not be decoded.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum Stop {
    /// Ran out of input, nothing has been committed.
    Input,
    /// The stream is corrupt.
    Data,
}

#[derive(Clone, Copy, Debug, Default)]
pub(super) struct RangeDecoder {
    range: u32,
    code: u32,
}

impl RangeDecoder {
    pub fn init(bytes: &[u8; INIT_SIZE]) -> Option<Self> {
        if bytes[0] != 0 {
            return None;
        }

        let rc = Self {
            range: u32::MAX,
            code: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        };
        (rc.code != rc.range).then_some(rc)
    }

    /// A stream may only end when the encoder flushed the range coder completely.
    pub fn is_finished_ok(&self) -> bool {
        self.code == 0
    }
}

/// Bit decoding over a working copy of the range decoder, journaling every probability update.
pub(super) struct Bits<'p, 'i> {
    rc: RangeDecoder,
    probs: &'p mut [u16],
    input: &'i [u8],
    pos: usize,
    undo: [(usize, u16); UNDO_SIZE],
    undo_len: usize,
}

impl<'p, 'i> Bits<'p, 'i> {
    pub fn new(rc: RangeDecoder, probs: &'p mut [u16], input: &'i [u8]) -> Self {
        Self {
            rc,
            probs,
            input,
            pos: 0,
            undo: [(0, 0); UNDO_SIZE],
            undo_len: 0,
        }
    }

    /// Commit: the advanced range decoder and the number of input bytes used.
    pub fn finish(self) -> (RangeDecoder, usize) {
        (self.rc, self.pos)
    }

    /// Restore every probability touched since [`Bits::new`].
    pub fn rollback(self) {
        for &(index, prob) in self.undo[..self.undo_len].iter().rev() {
            self.probs[index] = prob;
        }
    }

    fn normalize(&mut self) -> Result<(), Stop> {
        if self.rc.range < TOP_VALUE {
            let byte = *self.input.get(self.pos).ok_or(Stop::Input)?;
            self.pos += 1;
            self.rc.range <<= 8;
            self.rc.code = (self.rc.code << 8) | byte as u32;
        }
        Ok(())
    }

    pub fn bit(&mut self, index: usize) -> Result<u32, Stop> {
        let prob = self.probs[index];
        if self.undo_len < UNDO_SIZE {
            self.undo[self.undo_len] = (index, prob);
            self.undo_len += 1;
        }

        let bound = (self.rc.range >> NUM_BIT_MODEL_TOTAL_BITS) * prob as u32;
        let bit = if self.rc.code < bound {
            self.rc.range = bound;
            self.probs[index] = prob + ((BIT_MODEL_TOTAL as u16 - prob) >> NUM_MOVE_BITS);
            0
        } else {
            self.rc.range -= bound;
            self.rc.code -= bound;
            self.probs[index] = prob - (prob >> NUM_MOVE_BITS);
            1
        };

        self.normalize()?;
        Ok(bit)
    }

    /// Most significant bit first, probabilities at `base + 1 .. base + 2^num_bits`.
    pub fn tree(&mut self, base: usize, num_bits: u32) -> Result<u32, Stop> {
        let mut m = 1usize;
        for _ in 0..num_bits {
            m = (m << 1) + self.bit(base + m)? as usize;
        }
        Ok((m - (1 << num_bits)) as u32)
    }

    /// Least significant bit first.
    pub fn reverse(&mut self, base: usize, num_bits: u32) -> Result<u32, Stop> {
        let mut m = 1usize;
        let mut symbol = 0u32;
        for i in 0..num_bits {
            let bit = self.bit(base + m)?;
            m = (m << 1) + bit as usize;
            symbol |= bit << i;
        }
        Ok(symbol)
    }

    /// Bits with a fixed probability of one half.
    pub fn direct(&mut self, num_bits: u32) -> Result<u32, Stop> {
        let mut result = 0u32;
        for _ in 0..num_bits {
            self.rc.range >>= 1;
            self.rc.code = self.rc.code.wrapping_sub(self.rc.range);
            let t = 0u32.wrapping_sub(self.rc.code >> 31);
            self.rc.code = self.rc.code.wrapping_add(self.rc.range & t);
            self.normalize()?;
            result = (result << 1).wrapping_add(t.wrapping_add(1));
        }
        Ok(result)
    }
}
