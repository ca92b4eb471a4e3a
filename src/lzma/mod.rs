//! LZMA decoder working solely on caller provided memory.
//!
//! The probability model and the sliding dictionary are borrowed for the lifetime of a [`LzmaDec`],
//! hence the decoder never allocates. Decoding is driven by [`LzmaDec::decode_to_buf`], which accepts any split of
//! the input and output: input that ends halfway a packet is retained internally until the next call.

mod rc;

use rc::{Bits, INIT_SIZE, PROB_INIT, RangeDecoder, Stop};

/// Size of the properties block at the start of a stream.
pub const PROPS_SIZE: usize = 5;

/// Properties block followed by the little-endian uncompressed size.
pub const HEADER_SIZE: usize = PROPS_SIZE + 8;

/// Uncompressed size denoting that the stream is terminated by an end marker.
pub const UNKNOWN_SIZE: u64 = u64::MAX;

/// Smallest dictionary a decoder keeps, regardless of what the properties declare.
pub const DICT_MIN: u32 = 1 << 12;

const NUM_STATES: usize = 12;
const NUM_POS_BITS_MAX: usize = 4;
const NUM_LEN_TO_POS_STATES: usize = 4;
const NUM_POS_SLOT_BITS: u32 = 6;
const NUM_ALIGN_BITS: u32 = 4;
const END_POS_MODEL_INDEX: u32 = 14;
const NUM_FULL_DISTANCES: usize = 1 << (END_POS_MODEL_INDEX >> 1);
const MATCH_MIN_LEN: usize = 2;
const LIT_STATES: usize = 7;

const LEN_CHOICE: usize = 0;
const LEN_CHOICE_2: usize = 1;
const LEN_LOW: usize = 2;
const LEN_MID: usize = LEN_LOW + (8 << NUM_POS_BITS_MAX);
const LEN_HIGH: usize = LEN_MID + (8 << NUM_POS_BITS_MAX);
const LEN_PROBS: usize = LEN_HIGH + 256;

const IS_MATCH: usize = 0;
const IS_REP: usize = IS_MATCH + (NUM_STATES << NUM_POS_BITS_MAX);
const IS_REP_G0: usize = IS_REP + NUM_STATES;
const IS_REP_G1: usize = IS_REP_G0 + NUM_STATES;
const IS_REP_G2: usize = IS_REP_G1 + NUM_STATES;
const IS_REP0_LONG: usize = IS_REP_G2 + NUM_STATES;
const POS_SLOT: usize = IS_REP0_LONG + (NUM_STATES << NUM_POS_BITS_MAX);
const SPEC_POS: usize = POS_SLOT + (NUM_LEN_TO_POS_STATES << NUM_POS_SLOT_BITS);
const ALIGN: usize = SPEC_POS + NUM_FULL_DISTANCES - END_POS_MODEL_INDEX as usize;
const LEN_CODER: usize = ALIGN + (1 << NUM_ALIGN_BITS);
const REP_LEN_CODER: usize = LEN_CODER + LEN_PROBS;
const LITERAL: usize = REP_LEN_CODER + LEN_PROBS;
const LITERAL_CODER_SIZE: usize = 0x300;

/// Input retained between calls when a packet straddles two input buffers.
const TMP_SIZE: usize = 32;

/// Number of probabilities needed for streams with the given `lc + lp`.
pub const fn probs_len(lc_lp: u32) -> usize {
    LITERAL + (LITERAL_CODER_SIZE << lc_lp)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Neither input was consumed nor output produced, while the stream did not finish.
    #[error("stream stalled")]
    Stalled,
    #[error("corrupt stream")]
    Data,
    #[error("unsupported properties")]
    Unsupported,
    #[error("stream truncated")]
    InputEof,
}

impl Error {
    pub const fn code(&self) -> u8 {
        match self {
            Error::Stalled => 0,
            Error::Data => 1,
            Error::Unsupported => 4,
            Error::InputEof => 6,
        }
    }
}

/// Stream properties as encoded in the first bytes of a stream.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Props {
    /// Literal context bits.
    pub lc: u8,
    /// Literal position bits.
    pub lp: u8,
    /// Position bits.
    pub pb: u8,
    pub dict_size: u32,
}

impl Props {
    pub fn decode(raw: &[u8; PROPS_SIZE]) -> Result<Self, Error> {
        let mut d = raw[0];
        if d >= 9 * 5 * 5 {
            return Err(Error::Unsupported);
        }

        let lc = d % 9;
        d /= 9;
        let lp = d % 5;
        let pb = d / 5;
        let dict_size = u32::from_le_bytes([raw[1], raw[2], raw[3], raw[4]]).max(DICT_MIN);

        Ok(Self {
            lc,
            lp,
            pb,
            dict_size,
        })
    }

    pub const fn probs_len(&self) -> usize {
        probs_len((self.lc + self.lp) as u32)
    }

    pub const fn dict_len(&self) -> usize {
        self.dict_size as usize
    }
}

/// How a call to [`LzmaDec::decode_to_buf`] should treat the end of the output buffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FinishMode {
    /// More output may follow.
    Any,
    /// The output buffer ends where the stream is expected to end.
    End,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// The output buffer is full, the stream continues.
    NotFinished,
    /// All input was consumed.
    NeedsMoreInput,
    /// The output buffer is full at [`FinishMode::End`] and the range coder is in a final state.
    MaybeFinishedWithoutMark,
    /// The end marker was decoded; every further call makes no progress.
    FinishedWithMark,
}

/// State needed to decode a packet, gathered before the probabilities are borrowed.
struct Context {
    state: usize,
    reps: [u32; 4],
    pos_state: usize,
    literal: usize,
    match_byte: u32,
    window_empty: bool,
}

enum Action {
    Literal(u8),
    ShortRep,
    Match(usize),
    End,
}

struct Packet {
    state: usize,
    reps: [u32; 4],
    action: Action,
}

pub struct LzmaDec<'m> {
    props: Props,
    probs: &'m mut [u16],
    dict: &'m mut [u8],
    dict_pos: usize,
    dict_full: bool,
    total_pos: u64,
    rc: RangeDecoder,
    state: usize,
    reps: [u32; 4],
    /// Bytes of the current match still to be written.
    rem_len: usize,
    initialized: bool,
    finished: bool,
    tmp: [u8; TMP_SIZE],
    tmp_len: usize,
}

impl<'m> LzmaDec<'m> {
    /// Create a decoder, `probs` and `dict` need to be at least [`Props::probs_len`] and [`Props::dict_len`] large.
    pub fn new(props: Props, probs: &'m mut [u16], dict: &'m mut [u8]) -> Result<Self, Error> {
        if probs.len() < props.probs_len() || dict.len() < props.dict_len() {
            return Err(Error::Unsupported);
        }

        let mut dec = Self {
            props,
            probs: &mut probs[..props.probs_len()],
            dict: &mut dict[..props.dict_len()],
            dict_pos: 0,
            dict_full: false,
            total_pos: 0,
            rc: RangeDecoder::default(),
            state: 0,
            reps: [0; 4],
            rem_len: 0,
            initialized: false,
            finished: false,
            tmp: [0; TMP_SIZE],
            tmp_len: 0,
        };
        dec.init();
        Ok(dec)
    }

    /// Reset to the start of a new stream with the same properties.
    pub fn init(&mut self) {
        self.probs.fill(PROB_INIT);
        self.dict_pos = 0;
        self.dict_full = false;
        self.total_pos = 0;
        self.state = 0;
        self.reps = [0; 4];
        self.rem_len = 0;
        self.initialized = false;
        self.finished = false;
        self.tmp_len = 0;
    }

    pub fn props(&self) -> &Props {
        &self.props
    }

    /// Decode from `input` into `out`.
    ///
    /// Returns the number of input bytes consumed and output bytes produced. The decoder stops when `out` is full,
    /// when `input` is exhausted, or at the end marker.
    pub fn decode_to_buf(
        &mut self,
        out: &mut [u8],
        input: &[u8],
        finish: FinishMode,
    ) -> Result<(usize, usize, Status), Error> {
        let mut in_pos = 0;
        let mut out_pos = 0;

        loop {
            while self.rem_len > 0 && out_pos < out.len() {
                let byte = self.get_byte(self.reps[0] as usize + 1);
                self.put_byte(byte, out, &mut out_pos);
                self.rem_len -= 1;
            }

            if self.finished {
                return Ok((in_pos, out_pos, Status::FinishedWithMark));
            }

            if out_pos == out.len() {
                let status = if self.rem_len == 0
                    && finish == FinishMode::End
                    && self.initialized
                    && self.rc.is_finished_ok()
                {
                    Status::MaybeFinishedWithoutMark
                } else {
                    Status::NotFinished
                };
                return Ok((in_pos, out_pos, status));
            }

            if !self.initialized {
                let take = (INIT_SIZE - self.tmp_len).min(input.len() - in_pos);
                self.tmp[self.tmp_len..self.tmp_len + take]
                    .copy_from_slice(&input[in_pos..in_pos + take]);
                self.tmp_len += take;
                in_pos += take;

                if self.tmp_len < INIT_SIZE {
                    return Ok((in_pos, out_pos, Status::NeedsMoreInput));
                }

                let mut init = [0u8; INIT_SIZE];
                init.copy_from_slice(&self.tmp[..INIT_SIZE]);
                self.rc = RangeDecoder::init(&init).ok_or(Error::Data)?;
                self.tmp_len = 0;
                self.initialized = true;
                continue;
            }

            if self.tmp_len > 0 {
                // Top up the retained bytes, but only count what the packet actually used as consumed.
                let old = self.tmp_len;
                let take = (TMP_SIZE - old).min(input.len() - in_pos);
                self.tmp[old..old + take].copy_from_slice(&input[in_pos..in_pos + take]);
                let tmp = self.tmp;

                match self.step(&tmp[..old + take], out, &mut out_pos) {
                    Ok(used) if used >= old => {
                        in_pos += used - old;
                        self.tmp_len = 0;
                    }
                    Ok(used) => {
                        self.tmp.copy_within(used..old, 0);
                        self.tmp_len = old - used;
                    }
                    Err(Stop::Input) if old + take < TMP_SIZE => {
                        in_pos += take;
                        self.tmp_len = old + take;
                        return Ok((in_pos, out_pos, Status::NeedsMoreInput));
                    }
                    Err(_) => return Err(Error::Data),
                }
            } else {
                match self.step(&input[in_pos..], out, &mut out_pos) {
                    Ok(used) => in_pos += used,
                    Err(Stop::Input) if input.len() - in_pos < TMP_SIZE => {
                        let rest = input.len() - in_pos;
                        self.tmp[..rest].copy_from_slice(&input[in_pos..]);
                        self.tmp_len = rest;
                        return Ok((input.len(), out_pos, Status::NeedsMoreInput));
                    }
                    Err(_) => return Err(Error::Data),
                }
            }
        }
    }

    /// Decode and commit a single packet from `data`, returning the number of bytes used.
    fn step(&mut self, data: &[u8], out: &mut [u8], out_pos: &mut usize) -> Result<usize, Stop> {
        let window_empty = self.total_pos == 0;
        let pos_state = (self.total_pos & ((1 << self.props.pb) - 1)) as usize;
        let lit_pos = (self.total_pos & ((1 << self.props.lp) - 1)) as usize;
        let prev_byte = if window_empty { 0 } else { self.get_byte(1) as usize };
        let literal = LITERAL
            + LITERAL_CODER_SIZE
                * ((lit_pos << self.props.lc) + (prev_byte >> (8 - self.props.lc as usize)));
        let match_byte = if self.state >= LIT_STATES && !window_empty {
            self.get_byte(self.reps[0] as usize + 1) as u32
        } else {
            0
        };

        let cx = Context {
            state: self.state,
            reps: self.reps,
            pos_state,
            literal,
            match_byte,
            window_empty,
        };

        let mut bits = Bits::new(self.rc, &mut *self.probs, data);
        let packet = match decode_packet(&mut bits, &cx) {
            Ok(packet) => packet,
            Err(Stop::Input) => {
                bits.rollback();
                return Err(Stop::Input);
            }
            Err(stop) => return Err(stop),
        };
        let (rc, used) = bits.finish();

        match packet.action {
            Action::Literal(byte) => self.put_byte(byte, out, out_pos),
            Action::ShortRep => {
                let byte = self.get_byte(packet.reps[0] as usize + 1);
                self.put_byte(byte, out, out_pos);
            }
            Action::Match(len) => {
                let dist = packet.reps[0] as usize;
                let available = if self.dict_full { self.dict.len() } else { self.dict_pos };
                if dist >= self.props.dict_len() || dist >= available {
                    return Err(Stop::Data);
                }
                self.rem_len = len;
            }
            Action::End => {
                if !rc.is_finished_ok() {
                    return Err(Stop::Data);
                }
                self.finished = true;
            }
        }

        self.rc = rc;
        self.state = packet.state;
        self.reps = packet.reps;
        Ok(used)
    }

    fn put_byte(&mut self, byte: u8, out: &mut [u8], out_pos: &mut usize) {
        self.dict[self.dict_pos] = byte;
        self.dict_pos += 1;
        if self.dict_pos == self.dict.len() {
            self.dict_pos = 0;
            self.dict_full = true;
        }
        self.total_pos += 1;

        out[*out_pos] = byte;
        *out_pos += 1;
    }

    /// Byte `dist` positions back in the window, 1 being the most recent.
    fn get_byte(&self, dist: usize) -> u8 {
        let index = if dist <= self.dict_pos {
            self.dict_pos - dist
        } else {
            self.dict.len() - dist + self.dict_pos
        };
        self.dict[index]
    }
}

fn decode_packet(bits: &mut Bits, cx: &Context) -> Result<Packet, Stop> {
    let mut state = cx.state;
    let mut reps = cx.reps;
    let pos_state = cx.pos_state;

    if bits.bit(IS_MATCH + (state << NUM_POS_BITS_MAX) + pos_state)? == 0 {
        let mut symbol = 1u32;
        if state >= LIT_STATES {
            let mut match_byte = cx.match_byte;
            loop {
                let match_bit = (match_byte >> 7) & 1;
                match_byte <<= 1;
                let bit = bits.bit(cx.literal + (((1 + match_bit) << 8) + symbol) as usize)?;
                symbol = (symbol << 1) | bit;
                if match_bit != bit || symbol >= 0x100 {
                    break;
                }
            }
        }
        while symbol < 0x100 {
            symbol = (symbol << 1) | bits.bit(cx.literal + symbol as usize)?;
        }

        state = match state {
            0..4 => 0,
            4..10 => state - 3,
            _ => state - 6,
        };
        return Ok(Packet {
            state,
            reps,
            action: Action::Literal((symbol - 0x100) as u8),
        });
    }

    let len;
    if bits.bit(IS_REP + state)? != 0 {
        if cx.window_empty {
            return Err(Stop::Data);
        }

        if bits.bit(IS_REP_G0 + state)? == 0 {
            if bits.bit(IS_REP0_LONG + (state << NUM_POS_BITS_MAX) + pos_state)? == 0 {
                return Ok(Packet {
                    state: if state < LIT_STATES { 9 } else { 11 },
                    reps,
                    action: Action::ShortRep,
                });
            }
        } else {
            let dist;
            if bits.bit(IS_REP_G1 + state)? == 0 {
                dist = reps[1];
            } else {
                if bits.bit(IS_REP_G2 + state)? == 0 {
                    dist = reps[2];
                } else {
                    dist = reps[3];
                    reps[3] = reps[2];
                }
                reps[2] = reps[1];
            }
            reps[1] = reps[0];
            reps[0] = dist;
        }

        len = decode_len(bits, REP_LEN_CODER, pos_state)?;
        state = if state < LIT_STATES { 8 } else { 11 };
    } else {
        reps[3] = reps[2];
        reps[2] = reps[1];
        reps[1] = reps[0];
        len = decode_len(bits, LEN_CODER, pos_state)?;
        state = if state < LIT_STATES { 7 } else { 10 };

        let dist = decode_distance(bits, len)?;
        if dist == u32::MAX {
            return Ok(Packet {
                state,
                reps,
                action: Action::End,
            });
        }
        reps[0] = dist;
    }

    Ok(Packet {
        state,
        reps,
        action: Action::Match(len as usize + MATCH_MIN_LEN),
    })
}

fn decode_len(bits: &mut Bits, base: usize, pos_state: usize) -> Result<u32, Stop> {
    if bits.bit(base + LEN_CHOICE)? == 0 {
        return bits.tree(base + LEN_LOW + (pos_state << 3), 3);
    }
    if bits.bit(base + LEN_CHOICE_2)? == 0 {
        return Ok(8 + bits.tree(base + LEN_MID + (pos_state << 3), 3)?);
    }
    Ok(16 + bits.tree(base + LEN_HIGH, 8)?)
}

fn decode_distance(bits: &mut Bits, len: u32) -> Result<u32, Stop> {
    let len_state = (len as usize).min(NUM_LEN_TO_POS_STATES - 1);
    let slot = bits.tree(POS_SLOT + (len_state << NUM_POS_SLOT_BITS), NUM_POS_SLOT_BITS)?;
    if slot < 4 {
        return Ok(slot);
    }

    let num_direct_bits = (slot >> 1) - 1;
    let mut dist = (2 | (slot & 1)) << num_direct_bits;
    if slot < END_POS_MODEL_INDEX {
        dist += bits.reverse(SPEC_POS + (dist - slot) as usize - 1, num_direct_bits)?;
    } else {
        dist += bits.direct(num_direct_bits - NUM_ALIGN_BITS)? << NUM_ALIGN_BITS;
        dist += bits.reverse(ALIGN, NUM_ALIGN_BITS)?;
    }
    Ok(dist)
}

#[cfg(test)]
mod tests {
    use std::{vec, vec::Vec};

    use super::*;
    use crate::mock::{lzma_compress, sample};

    /// Decode a complete `.lzma` stream feeding `in_chunk` input and `out_chunk` output bytes at a time.
    fn decode(stream: &[u8], in_chunk: usize, out_chunk: usize) -> Result<Vec<u8>, Error> {
        let mut raw = [0u8; PROPS_SIZE];
        raw.copy_from_slice(&stream[..PROPS_SIZE]);
        let props = Props::decode(&raw)?;

        let mut probs = vec![0u16; props.probs_len()];
        let mut dict = vec![0u8; props.dict_len()];
        let mut dec = LzmaDec::new(props, &mut probs, &mut dict)?;

        let mut input = &stream[HEADER_SIZE..];
        let mut output = Vec::new();
        let mut buf = vec![0u8; out_chunk];
        loop {
            let chunk = &input[..in_chunk.min(input.len())];
            let (consumed, produced, status) = dec.decode_to_buf(&mut buf, chunk, FinishMode::Any)?;
            output.extend_from_slice(&buf[..produced]);
            input = &input[consumed..];

            if status == Status::FinishedWithMark {
                return Ok(output);
            }
            if consumed == 0 && produced == 0 {
                return Err(Error::Stalled);
            }
        }
    }

    #[test]
    fn props() {
        let props = Props::decode(&[0x5D, 0x00, 0x10, 0x00, 0x00]).unwrap();
        assert_eq!(
            props,
            Props {
                lc: 3,
                lp: 0,
                pb: 2,
                dict_size: 4096
            }
        );
        assert_eq!(props.probs_len(), 1846 + 0x300 * 8);

        let small = Props::decode(&[0x5D, 0x00, 0x01, 0x00, 0x00]).unwrap();
        assert_eq!(small.dict_size, DICT_MIN);

        assert_eq!(
            Props::decode(&[225, 0, 0, 0, 0]),
            Err(Error::Unsupported)
        );
    }

    #[test]
    fn buffers_too_small() {
        let props = Props::decode(&[0x5D, 0x00, 0x10, 0x00, 0x00]).unwrap();
        let mut probs = vec![0u16; props.probs_len() - 1];
        let mut dict = vec![0u8; props.dict_len()];
        assert!(LzmaDec::new(props, &mut probs, &mut dict).is_err());
    }

    #[test]
    fn whole_buffers() {
        let data = sample(20_000);
        let stream = lzma_compress(&data, 3, 0);
        assert!(stream.len() < data.len());

        assert_eq!(decode(&stream, stream.len(), data.len() + 16).unwrap(), data);
    }

    #[test]
    fn byte_by_byte() {
        let data = sample(6_000);
        let stream = lzma_compress(&data, 3, 0);

        assert_eq!(decode(&stream, 1, 7).unwrap(), data);
        assert_eq!(decode(&stream, 3, 1).unwrap(), data);
    }

    #[test]
    fn literal_position_bits() {
        let data = sample(9_000);
        let stream = lzma_compress(&data, 2, 1);

        assert_eq!(decode(&stream, 100, 333).unwrap(), data);
    }

    #[test]
    fn empty() {
        let stream = lzma_compress(&[], 3, 0);
        assert_eq!(decode(&stream, 64, 64).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn corrupt_first_byte() {
        let data = sample(1_000);
        let mut stream = lzma_compress(&data, 3, 0);
        stream[HEADER_SIZE] = 0x01;

        assert_eq!(decode(&stream, 64, 64), Err(Error::Data));
    }

    #[test]
    fn truncated() {
        let data = sample(4_000);
        let stream = lzma_compress(&data, 3, 0);
        let truncated = &stream[..stream.len() / 2];

        assert_eq!(decode(truncated, 64, 64), Err(Error::Stalled));
    }

    #[test]
    fn finished_stays_finished() {
        let data = sample(500);
        let stream = lzma_compress(&data, 3, 0);

        let props = Props::decode(stream[..PROPS_SIZE].try_into().unwrap()).unwrap();
        let mut probs = vec![0u16; props.probs_len()];
        let mut dict = vec![0u8; props.dict_len()];
        let mut dec = LzmaDec::new(props, &mut probs, &mut dict).unwrap();

        let mut out = vec![0u8; 1000];
        let (consumed, produced, status) = dec
            .decode_to_buf(&mut out, &stream[HEADER_SIZE..], FinishMode::Any)
            .unwrap();
        assert_eq!(consumed, stream.len() - HEADER_SIZE);
        assert_eq!(produced, data.len());
        assert_eq!(status, Status::FinishedWithMark);

        assert_eq!(
            dec.decode_to_buf(&mut out, &[], FinishMode::Any),
            Ok((0, 0, Status::FinishedWithMark))
        );
    }

    #[test]
    fn known_size_stops_at_output_end() {
        let data = sample(3_000);
        let stream = lzma_compress(&data, 3, 0);

        let props = Props::decode(stream[..PROPS_SIZE].try_into().unwrap()).unwrap();
        let mut probs = vec![0u16; props.probs_len()];
        let mut dict = vec![0u8; props.dict_len()];
        let mut dec = LzmaDec::new(props, &mut probs, &mut dict).unwrap();

        let mut out = vec![0u8; data.len()];
        let (_, produced, status) = dec
            .decode_to_buf(&mut out, &stream[HEADER_SIZE..], FinishMode::End)
            .unwrap();
        assert_eq!(produced, data.len());
        assert_eq!(out, data);
        assert_ne!(status, Status::NeedsMoreInput);
    }
}
