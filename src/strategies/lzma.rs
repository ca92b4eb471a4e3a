//! Strategy to decompress an LZMA payload into the destination.
//!
//! The payload is a `.lzma` stream: a properties block, the little-endian uncompressed length
//! (all ones if unknown, in which case the stream ends with an end marker) and the compressed data.
//! Decompressed output is written from the start of the destination, in whole units of the larger of
//! [`WRITE_ALIGN`] and the destination write size.
//!
//! The decoder memory is leased from [`Pools`] for the duration of a single payload.

use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};

use crate::{
    Error,
    check::read,
    config::{WRITE_ALIGN, align_up},
    header::Component,
    lzma::{self, FinishMode, HEADER_SIZE, LzmaDec, PROPS_SIZE, Props, Status, UNKNOWN_SIZE},
    pool::Pools,
    strategies::{Strategy, erase_all, write},
};

pub struct Lzma<'a, const PROBS: usize, const DICT: usize> {
    input: &'a mut [u8],
    output: &'a mut [u8],
    pools: &'a Pools<PROBS, DICT>,
}

impl<'a, const PROBS: usize, const DICT: usize> Lzma<'a, PROBS, DICT> {
    /// `output` needs room for at least two write units, devices with a larger write size are refused.
    pub fn new(input: &'a mut [u8], output: &'a mut [u8], pools: &'a Pools<PROBS, DICT>) -> Self {
        Self {
            input,
            output,
            pools,
        }
    }

    /// Write the remaining partial unit, padded with the erased value.
    async fn flush_tail<D: NorFlash>(
        &mut self,
        dst: &mut D,
        offset: u32,
        len: usize,
        unit: usize,
    ) -> Result<(), Error> {
        if len == 0 {
            return Ok(());
        }
        let padded = align_up(len, unit);
        self.output[len..padded].fill(0xFF);
        write(dst, offset, &self.output[..padded]).await
    }
}

impl<const PROBS: usize, const DICT: usize> Strategy for Lzma<'_, PROBS, DICT> {
    async fn apply<D: NorFlash, S: ReadNorFlash>(
        &mut self,
        dst: &mut D,
        src: &mut S,
        component: &Component,
    ) -> Result<(), Error> {
        let unit = WRITE_ALIGN.max(D::WRITE_SIZE);
        if self.output.len() < 2 * unit {
            crate::log::warn!("Output buffer of {} bytes too small for write size {}", self.output.len(), unit);
            return Err(Error::NoMemory);
        }

        let size = component.payload_size();
        if (size as usize) < HEADER_SIZE {
            crate::log::warn!("LZMA payload of {} bytes lacks a header", size);
            return Err(lzma::Error::InputEof.into());
        }

        let mut header = [0u8; HEADER_SIZE];
        read(src, component.payload_offset(), &mut header).await?;
        let mut raw_props = [0u8; PROPS_SIZE];
        raw_props.copy_from_slice(&header[..PROPS_SIZE]);
        let mut raw_len = [0u8; 8];
        raw_len.copy_from_slice(&header[PROPS_SIZE..]);

        // A header the decoder cannot be set up for is reported like a dictionary that does not fit.
        let props = Props::decode(&raw_props).map_err(|_| {
            crate::log::warn!("LZMA properties {:?} unsupported", raw_props[0]);
            Error::NoMemory
        })?;
        let unpacked = u64::from_le_bytes(raw_len);
        let known = unpacked != UNKNOWN_SIZE;
        crate::log::debug!(
            "LZMA lc={} lp={} pb={} dict={} unpacked={}",
            props.lc,
            props.lp,
            props.pb,
            props.dict_size,
            unpacked
        );

        let pools = self.pools;
        let mut probs = pools.probs.allocate(props.probs_len())?;
        let mut dict = pools.dictionary.allocate(props.dict_len())?;
        let mut dec = LzmaDec::new(props, &mut probs, &mut dict).map_err(|_| Error::NoMemory)?;

        erase_all(dst).await?;

        let mut in_offset = component.payload_offset() + HEADER_SIZE as u32;
        let mut in_left = size - HEADER_SIZE as u32;
        let mut in_pos = 0;
        let mut in_size = 0;

        let mut remaining = unpacked;
        let mut out_len = 0;
        let mut w_index = 0u32;

        loop {
            if in_pos == in_size && in_left > 0 {
                in_size = (in_left as usize).min(self.input.len());
                in_pos = 0;
                read(src, in_offset, &mut self.input[..in_size]).await?;
                in_offset += in_size as u32;
                in_left -= in_size as u32;
            }

            let mut out_end = self.output.len();
            let mut finish = FinishMode::Any;
            if known && remaining <= (out_end - out_len) as u64 {
                out_end = out_len + remaining as usize;
                finish = FinishMode::End;
            }

            let (consumed, produced, status) = dec.decode_to_buf(
                &mut self.output[out_len..out_end],
                &self.input[in_pos..in_size],
                finish,
            )?;
            in_pos += consumed;
            out_len += produced;
            if known {
                remaining -= produced as u64;
            }

            let whole = out_len - out_len % unit;
            if whole > 0 {
                write(dst, w_index, &self.output[..whole]).await?;
                crate::log::trace!("LZMA wrote {} bytes at {}", whole, w_index);
                w_index += whole as u32;
                self.output.copy_within(whole..out_len, 0);
                out_len -= whole;
            }

            if known && remaining == 0 {
                self.flush_tail(dst, w_index, out_len, unit).await?;
                crate::log::debug!("LZMA done, {} bytes", unpacked);
                return Ok(());
            }

            if consumed == 0 && produced == 0 {
                if !known && status == Status::FinishedWithMark {
                    self.flush_tail(dst, w_index, out_len, unit).await?;
                    crate::log::debug!("LZMA done at end marker, {} bytes", w_index as usize + out_len);
                    return Ok(());
                }

                crate::log::warn!("LZMA stalled at {} with {} input left", w_index, in_left);
                return Err(lzma::Error::Stalled.into());
            }
        }
    }
}
