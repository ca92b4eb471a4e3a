//! Strategy to copy a payload verbatim from the source to the destination.
//!
//! The payload lands at the same offset in the destination as it has in the source, so the container headers
//! preceding it occupy (erased) space in the destination as well.

use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};

use crate::{
    Error,
    check::read,
    config::align_up,
    header::Component,
    strategies::{Strategy, erase_all, write},
};

pub struct Copy<'a> {
    scratch: &'a mut [u8],
}

impl<'a> Copy<'a> {
    /// `scratch` determines the chunk size, it needs to hold at least one destination write unit.
    pub fn new(scratch: &'a mut [u8]) -> Self {
        Self { scratch }
    }
}

impl Strategy for Copy<'_> {
    async fn apply<D: NorFlash, S: ReadNorFlash>(
        &mut self,
        dst: &mut D,
        src: &mut S,
        component: &Component,
    ) -> Result<(), Error> {
        // Writes are whole program units, the chunk size rounded down to one.
        let span = self.scratch.len() / D::WRITE_SIZE * D::WRITE_SIZE;
        if span == 0 {
            crate::log::warn!("Scratch smaller than write size {}", D::WRITE_SIZE);
            return Err(Error::NoMemory);
        }

        erase_all(dst).await?;

        let offset = component.payload_offset();
        let size = component.payload_size();
        let mut done = 0u32;

        while done < size {
            // Start each write on a program unit, padding the head and the tail with the erased value. The
            // destination was just erased, so this leaves the flash contents untouched.
            let at = offset + done;
            let head = at as usize % D::WRITE_SIZE;
            let chunk = ((size - done) as usize).min(span - head);

            self.scratch[..head].fill(0xFF);
            read(src, at, &mut self.scratch[head..head + chunk]).await?;
            let padded = align_up(head + chunk, D::WRITE_SIZE);
            self.scratch[head + chunk..padded].fill(0xFF);
            write(dst, at - head as u32, &self.scratch[..padded]).await?;

            done += chunk as u32;
        }

        crate::log::debug!("Copied {} bytes to {}", size, offset);
        Ok(())
    }
}
