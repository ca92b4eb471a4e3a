//! Component application strategies like copying or decompressing.
//!
//! A strategy erases the destination and then writes a single component's payload into it. The source is only read.

use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};

use crate::{Error, header::Component};

#[cfg(feature = "copy")]
pub mod copy;
#[cfg(feature = "lzma")]
pub mod lzma;

/// A component application strategy.
#[allow(async_fn_in_trait)]
pub trait Strategy {
    /// Erase `dst` and write the payload of `component`, as staged in `src`, into it.
    async fn apply<D: NorFlash, S: ReadNorFlash>(
        &mut self,
        dst: &mut D,
        src: &mut S,
        component: &Component,
    ) -> Result<(), Error>;
}

/// Erase the entire device.
pub(crate) async fn erase_all<F: NorFlash>(flash: &mut F) -> Result<(), Error> {
    let capacity = flash.capacity() as u32;
    flash.erase(0, capacity).await.map_err(|_| {
        crate::log::warn!("Erase of {} bytes failed", capacity);
        Error::Io
    })
}

pub(crate) async fn write<F: NorFlash>(flash: &mut F, offset: u32, data: &[u8]) -> Result<(), Error> {
    flash.write(offset, data).await.map_err(|_| {
        crate::log::warn!("Write of {} bytes at {} failed", data.len(), offset);
        Error::Io
    })
}
