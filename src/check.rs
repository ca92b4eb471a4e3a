//! Validation of a staged container: header checksums and content hashes.
//!
//! Validation never writes. Every component is validated before the first one is applied.

use embedded_storage_async::nor_flash::ReadNorFlash;
use sha2::{Digest, Sha256};

use crate::{
    Config, Error,
    header::{BinInfo, Component, HASH_SIZE, UpgradeInfo},
};

/// Read `buf.len()` bytes at `offset`, any failure being an I/O error.
pub(crate) async fn read<F: ReadNorFlash>(
    flash: &mut F,
    offset: u32,
    buf: &mut [u8],
) -> Result<(), Error> {
    flash.read(offset, buf).await.map_err(|_| {
        crate::log::warn!("Read of {} bytes at {} failed", buf.len(), offset);
        Error::Io
    })
}

/// Stream `size` bytes starting at `offset` through SHA-256 and compare with `expected`.
pub async fn check_hash<F: ReadNorFlash>(
    flash: &mut F,
    offset: u32,
    size: u32,
    expected: &[u8; HASH_SIZE],
    scratch: &mut [u8],
) -> Result<(), Error> {
    let mut hasher = Sha256::new();
    let mut done = 0u32;

    while done < size {
        let chunk = ((size - done) as usize).min(scratch.len());
        let buf = &mut scratch[..chunk];
        read(flash, offset + done, buf).await?;
        hasher.update(&*buf);
        done += chunk as u32;
    }

    if hasher.finalize().as_slice() != expected {
        crate::log::warn!("Hash mismatch for {} bytes at {}", size, offset);
        return Err(Error::Checksum);
    }
    Ok(())
}

/// Read the container header.
///
/// Returns `None` if no container is staged, without reading any further. A present header with a bad CRC is a
/// checksum failure.
pub async fn read_container<F: ReadNorFlash>(flash: &mut F) -> Result<Option<UpgradeInfo>, Error> {
    let mut raw = [0u8; UpgradeInfo::SIZE];
    read(flash, 0, &mut raw).await?;
    let info = UpgradeInfo::from_bytes(raw);

    if !info.is_present() {
        crate::log::debug!("No upgrade staged (magic {:?})", info.magic.get());
        return Ok(None);
    }

    if !info.verify() {
        crate::log::warn!("Container header CRC mismatch");
        return Err(Error::Checksum);
    }

    Ok(Some(info))
}

/// Run the [`Config::compare`] hook, a rejected container counts as a checksum failure.
pub fn check_accepted(config: &Config, info: &UpgradeInfo) -> Result<(), Error> {
    if !config.accepts(info) {
        crate::log::info!("Container of kind {} rejected", info.kind.get());
        return Err(Error::Checksum);
    }
    Ok(())
}

/// Read the component header at `offset`, without checking it.
pub async fn read_component<F: ReadNorFlash>(flash: &mut F, offset: u32) -> Result<Component, Error> {
    let mut raw = [0u8; BinInfo::SIZE];
    read(flash, offset, &mut raw).await?;
    Ok(Component {
        offset,
        info: BinInfo::from_bytes(raw),
    })
}

/// Offset of the component following `component`, a header that points past the address space is corrupt.
pub(crate) fn next_offset(component: &Component) -> Result<u32, Error> {
    component.next_offset().ok_or(Error::Checksum)
}

/// Check the CRC and content hash of each of the `info.count` components.
pub async fn validate_components<F: ReadNorFlash>(
    flash: &mut F,
    info: &UpgradeInfo,
    scratch: &mut [u8],
) -> Result<(), Error> {
    let mut offset = UpgradeInfo::SIZE as u32;

    for index in 0..info.count.get() {
        let component = read_component(flash, offset).await?;
        if !component.info.verify() {
            crate::log::warn!("Component {} header CRC mismatch", index);
            return Err(Error::Checksum);
        }

        check_hash(
            flash,
            component.payload_offset(),
            component.payload_size(),
            &component.info.hash,
            scratch,
        )
        .await?;

        crate::log::debug!("Component {} valid ({} bytes)", index, component.payload_size());
        offset = next_offset(&component)?;
    }

    Ok(())
}
