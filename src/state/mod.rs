//! The swap info record, summarizing the last upgrade check across resets.
//!
//! The record is read once before a check, and rewritten after it. It is only trusted when both its magic and its
//! CRC are valid: anything else (a cold boot, a torn write) yields an all-zero record.

use serde::{Deserialize, Serialize};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::big_endian::{U16, U32},
};

use crate::{
    Error, Outcome,
    header::{HASH_SIZE, UPGRADE_MAGIC, UpgradeInfo, header_crc},
    outcome_code,
};

mod retained;
#[cfg(feature = "simple_state")]
pub mod simple;

pub use retained::Retained;

/// Record as persisted in a retained memory region.
#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct RawSwapInfo {
    check: U16,
    magic: U16,
    kind: U16,
    count: U16,
    size: U32,
    hash: [u8; HASH_SIZE],
    retry: U16,
    version: U16,
    reset: U32,
    result: U32,
}

/// State as kept by the bootloader across resets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInfo {
    pub check: u16,
    pub magic: u16,
    /// Identity of the container last checked, all zeros if none was staged.
    pub kind: u16,
    pub count: u16,
    pub size: u32,
    pub hash: [u8; HASH_SIZE],
    /// Number of consecutive checks that failed for an operational reason.
    pub retry: u16,
    /// Not interpreted, left for the application.
    pub version: u16,
    /// Not interpreted, left for the application.
    pub reset: u32,
    /// Result code of the last check, see [`crate::outcome_code`].
    pub result: u32,
}

impl SwapInfo {
    pub const SIZE: usize = core::mem::size_of::<RawSwapInfo>();

    fn raw(&self) -> RawSwapInfo {
        RawSwapInfo {
            check: U16::new(self.check),
            magic: U16::new(self.magic),
            kind: U16::new(self.kind),
            count: U16::new(self.count),
            size: U32::new(self.size),
            hash: self.hash,
            retry: U16::new(self.retry),
            version: U16::new(self.version),
            reset: U32::new(self.reset),
            result: U32::new(self.result),
        }
    }

    /// Big-endian representation.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        zerocopy::transmute!(self.raw())
    }

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        let raw: RawSwapInfo = zerocopy::transmute!(bytes);
        Self {
            check: raw.check.get(),
            magic: raw.magic.get(),
            kind: raw.kind.get(),
            count: raw.count.get(),
            size: raw.size.get(),
            hash: raw.hash,
            retry: raw.retry.get(),
            version: raw.version.get(),
            reset: raw.reset.get(),
            result: raw.result.get(),
        }
    }

    pub fn checksum(&self) -> u16 {
        header_crc(self.raw().as_bytes())
    }

    pub fn is_valid(&self) -> bool {
        self.magic == UPGRADE_MAGIC && self.check == self.checksum()
    }

    /// Record the outcome of a check of container `info`.
    ///
    /// The retry counter advances on transient failures only, and restarts on any other outcome.
    pub fn finalize(&mut self, info: Option<&UpgradeInfo>, outcome: &Outcome) {
        self.magic = UPGRADE_MAGIC;
        match info {
            Some(info) => {
                self.kind = info.kind.get();
                self.count = info.count.get();
                self.size = info.size.get();
                self.hash = info.hash;
            }
            None => {
                self.kind = 0;
                self.count = 0;
                self.size = 0;
                self.hash = [0; HASH_SIZE];
            }
        }

        self.result = outcome_code(outcome);
        self.retry = match outcome {
            Err(e) if e.is_transient() => self.retry.saturating_add(1),
            _ => 0,
        };
        self.check = self.checksum();
    }
}

/// Location the swap info is kept at.
#[allow(async_fn_in_trait)]
pub trait SwapStore {
    /// The stored record, `None` if nothing has been stored.
    async fn load(&mut self) -> Result<Option<SwapInfo>, Error>;

    async fn store(&mut self, info: &SwapInfo) -> Result<(), Error>;
}

/// Load the record, replacing anything invalid by an all-zero record.
///
/// Loading twice yields the same record.
pub async fn load_or_reset(store: &mut impl SwapStore) -> Result<SwapInfo, Error> {
    match store.load().await? {
        Some(info) if info.is_valid() => Ok(info),
        Some(info) => {
            let reset = SwapInfo::default();
            if info != reset {
                crate::log::info!("Swap info invalid, resetting");
                store.store(&reset).await?;
            }
            Ok(reset)
        }
        None => Ok(SwapInfo::default()),
    }
}
