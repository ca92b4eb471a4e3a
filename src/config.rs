//! Compile-time buffer sizes and runtime configuration of an [`crate::Upgrader`].

use crate::{header::UpgradeInfo, lzma};

/// Number of attempts after which an upgrade that keeps failing for operational reasons is refused.
pub const DEFAULT_RETRY_LIMIT: u16 = 3;

/// Scratch buffer used to hash and copy payloads.
pub const CHECK_SIZE: usize = 1024;

/// Staging buffer for compressed input.
pub const LZMA_READ_SIZE: usize = 1024;

/// Staging buffer for decompressed output, before padding for alignment.
pub const LZMA_WRITE_SIZE: usize = 1024;

/// Smallest unit in which decompressed output is written, destinations with a larger write size use theirs.
pub const WRITE_ALIGN: usize = core::mem::size_of::<usize>();

/// Size of the dictionary pool, the largest LZMA dictionary that can be decoded.
pub const DICT_SIZE: usize = 4096;

/// Size of the probability pool, enough for streams with `lc + lp <= 3`.
pub const PROBS_LEN: usize = lzma::probs_len(3);

/// Round `value` up to a multiple of `align`.
pub const fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// Output staging buffer size: room for a full write plus a leftover partial unit.
///
/// Destinations with a write size above half of this are refused by the LZMA strategy.
pub const LZMA_WRITE_BUF: usize = align_up(LZMA_WRITE_SIZE + WRITE_ALIGN - 1, WRITE_ALIGN);

/// Optional extra gate deciding whether a (checksum valid) container may be applied.
///
/// Typically used to reject images of the wrong firmware type or an older version.
pub type CompareHook = fn(&UpgradeInfo) -> bool;

#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Checks are refused once the swap info retry counter reaches this value.
    pub retry_limit: u16,
    pub compare: Option<CompareHook>,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            compare: None,
        }
    }

    pub const fn with_retry_limit(mut self, retry_limit: u16) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub const fn with_compare(mut self, compare: CompareHook) -> Self {
        self.compare = Some(compare);
        self
    }

    pub(crate) fn accepts(&self, info: &UpgradeInfo) -> bool {
        self.compare.is_none_or(|compare| compare(info))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
