//! Staged firmware upgrade engine for bootloaders.
//!
//! A candidate image is staged in a *source* region as a container: a header, followed by a list of
//! components each carrying their own header and payload. On every reset the bootloader validates the whole
//! container (headers, then content hashes), and only then applies every component to the *destination* region,
//! either by copying it verbatim or by streaming it through an LZMA decoder.
//!
//! The result of each attempt is kept in a small [`state::SwapInfo`] record which survives a reset,
//! bounding the number of retries of an upgrade that keeps failing for operational reasons.
#![no_std]

pub mod check;
pub mod config;
pub mod header;
pub mod lzma;
pub mod pool;
pub mod state;
pub mod strategies;
pub mod upgrade;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod mock;

pub use config::Config;
pub use header::{BinInfo, UpgradeInfo};
pub use upgrade::Upgrader;

#[cfg(feature = "defmt")]
pub(crate) use defmt as log;

#[cfg(all(feature = "log", not(feature = "defmt")))]
pub(crate) use log_crate as log;

#[cfg(not(any(feature = "log", feature = "defmt")))]
pub(crate) mod log {
    macro_rules! trace {
        ($($x:expr),* $(,)?) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use trace;
    macro_rules! debug {
        ($($x:expr),* $(,)?) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use debug;
    macro_rules! info {
        ($($x:expr),* $(,)?) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use info;
    macro_rules! warner {
        ($($x:expr),* $(,)?) => {{ $( let _ = &$x; )* }};
    }
    pub(crate) use warner as warn;
}

/// Failure of a single step of an upgrade check.
#[derive(Clone, Copy, PartialEq, Eq, Debug, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A header CRC or content hash did not match, or the image was rejected.
    #[error("checksum mismatch")]
    Checksum,
    /// The retry limit of the swap info was reached before attempting anything.
    #[error("retry limit reached")]
    RetryExhausted,
    /// A storage read, write or erase failed.
    #[error("storage I/O failed")]
    Io,
    /// A pool could not satisfy an allocation.
    #[error("out of memory")]
    NoMemory,
    /// The compressed stream is corrupt or stalled.
    #[error("decompression failed: {0}")]
    Decompress(#[from] lzma::Error),
}

impl Error {
    /// Operational failures which might succeed on a next attempt, and hence count towards the retry limit.
    ///
    /// A checksum mismatch is structural: the same image will never pass.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Error::Io | Error::NoMemory | Error::Decompress(_))
    }

    /// Result code as persisted in [`state::SwapInfo::result`].
    pub const fn code(&self) -> u32 {
        match self {
            Error::Checksum => 0xE001,
            Error::RetryExhausted => 0xE002,
            Error::Io => 0xE003,
            Error::NoMemory => 0xE004,
            Error::Decompress(e) => 0xE200 | e.code() as u32,
        }
    }
}

/// Non-failing result of an upgrade check or of applying a component.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    /// Nothing was done: no container is staged, or a component was skipped.
    None,
    /// Everything was applied.
    Success,
}

impl Status {
    pub const fn code(&self) -> u32 {
        match self {
            Status::None => 0x0000,
            Status::Success => 0xE000,
        }
    }
}

/// Outcome of a full upgrade check.
pub type Outcome = Result<Status, Error>;

/// Result code of an outcome, as persisted in the swap info.
pub const fn outcome_code(outcome: &Outcome) -> u32 {
    match outcome {
        Ok(status) => status.code(),
        Err(e) => e.code(),
    }
}
