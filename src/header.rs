//! On-flash layout of the upgrade container and its component headers.
//!
//! ```text
//! +-------------+---------+-----------+---------+-----------+-----+
//! | UpgradeInfo | BinInfo | payload 0 | BinInfo | payload 1 | ... |
//! +-------------+---------+-----------+---------+-----------+-----+
//! ```
//!
//! All multi-byte fields are big-endian. Every header starts with a CRC16 over the remainder of the header.

use crc::{CRC_16_ARC, Crc};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::big_endian::{U16, U32},
};

/// Magic identifying a staged upgrade container, and a valid swap info record.
pub const UPGRADE_MAGIC: u16 = 0x9ADE;

/// Size of the SHA-256 digests carried in the headers.
pub const HASH_SIZE: usize = 32;

pub(crate) const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// CRC16 over a header, excluding its leading `check` field.
pub(crate) fn header_crc(bytes: &[u8]) -> u16 {
    CRC16.checksum(&bytes[core::mem::size_of::<U16>()..])
}

/// Container header, located at offset 0 of the source region.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct UpgradeInfo {
    pub check: U16,
    pub magic: U16,
    /// Firmware class, meaning is up to the integrator.
    pub kind: U16,
    /// Number of components following this header.
    pub count: U16,
    /// Length of all components (headers and payloads) following this header.
    pub size: U32,
    /// SHA-256 over the `size` bytes following this header.
    pub hash: [u8; HASH_SIZE],
}

impl UpgradeInfo {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        zerocopy::transmute!(bytes)
    }

    pub fn is_present(&self) -> bool {
        self.magic.get() == UPGRADE_MAGIC
    }

    pub fn checksum(&self) -> u16 {
        header_crc(self.as_bytes())
    }

    pub fn verify(&self) -> bool {
        self.check.get() == self.checksum()
    }

    /// Recompute and store the header CRC.
    pub fn seal(&mut self) {
        self.check = U16::new(self.checksum());
    }
}

/// Transformation applied to a component payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    /// Payload is copied verbatim.
    Copy,
    /// Payload is an LZMA stream with a 13 byte header.
    Lzma,
    /// Not recognized, the component is skipped.
    Unknown(u16),
}

impl Flag {
    pub const COPY: u16 = 0x0001;
    pub const LZMA: u16 = 0x0020;

    pub const fn raw(&self) -> u16 {
        match self {
            Flag::Copy => Self::COPY,
            Flag::Lzma => Self::LZMA,
            Flag::Unknown(raw) => *raw,
        }
    }
}

impl From<u16> for Flag {
    fn from(raw: u16) -> Self {
        match raw {
            Self::COPY => Flag::Copy,
            Self::LZMA => Flag::Lzma,
            raw => Flag::Unknown(raw),
        }
    }
}

/// Component header, immediately followed by `src_size` bytes of payload.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct BinInfo {
    pub check: U16,
    pub flag: U16,
    /// Intended load address. Informational only: components are written at their offset in the container.
    pub dst_addr: U32,
    pub src_size: U32,
    /// SHA-256 over the payload.
    pub hash: [u8; HASH_SIZE],
}

impl BinInfo {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        zerocopy::transmute!(bytes)
    }

    pub fn flag(&self) -> Flag {
        Flag::from(self.flag.get())
    }

    pub fn checksum(&self) -> u16 {
        header_crc(self.as_bytes())
    }

    pub fn verify(&self) -> bool {
        self.check.get() == self.checksum()
    }

    pub fn seal(&mut self) {
        self.check = U16::new(self.checksum());
    }
}

/// A component header together with its location in the source region.
#[derive(Clone, Copy, Debug)]
pub struct Component {
    /// Offset of the component header.
    pub offset: u32,
    pub info: BinInfo,
}

impl Component {
    pub fn payload_offset(&self) -> u32 {
        self.offset + BinInfo::SIZE as u32
    }

    pub fn payload_size(&self) -> u32 {
        self.info.src_size.get()
    }

    /// Offset of the next component header, `None` if it does not fit the 32 bit address space.
    pub fn next_offset(&self) -> Option<u32> {
        self.payload_offset().checked_add(self.payload_size())
    }
}
