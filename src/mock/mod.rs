mod image;

use std::{vec, vec::Vec};

use embedded_storage_async::nor_flash::{
    ErrorType, MultiwriteNorFlash, NorFlash, NorFlashErrorKind, ReadNorFlash,
};

pub use image::{ImageBuilder, lzma_compress, sample, with_known_size};

/// In-memory NOR flash, counting every operation.
#[derive(Debug)]
pub struct MockFlash {
    pub data: Vec<u8>,
    pub reads: usize,
    pub writes: usize,
    pub erases: usize,
    /// Offset and length of each successful write.
    pub write_log: Vec<(u32, usize)>,
    fail_read: Option<usize>,
    fail_write: Option<usize>,
}

impl MockFlash {
    /// Erased flash of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        assert_eq!(capacity % Self::ERASE_SIZE, 0);
        MockFlash {
            data: vec![0xFF; capacity],
            reads: 0,
            writes: 0,
            erases: 0,
            write_log: Vec::new(),
            fail_read: None,
            fail_write: None,
        }
    }

    pub fn with_contents(capacity: usize, contents: &[u8]) -> Self {
        let mut flash = Self::new(capacity);
        flash.data[..contents.len()].copy_from_slice(contents);
        flash
    }

    /// Let every read fail after `n` more successful ones.
    pub fn fail_read_after(&mut self, n: usize) {
        self.fail_read = Some(n);
    }

    /// Let every write fail after `n` more successful ones.
    pub fn fail_write_after(&mut self, n: usize) {
        self.fail_write = Some(n);
    }

    pub fn operations(&self) -> usize {
        self.reads + self.writes + self.erases
    }

    pub fn is_erased(&self) -> bool {
        self.data.iter().all(|&b| b == 0xFF)
    }

    fn check_bounds(&self, offset: u32, len: usize) -> Result<(), NorFlashErrorKind> {
        if offset as usize + len > self.data.len() {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        Ok(())
    }
}

/// Decrement a fault countdown, true if the operation should fail.
fn trip(countdown: &mut Option<usize>) -> bool {
    match countdown {
        Some(0) => true,
        Some(n) => {
            *n -= 1;
            false
        }
        None => false,
    }
}

impl ErrorType for MockFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MockFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.reads += 1;
        if trip(&mut self.fail_read) {
            return Err(NorFlashErrorKind::Other);
        }
        self.check_bounds(offset, bytes.len())?;

        let offset = offset as usize;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MockFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 256;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.erases += 1;
        if from as usize % Self::ERASE_SIZE != 0 || to as usize % Self::ERASE_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        if from > to {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        self.check_bounds(from, (to - from) as usize)?;

        self.data[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.writes += 1;
        if trip(&mut self.fail_write) {
            return Err(NorFlashErrorKind::Other);
        }
        if offset as usize % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        self.check_bounds(offset, bytes.len())?;

        // Programming can only clear bits.
        let offset_usize = offset as usize;
        for (cell, byte) in self.data[offset_usize..offset_usize + bytes.len()]
            .iter_mut()
            .zip(bytes)
        {
            *cell &= byte;
        }
        self.write_log.push((offset, bytes.len()));
        Ok(())
    }
}

impl MultiwriteNorFlash for MockFlash {}

/// [`MockFlash`] programmed in 16 byte units, as on parts with wide flash words.
#[derive(Debug)]
pub struct WideFlash(pub MockFlash);

impl ErrorType for WideFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for WideFlash {
    const READ_SIZE: usize = 1;

    async fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.0.read(offset, bytes).await
    }

    fn capacity(&self) -> usize {
        self.0.capacity()
    }
}

impl NorFlash for WideFlash {
    const WRITE_SIZE: usize = 16;
    const ERASE_SIZE: usize = MockFlash::ERASE_SIZE;

    async fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.0.erase(from, to).await
    }

    async fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if offset as usize % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            self.0.writes += 1;
            return Err(NorFlashErrorKind::NotAligned);
        }
        self.0.write(offset, bytes).await
    }
}

impl MultiwriteNorFlash for WideFlash {}
