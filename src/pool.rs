//! Fixed pools handing out the decoder working memory.
//!
//! Each pool is a single statically sized region which can be leased out once at a time. A lease is released when
//! it is dropped, so every exit path of a decompression returns its memory.

use core::cell::{RefCell, RefMut};

use crate::{
    Error,
    config::{DICT_SIZE, PROBS_LEN},
};

/// A region of `N` elements, leased out as a whole.
pub struct Pool<T, const N: usize> {
    region: RefCell<[T; N]>,
}

impl<T: Copy, const N: usize> Pool<T, N> {
    pub const fn new(fill: T) -> Self {
        Self {
            region: RefCell::new([fill; N]),
        }
    }
}

impl<T, const N: usize> Pool<T, N> {
    /// Lease the first `len` elements of the region.
    ///
    /// Fails with [`Error::NoMemory`] when `len` exceeds the region or it is leased out already.
    pub fn allocate(&self, len: usize) -> Result<RefMut<'_, [T]>, Error> {
        if len > N {
            crate::log::warn!("Pool allocation of {} exceeds capacity {}", len, N);
            return Err(Error::NoMemory);
        }

        let region = self.region.try_borrow_mut().map_err(|_| {
            crate::log::warn!("Pool is in use");
            Error::NoMemory
        })?;
        Ok(RefMut::map(region, |region| &mut region[..len]))
    }

    pub fn in_use(&self) -> bool {
        self.region.try_borrow_mut().is_err()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

/// The two regions an LZMA decompression needs.
pub struct Pools<const PROBS: usize = PROBS_LEN, const DICT: usize = DICT_SIZE> {
    pub probs: Pool<u16, PROBS>,
    pub dictionary: Pool<u8, DICT>,
}

impl<const PROBS: usize, const DICT: usize> Pools<PROBS, DICT> {
    pub const fn new() -> Self {
        Self {
            probs: Pool::new(0),
            dictionary: Pool::new(0),
        }
    }
}

impl<const PROBS: usize, const DICT: usize> Default for Pools<PROBS, DICT> {
    fn default() -> Self {
        Self::new()
    }
}
