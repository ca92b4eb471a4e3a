//! Simple straightforward implementation of keeping the swap info on NOR flash.
//!
//! This implementation focusses on correctness and ease, contrary to efficiency and code size.
//! Leverages `sequential-storage` and `postcard` to store and serialize/deserialize the swap info,
//! which makes it robust against power loss halfway a store.

use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::{
    cache::KeyPointerCache,
    map::{SerializationError, Value},
};

use crate::{
    Error,
    state::{SwapInfo, SwapStore},
};

/// Upper bound of a postcard encoded [`SwapInfo`], varints included.
const MAX_SERIALIZED_SIZE: usize = 80;

impl<'a> Value<'a> for SwapInfo {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        let buffer = postcard::to_slice(self, buffer).map_err(|e| match e {
            postcard::Error::SerializeBufferFull => SerializationError::BufferTooSmall,
            // Unmapped error.
            _ => SerializationError::Custom(0),
        })?;

        Ok(buffer.len())
    }

    fn deserialize_from(buffer: &'a [u8]) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        postcard::from_bytes(buffer).map_err(|e| match e {
            postcard::Error::DeserializeUnexpectedEnd => SerializationError::BufferTooSmall,
            postcard::Error::DeserializeBadVarint
            | postcard::Error::DeserializeBadBool
            | postcard::Error::DeserializeBadEncoding => SerializationError::InvalidFormat,
            // Unmapped error.
            _ => SerializationError::Custom(0),
        })
    }
}

/// Swap info kept in a dedicated flash partition of at least two erase pages.
pub struct FlashSwap<NVM: NorFlash> {
    nvm: NVM,
    nvm_cache: KeyPointerCache<2, (), 1>,
}

impl<NVM: NorFlash> FlashSwap<NVM> {
    pub fn new(nvm: NVM) -> Self {
        Self {
            nvm,
            nvm_cache: KeyPointerCache::new(),
        }
    }

    pub fn into_inner(self) -> NVM {
        self.nvm
    }
}

impl<NVM: NorFlash> SwapStore for FlashSwap<NVM> {
    async fn load(&mut self) -> Result<Option<SwapInfo>, Error> {
        let nvm_size = self.nvm.capacity() as u32;
        let mut data_buffer = [0u8; MAX_SERIALIZED_SIZE];

        let info = sequential_storage::map::fetch_item::<(), SwapInfo, _>(
            &mut self.nvm,
            0..nvm_size,
            &mut self.nvm_cache,
            &mut data_buffer,
            &(),
        )
        .await
        .map_err(|_| {
            crate::log::warn!("Fetching swap info failed");
            Error::Io
        })?;

        if info.is_none() {
            crate::log::debug!("Swap info NVM does not contain value");
        }
        Ok(info)
    }

    async fn store(&mut self, info: &SwapInfo) -> Result<(), Error> {
        let nvm_size = self.nvm.capacity() as u32;
        let mut data_buffer = [0u8; MAX_SERIALIZED_SIZE];

        crate::log::debug!("Storing swap info with result {} retry {}", info.result, info.retry);

        sequential_storage::map::store_item::<(), SwapInfo, _>(
            &mut self.nvm,
            0..nvm_size,
            &mut self.nvm_cache,
            &mut data_buffer,
            &(),
            info,
        )
        .await
        .map_err(|_| {
            crate::log::warn!("Storing swap info failed");
            Error::Io
        })
    }
}
