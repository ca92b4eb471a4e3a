use crate::{
    Error,
    state::{SwapInfo, SwapStore},
};

/// Swap info kept in a memory region which survives a reset, but holds garbage after a cold boot.
///
/// Typically a `.noinit` section in RAM shared with the application.
pub struct Retained<'a> {
    region: &'a mut [u8; SwapInfo::SIZE],
}

impl<'a> Retained<'a> {
    pub fn new(region: &'a mut [u8; SwapInfo::SIZE]) -> Self {
        Self { region }
    }
}

impl SwapStore for Retained<'_> {
    async fn load(&mut self) -> Result<Option<SwapInfo>, Error> {
        Ok(Some(SwapInfo::from_bytes(*self.region)))
    }

    async fn store(&mut self, info: &SwapInfo) -> Result<(), Error> {
        *self.region = info.to_bytes();
        Ok(())
    }
}
