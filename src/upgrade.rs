//! The upgrade check, run once per reset.
//!
//! A check walks the staged container twice. The first pass validates every header and hash, the second applies
//! every component. Only a completely applied (or deliberately skipped) container is erased from the source.

use embedded_storage_async::nor_flash::{NorFlash, ReadNorFlash};

use crate::{
    Config, Error, Outcome, Status, check,
    config::{CHECK_SIZE, DICT_SIZE, LZMA_READ_SIZE, LZMA_WRITE_BUF, PROBS_LEN},
    header::{Component, Flag, UpgradeInfo},
    pool::Pools,
    state::{self, SwapInfo, SwapStore},
    strategies::{Strategy, erase_all},
};

/// Owner of all buffers an upgrade check needs.
///
/// `PROBS` and `DICT` size the decoder pools, and bound the LZMA streams that can be applied.
pub struct Upgrader<const PROBS: usize = PROBS_LEN, const DICT: usize = DICT_SIZE> {
    config: Config,
    scratch: [u8; CHECK_SIZE],
    lzma_in: [u8; LZMA_READ_SIZE],
    lzma_out: [u8; LZMA_WRITE_BUF],
    pools: Pools<PROBS, DICT>,
}

impl Upgrader {
    pub const fn new(config: Config) -> Self {
        Self::with_pools(config)
    }
}

impl<const PROBS: usize, const DICT: usize> Upgrader<PROBS, DICT> {
    pub const fn with_pools(config: Config) -> Self {
        Self {
            config,
            scratch: [0; CHECK_SIZE],
            lzma_in: [0; LZMA_READ_SIZE],
            lzma_out: [0; LZMA_WRITE_BUF],
            pools: Pools::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pools(&self) -> &Pools<PROBS, DICT> {
        &self.pools
    }

    /// Check the container header and the hash over everything following it.
    ///
    /// Returns `None` if no container is staged.
    pub async fn validate_container<S: ReadNorFlash>(
        &mut self,
        src: &mut S,
    ) -> Result<Option<UpgradeInfo>, Error> {
        let Some(info) = check::read_container(src).await? else {
            return Ok(None);
        };
        check::check_accepted(&self.config, &info)?;
        self.check_container_hash(src, &info).await?;
        Ok(Some(info))
    }

    async fn check_container_hash<S: ReadNorFlash>(
        &mut self,
        src: &mut S,
        info: &UpgradeInfo,
    ) -> Result<(), Error> {
        check::check_hash(
            src,
            UpgradeInfo::SIZE as u32,
            info.size.get(),
            &info.hash,
            &mut self.scratch,
        )
        .await
    }

    pub async fn validate_components<S: ReadNorFlash>(
        &mut self,
        src: &mut S,
        info: &UpgradeInfo,
    ) -> Result<(), Error> {
        check::validate_components(src, info, &mut self.scratch).await
    }

    /// Apply each component in order, stopping at the first one that fails or is skipped.
    ///
    /// A component with a flag that is not recognized (or whose strategy is not compiled in) yields [`Status::None`].
    pub async fn apply_components<D: NorFlash, S: ReadNorFlash>(
        &mut self,
        dst: &mut D,
        src: &mut S,
        info: &UpgradeInfo,
    ) -> Outcome {
        let mut offset = UpgradeInfo::SIZE as u32;

        for index in 0..info.count.get() {
            let component = check::read_component(src, offset).await?;
            let flag = component.info.flag();
            crate::log::info!(
                "Applying component {} ({:?}, {} bytes)",
                index,
                flag,
                component.payload_size()
            );

            match flag {
                #[cfg(feature = "copy")]
                Flag::Copy => self.upgrade_copy(dst, src, &component).await?,
                #[cfg(feature = "lzma")]
                Flag::Lzma => self.upgrade_lzma(dst, src, &component).await?,
                _ => {
                    crate::log::warn!("Skipping component {} with flag {:?}", index, flag);
                    return Ok(Status::None);
                }
            }

            offset = check::next_offset(&component)?;
        }

        Ok(Status::Success)
    }

    #[cfg(feature = "copy")]
    pub async fn upgrade_copy<D: NorFlash, S: ReadNorFlash>(
        &mut self,
        dst: &mut D,
        src: &mut S,
        component: &Component,
    ) -> Result<(), Error> {
        crate::strategies::copy::Copy::new(&mut self.scratch)
            .apply(dst, src, component)
            .await
    }

    #[cfg(feature = "lzma")]
    pub async fn upgrade_lzma<D: NorFlash, S: ReadNorFlash>(
        &mut self,
        dst: &mut D,
        src: &mut S,
        component: &Component,
    ) -> Result<(), Error> {
        crate::strategies::lzma::Lzma::new(&mut self.lzma_in, &mut self.lzma_out, &self.pools)
            .apply(dst, src, component)
            .await
    }

    /// Validate and apply the container staged in `src` to `dst`, and record the outcome in `swap`.
    ///
    /// Once the retry counter of `swap` reached [`Config::retry_limit`] nothing is attempted, no storage is touched
    /// and `swap` is left as is.
    pub async fn upgrade_check<D: NorFlash, S: NorFlash>(
        &mut self,
        swap: Option<&mut SwapInfo>,
        dst: &mut D,
        src: &mut S,
    ) -> Outcome {
        let limit = self.config.retry_limit;
        if swap.as_deref().is_some_and(|swap| swap.retry >= limit) {
            crate::log::warn!("Upgrade refused after {} retries", limit);
            return Err(Error::RetryExhausted);
        }

        let mut identity = None;
        let outcome = self.check_and_apply(dst, src, &mut identity).await;
        match outcome {
            Ok(status) => crate::log::info!("Upgrade check done: {:?}", status),
            Err(e) => crate::log::warn!("Upgrade check failed: {:?}", e),
        }

        if let Some(swap) = swap {
            swap.finalize(identity.as_ref(), &outcome);
        }
        outcome
    }

    async fn check_and_apply<D: NorFlash, S: NorFlash>(
        &mut self,
        dst: &mut D,
        src: &mut S,
        identity: &mut Option<UpgradeInfo>,
    ) -> Outcome {
        let Some(info) = check::read_container(src).await? else {
            return Ok(Status::None);
        };
        *identity = Some(info);
        check::check_accepted(&self.config, &info)?;
        crate::log::info!(
            "Container of kind {} with {} components staged",
            info.kind.get(),
            info.count.get()
        );

        self.check_container_hash(src, &info).await?;
        self.validate_components(src, &info).await?;
        let status = self.apply_components(dst, src, &info).await?;

        // The destination is complete, failing to clear the source only means it is checked again.
        if erase_all(src).await.is_err() {
            crate::log::warn!("Erasing the applied container failed");
        }
        Ok(status)
    }

    /// A full reset cycle: load the swap info from `store`, check, and store the swap info if it changed.
    pub async fn run<St: SwapStore, D: NorFlash, S: NorFlash>(
        &mut self,
        store: &mut St,
        dst: &mut D,
        src: &mut S,
    ) -> Outcome {
        let mut swap = state::load_or_reset(store).await?;
        let loaded = swap;

        let outcome = self.upgrade_check(Some(&mut swap), dst, src).await;

        if swap != loaded && store.store(&swap).await.is_err() {
            crate::log::warn!("Storing the swap info failed");
        }
        outcome
    }
}
