// src/relayer/sponsor.rs
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, H256, U256, U64};
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::contracts::AdWalletSponsor;

/// A transfer the sponsor contract executes on the user's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsoredTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub nonce: U256,
    pub signature: Bytes,
}

/// The on-chain sponsor wallet the relayer pays gas through.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SponsorContract: Send + Sync + 'static {
    async fn nonce_of(&self, user: Address) -> anyhow::Result<U256>;

    /// Sends `executeSponsoredTransfer` and waits for it to be mined.
    async fn execute_sponsored_transfer(&self, transfer: SponsoredTransfer)
        -> anyhow::Result<H256>;
}

#[derive(Debug)]
pub struct AdWalletSponsorContract<M> {
    contract: AdWalletSponsor<M>,
}

impl<M> AdWalletSponsorContract<M>
where
    M: Middleware + 'static,
{
    pub fn new(address: Address, client: Arc<M>) -> Self {
        Self {
            contract: AdWalletSponsor::new(address, client),
        }
    }
}

#[async_trait]
impl<M> SponsorContract for AdWalletSponsorContract<M>
where
    M: Middleware + 'static,
{
    async fn nonce_of(&self, user: Address) -> anyhow::Result<U256> {
        Ok(self.contract.nonces(user).call().await?)
    }

    async fn execute_sponsored_transfer(
        &self,
        transfer: SponsoredTransfer,
    ) -> anyhow::Result<H256> {
        let call = self.contract.execute_sponsored_transfer(
            transfer.token,
            transfer.from,
            transfer.to,
            transfer.amount,
            transfer.nonce,
            transfer.signature,
        );
        let pending = call.send().await?;
        let tx_hash = pending.tx_hash();
        info!("Sent sponsored transfer {:?}", tx_hash);

        let receipt = pending
            .await?
            .context("sponsored transfer was dropped from the mempool")?;
        anyhow::ensure!(
            receipt.status == Some(U64::from(1)),
            "sponsored transfer {:?} reverted",
            tx_hash
        );
        Ok(tx_hash)
    }
}
