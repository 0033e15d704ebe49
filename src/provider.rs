// src/provider.rs
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use ethers::providers::Middleware;
use ethers::types::{Address, BlockNumber, Bytes, H256, U256, U64};
#[cfg(test)]
use mockall::automock;

use crate::contracts::{IEntryPoint, IPaymaster, IERC20};
use crate::types::{DepositInfo, FeeData, UserOperation};

/// Default priority fee when the chain reports a base fee (1.5 gwei).
pub const DEFAULT_PRIORITY_FEE: u64 = 1_500_000_000;

/// `postOp` mode argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOpMode {
    OpSucceeded = 0,
    OpReverted = 1,
    PostOpReverted = 2,
}

/// Read and write access to the chain state this crate needs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainProvider: Send + Sync + 'static {
    async fn fee_data(&self) -> anyhow::Result<FeeData>;

    async fn get_nonce(&self, entry_point: Address, sender: Address, key: U256)
        -> anyhow::Result<U256>;

    async fn get_deposit_info(
        &self,
        entry_point: Address,
        account: Address,
    ) -> anyhow::Result<DepositInfo>;

    /// Returns `(context, validationData)`.
    async fn validate_paymaster_user_op(
        &self,
        paymaster: Address,
        entry_point: Address,
        user_op: UserOperation,
        user_op_hash: H256,
        max_cost: U256,
    ) -> anyhow::Result<(Bytes, U256)>;

    async fn post_op(
        &self,
        paymaster: Address,
        mode: PostOpMode,
        context: Bytes,
        actual_gas_cost: U256,
    ) -> anyhow::Result<()>;

    async fn token_balance(&self, token: Address, owner: Address) -> anyhow::Result<U256>;

    async fn token_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> anyhow::Result<U256>;
}

/// `ChainProvider` over any ethers middleware. Writes (`post_op`) need a
/// signing middleware.
#[derive(Debug)]
pub struct EthersProvider<M> {
    client: Arc<M>,
}

impl<M> EthersProvider<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<M> {
        &self.client
    }
}

#[async_trait]
impl<M> ChainProvider for EthersProvider<M>
where
    M: Middleware + 'static,
{
    async fn fee_data(&self) -> anyhow::Result<FeeData> {
        let block = self
            .client
            .get_block(BlockNumber::Latest)
            .await
            .context("should load latest block for fee data")?;
        let gas_price = self.client.get_gas_price().await.ok();

        let (max_fee_per_gas, max_priority_fee_per_gas) =
            match block.and_then(|block| block.base_fee_per_gas) {
                Some(base_fee) => {
                    let priority = U256::from(DEFAULT_PRIORITY_FEE);
                    let max_fee = base_fee.saturating_mul(U256::from(2)).saturating_add(priority);
                    (Some(max_fee), Some(priority))
                }
                None => (None, None),
            };

        Ok(FeeData {
            gas_price,
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    async fn get_nonce(
        &self,
        entry_point: Address,
        sender: Address,
        key: U256,
    ) -> anyhow::Result<U256> {
        let entry_point = IEntryPoint::new(entry_point, self.client.clone());
        Ok(entry_point.get_nonce(sender, key).call().await?)
    }

    async fn get_deposit_info(
        &self,
        entry_point: Address,
        account: Address,
    ) -> anyhow::Result<DepositInfo> {
        let entry_point = IEntryPoint::new(entry_point, self.client.clone());
        Ok(DepositInfo::from(entry_point.deposits(account).call().await?))
    }

    async fn validate_paymaster_user_op(
        &self,
        paymaster: Address,
        entry_point: Address,
        user_op: UserOperation,
        user_op_hash: H256,
        max_cost: U256,
    ) -> anyhow::Result<(Bytes, U256)> {
        let paymaster = IPaymaster::new(paymaster, self.client.clone());
        // validatePaymasterUserOp is restricted to the EntryPoint
        Ok(paymaster
            .validate_paymaster_user_op(user_op.into(), user_op_hash.into(), max_cost)
            .from(entry_point)
            .call()
            .await?)
    }

    async fn post_op(
        &self,
        paymaster: Address,
        mode: PostOpMode,
        context: Bytes,
        actual_gas_cost: U256,
    ) -> anyhow::Result<()> {
        let paymaster = IPaymaster::new(paymaster, self.client.clone());
        let call = paymaster.post_op(mode as u8, context, actual_gas_cost);
        let pending = call.send().await?;
        let receipt = pending
            .await?
            .context("postOp transaction was dropped from the mempool")?;
        anyhow::ensure!(
            receipt.status == Some(U64::from(1)),
            "postOp transaction {:?} reverted",
            receipt.transaction_hash
        );
        Ok(())
    }

    async fn token_balance(&self, token: Address, owner: Address) -> anyhow::Result<U256> {
        let token = IERC20::new(token, self.client.clone());
        Ok(token.balance_of(owner).call().await?)
    }

    async fn token_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> anyhow::Result<U256> {
        let token = IERC20::new(token, self.client.clone());
        Ok(token.allowance(owner, spender).call().await?)
    }
}
