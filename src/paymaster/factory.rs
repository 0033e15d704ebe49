// src/paymaster/factory.rs
use std::sync::Arc;

use ethers::contract::ContractCall;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use tracing::{info, warn};

use crate::contracts::IEntryPoint;
use crate::error::GaslessError;
use crate::types::{DepositInfo, PaymasterStakeInfo};
use crate::user_op::entry_point_v06;

/// Deployment and EntryPoint stake management for paymasters. Write calls
/// need `M` to be a signing middleware with a funded account.
#[derive(Debug)]
pub struct PaymasterFactory<M> {
    client: Arc<M>,
    entry_point: Address,
}

impl<M> PaymasterFactory<M>
where
    M: Middleware + 'static,
{
    pub fn new(client: Arc<M>) -> Self {
        Self::with_entry_point(client, entry_point_v06())
    }

    pub fn with_entry_point(client: Arc<M>, entry_point: Address) -> Self {
        Self {
            client,
            entry_point,
        }
    }

    /// Paymaster bytecode is not shipped with this crate; deploy with external
    /// tooling (forge, hardhat) and register the resulting address.
    pub async fn deploy_paymaster(
        &self,
        owner: Address,
        constructor_args: Bytes,
    ) -> Result<Address, GaslessError> {
        warn!(
            "Refusing to deploy paymaster for {:?} ({} bytes of constructor args)",
            owner,
            constructor_args.len()
        );
        Err(GaslessError::Paymaster(
            "paymaster bytecode is not available; deploy the contract with external tooling"
                .to_string(),
        ))
    }

    /// EntryPoint `addStake`, paying `amount` from the signer.
    pub async fn stake_for_paymaster(
        &self,
        unstake_delay_sec: u32,
        amount: U256,
    ) -> Result<H256, GaslessError> {
        let entry_point = self.entry_point();
        let call = entry_point.add_stake(unstake_delay_sec).value(amount);
        let receipt = send_and_confirm(call, "addStake").await?;
        info!(
            "Staked {} wei with {}s unstake delay in {:?}",
            amount, unstake_delay_sec, receipt.transaction_hash
        );
        Ok(receipt.transaction_hash)
    }

    pub async fn unlock_stake(&self) -> Result<H256, GaslessError> {
        let entry_point = self.entry_point();
        let receipt = send_and_confirm(entry_point.unlock_stake(), "unlockStake").await?;
        Ok(receipt.transaction_hash)
    }

    pub async fn withdraw_stake(&self, to: Address) -> Result<H256, GaslessError> {
        let entry_point = self.entry_point();
        let receipt = send_and_confirm(entry_point.withdraw_stake(to), "withdrawStake").await?;
        info!("Withdrew stake to {:?}", to);
        Ok(receipt.transaction_hash)
    }

    /// EntryPoint `depositTo(paymaster)` funded with `amount`.
    pub async fn deposit_to_paymaster(
        &self,
        paymaster: Address,
        amount: U256,
    ) -> Result<H256, GaslessError> {
        let entry_point = self.entry_point();
        let call = entry_point.deposit_to(paymaster).value(amount);
        let receipt = send_and_confirm(call, "depositTo").await?;
        info!("Deposited {} wei for paymaster {:?}", amount, paymaster);
        Ok(receipt.transaction_hash)
    }

    pub async fn get_deposit_info(&self, paymaster: Address) -> Result<DepositInfo, GaslessError> {
        let deposits = self
            .entry_point()
            .deposits(paymaster)
            .call()
            .await
            .map_err(|e| GaslessError::Network(format!("failed to read deposit info: {e}")))?;
        Ok(DepositInfo::from(deposits))
    }

    pub async fn get_stake_info(
        &self,
        paymaster: Address,
    ) -> Result<PaymasterStakeInfo, GaslessError> {
        Ok(self.get_deposit_info(paymaster).await?.stake_info())
    }

    fn entry_point(&self) -> IEntryPoint<M> {
        IEntryPoint::new(self.entry_point, self.client.clone())
    }
}

/// Sends one transaction and waits for its receipt. No retries.
async fn send_and_confirm<M>(
    call: ContractCall<M, ()>,
    name: &str,
) -> Result<TransactionReceipt, GaslessError>
where
    M: Middleware + 'static,
{
    let pending = call
        .send()
        .await
        .map_err(|e| GaslessError::TransactionFailed(format!("{name} failed to send: {e}")))?;
    let receipt = pending
        .await
        .map_err(|e| GaslessError::Network(format!("{name} receipt lookup failed: {e}")))?
        .ok_or_else(|| GaslessError::TransactionFailed(format!("{name} was dropped")))?;

    if receipt.status != Some(U64::from(1)) {
        return Err(GaslessError::TransactionFailed(format!(
            "{name} reverted in {:?}",
            receipt.transaction_hash
        )));
    }
    Ok(receipt)
}
