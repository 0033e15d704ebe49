// src/paymaster.rs
use async_trait::async_trait;
use ethers::types::{Address, Bytes};
#[cfg(test)]
use mockall::automock;

use crate::error::GaslessError;
use crate::types::{CanSponsorResponse, SponsorshipResponse, UserOperation};

pub mod factory;
pub mod manager;
pub mod service;
pub mod token;

pub use factory::PaymasterFactory;
pub use manager::{PaymasterManager, SelectedPaymaster};
pub use service::{PaymasterService, PaymasterServiceConfig};
pub use token::{TokenPaymaster, TokenPricingPolicy};

/// Anything that can sponsor a user operation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Paymaster: Send + Sync {
    fn address(&self) -> Address;

    /// Eligibility pre-check. Denials are `Ok` with `can_sponsor == false`.
    async fn can_sponsor(
        &self,
        sender: Address,
        call_data: Bytes,
        chain_id: u64,
    ) -> Result<CanSponsorResponse, GaslessError>;

    async fn sponsor(
        &self,
        user_op: UserOperation,
        chain_id: u64,
    ) -> Result<SponsorshipResponse, GaslessError>;
}
