// src/paymaster/token.rs
use std::sync::RwLock;

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, U256};
use tracing::{debug, info, warn};

use crate::error::GaslessError;
use crate::paymaster::{Paymaster, PaymasterService};
use crate::types::{CanSponsorResponse, SponsorshipResponse, TokenPaymasterConfig, UserOperation};

/// Prices gas in an ERC-20 token.
#[derive(Debug)]
pub struct TokenPricingPolicy {
    config: RwLock<TokenPaymasterConfig>,
}

impl TokenPricingPolicy {
    pub fn new(config: TokenPaymasterConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn token_config(&self) -> TokenPaymasterConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn update_token_config(&self, config: TokenPaymasterConfig) {
        info!(
            "Updating token paymaster config for token {:?}",
            config.token_address
        );
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
    }

    /// `gas_limit * max_gas_price * exchange_rate / 1e18`.
    pub fn required_tokens(&self, gas_limit: U256) -> Result<U256, GaslessError> {
        let config = self.token_config();
        gas_limit
            .checked_mul(config.max_gas_price)
            .and_then(|cost| cost.checked_mul(config.exchange_rate))
            .map(|scaled| scaled / U256::exp10(18))
            .ok_or_else(|| GaslessError::Paymaster("token cost calculation overflow".to_string()))
    }
}

/// Sponsors operations in exchange for ERC-20 tokens the user has approved to
/// the paymaster.
pub struct TokenPaymaster {
    service: PaymasterService,
    pricing: TokenPricingPolicy,
}

impl TokenPaymaster {
    pub fn new(service: PaymasterService, config: TokenPaymasterConfig) -> Self {
        Self {
            service,
            pricing: TokenPricingPolicy::new(config),
        }
    }

    pub fn service(&self) -> &PaymasterService {
        &self.service
    }

    pub fn pricing(&self) -> &TokenPricingPolicy {
        &self.pricing
    }

    pub fn token_config(&self) -> TokenPaymasterConfig {
        self.pricing.token_config()
    }

    pub fn update_token_config(&self, config: TokenPaymasterConfig) {
        self.pricing.update_token_config(config)
    }

    /// True only when both the balance and the allowance to the paymaster
    /// cover the token cost of `gas_limit`. Read failures count as false.
    pub async fn check_token_balance(&self, user: Address, gas_limit: U256) -> bool {
        let required = match self.pricing.required_tokens(gas_limit) {
            Ok(required) => required,
            Err(e) => {
                warn!("Cannot price {} gas in tokens: {}", gas_limit, e);
                return false;
            }
        };
        let token = self.pricing.token_config().token_address;
        let chain = self.service.chain();

        let balance = match chain.token_balance(token, user).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!("Failed to read token balance of {:?}: {:#}", user, e);
                return false;
            }
        };
        let allowance = match chain
            .token_allowance(token, user, self.service.config().paymaster_address)
            .await
        {
            Ok(allowance) => allowance,
            Err(e) => {
                warn!("Failed to read token allowance of {:?}: {:#}", user, e);
                return false;
            }
        };

        debug!(
            "Token check for {:?}: required {}, balance {}, allowance {}",
            user, required, balance, allowance
        );
        balance >= required && allowance >= required
    }

    async fn meets_min_balance(&self, user: Address) -> Result<bool, GaslessError> {
        let config = self.pricing.token_config();
        let balance = self
            .service
            .chain()
            .token_balance(config.token_address, user)
            .await
            .map_err(|e| GaslessError::Network(format!("failed to read token balance: {e:#}")))?;
        Ok(balance >= config.min_balance)
    }

    /// Builds `paymasterAndData` locally: paymaster ‖ token ‖ uint256(max token cost).
    pub async fn request_sponsorship(
        &self,
        user_op: &UserOperation,
    ) -> Result<SponsorshipResponse, GaslessError> {
        let config = self.pricing.token_config();
        if user_op.max_fee_per_gas > config.max_gas_price {
            return Err(GaslessError::Paymaster(format!(
                "maxFeePerGas {} exceeds token paymaster ceiling {}",
                user_op.max_fee_per_gas, config.max_gas_price
            )));
        }

        let total_gas = user_op
            .total_gas()
            .ok_or_else(|| GaslessError::Paymaster("gas limit overflow".to_string()))?;
        let required = self.pricing.required_tokens(total_gas)?;

        if !self.check_token_balance(user_op.sender, total_gas).await {
            return Err(GaslessError::InsufficientFunds(format!(
                "{:?} needs {} of token {:?} approved to the paymaster",
                user_op.sender, required, config.token_address
            )));
        }

        let mut data = Vec::with_capacity(72);
        data.extend_from_slice(self.service.config().paymaster_address.as_bytes());
        data.extend_from_slice(config.token_address.as_bytes());
        data.extend_from_slice(&encode(&[Token::Uint(required)]));

        Ok(SponsorshipResponse {
            paymaster_and_data: Bytes::from(data),
            pre_verification_gas: user_op.pre_verification_gas,
            verification_gas_limit: user_op.verification_gas_limit,
            call_gas_limit: user_op.call_gas_limit,
        })
    }
}

#[async_trait]
impl Paymaster for TokenPaymaster {
    fn address(&self) -> Address {
        self.service.config().paymaster_address
    }

    async fn can_sponsor(
        &self,
        sender: Address,
        call_data: Bytes,
        chain_id: u64,
    ) -> Result<CanSponsorResponse, GaslessError> {
        let estimates = match self
            .service
            .get_gas_estimates(sender, call_data, Bytes::default(), chain_id)
            .await
        {
            Ok(estimates) => estimates,
            Err(e) => return Ok(CanSponsorResponse::denied(format!("gas estimate failed: {e}"))),
        };
        let Some(total_gas) = estimates.total_gas() else {
            return Ok(CanSponsorResponse::denied("gas estimate overflow"));
        };

        match self.meets_min_balance(sender).await {
            Ok(true) => {}
            Ok(false) => return Ok(CanSponsorResponse::denied("token balance below minimum")),
            Err(e) => return Ok(CanSponsorResponse::denied(e.to_string())),
        }

        if self.check_token_balance(sender, total_gas).await {
            Ok(CanSponsorResponse::approved())
        } else {
            Ok(CanSponsorResponse::denied(
                "insufficient token balance or allowance",
            ))
        }
    }

    async fn sponsor(
        &self,
        user_op: UserOperation,
        _chain_id: u64,
    ) -> Result<SponsorshipResponse, GaslessError> {
        self.request_sponsorship(&user_op).await
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ErrorCode;
    use crate::paymaster::service::tests::{paymaster_address, service};
    use crate::provider::MockChainProvider;

    fn token() -> Address {
        "0x00000000000000000000000000000000000000c0".parse().unwrap()
    }

    fn user() -> Address {
        "0x00000000000000000000000000000000000000b0".parse().unwrap()
    }

    // 1 gwei ceiling, 2000 tokens per ETH: required = gas * 2e12
    fn config() -> TokenPaymasterConfig {
        TokenPaymasterConfig {
            token_address: token(),
            token_decimals: 18,
            exchange_rate: U256::from(2_000u64) * U256::exp10(18),
            min_balance: U256::from(1_000),
            max_gas_price: U256::exp10(9),
        }
    }

    fn chain_with(balance: U256, allowance: U256) -> MockChainProvider {
        let mut chain = MockChainProvider::new();
        chain
            .expect_token_balance()
            .with(eq(token()), eq(user()))
            .returning(move |_, _| Ok(balance));
        chain
            .expect_token_allowance()
            .with(eq(token()), eq(user()), eq(paymaster_address()))
            .returning(move |_, _, _| Ok(allowance));
        chain
    }

    #[test]
    fn prices_gas_in_tokens() {
        let pricing = TokenPricingPolicy::new(config());
        assert_eq!(
            pricing.required_tokens(U256::from(100_000)).unwrap(),
            U256::from(100_000u64) * U256::from(2_000_000_000_000u64)
        );
    }

    #[test]
    fn pricing_overflow_is_an_error() {
        let pricing = TokenPricingPolicy::new(config());
        assert!(pricing.required_tokens(U256::MAX).is_err());
    }

    #[test]
    fn update_is_visible_to_next_price() {
        let pricing = TokenPricingPolicy::new(config());
        let mut updated = config();
        updated.exchange_rate = U256::exp10(18);
        pricing.update_token_config(updated);
        assert_eq!(
            pricing.required_tokens(U256::from(10)).unwrap(),
            U256::from(10u64) * U256::exp10(9)
        );
    }

    #[tokio::test]
    async fn balance_check_needs_both_balance_and_allowance() {
        let server = MockServer::start().await;
        let gas = U256::from(100_000);
        let required = U256::from(100_000u64) * U256::from(2_000_000_000_000u64);
        let short = required - 1;

        let cases = [
            (required, required, true),
            (short, required, false),
            (required, short, false),
            (short, short, false),
        ];
        for (balance, allowance, expected) in cases {
            let paymaster = TokenPaymaster::new(service(&server, chain_with(balance, allowance)), config());
            assert_eq!(
                paymaster.check_token_balance(user(), gas).await,
                expected,
                "balance {balance}, allowance {allowance}"
            );
        }
    }

    #[tokio::test]
    async fn read_failure_denies() {
        let server = MockServer::start().await;
        let mut chain = MockChainProvider::new();
        chain
            .expect_token_balance()
            .returning(|_, _| Err(anyhow::anyhow!("rpc down")));
        let paymaster = TokenPaymaster::new(service(&server, chain), config());
        assert!(!paymaster.check_token_balance(user(), U256::from(1)).await);
    }

    #[tokio::test]
    async fn sponsorship_encodes_token_cost() {
        let server = MockServer::start().await;
        let paymaster = TokenPaymaster::new(
            service(&server, chain_with(U256::MAX, U256::MAX)),
            config(),
        );
        let user_op = UserOperation {
            sender: user(),
            call_gas_limit: U256::from(50_000),
            verification_gas_limit: U256::from(40_000),
            pre_verification_gas: U256::from(10_000),
            max_fee_per_gas: U256::exp10(9),
            ..Default::default()
        };

        let response = paymaster.sponsor(user_op, 1).await.unwrap();
        let data = &response.paymaster_and_data[..];
        assert_eq!(data.len(), 72);
        assert_eq!(&data[..20], paymaster_address().as_bytes());
        assert_eq!(&data[20..40], token().as_bytes());
        assert_eq!(
            U256::from_big_endian(&data[40..]),
            U256::from(100_000u64) * U256::from(2_000_000_000_000u64)
        );
        assert_eq!(response.call_gas_limit, U256::from(50_000));
    }

    #[tokio::test]
    async fn sponsorship_rejects_expensive_gas() {
        let server = MockServer::start().await;
        let paymaster = TokenPaymaster::new(service(&server, MockChainProvider::new()), config());
        let user_op = UserOperation {
            sender: user(),
            max_fee_per_gas: U256::exp10(9) + 1,
            ..Default::default()
        };

        let err = paymaster.request_sponsorship(&user_op).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PaymasterError);
    }

    #[tokio::test]
    async fn sponsorship_without_allowance_is_insufficient_funds() {
        let server = MockServer::start().await;
        let paymaster = TokenPaymaster::new(
            service(&server, chain_with(U256::MAX, U256::zero())),
            config(),
        );
        let user_op = UserOperation {
            sender: user(),
            call_gas_limit: U256::from(1),
            max_fee_per_gas: U256::one(),
            ..Default::default()
        };

        let err = paymaster.request_sponsorship(&user_op).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientFunds);
    }

    #[tokio::test]
    async fn can_sponsor_uses_backend_estimates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/gas-estimates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "preVerificationGas": "10000",
                "verificationGasLimit": "40000",
                "callGasLimit": "50000"
            })))
            .mount(&server)
            .await;
        let required = U256::from(100_000u64) * U256::from(2_000_000_000_000u64);

        let paymaster = TokenPaymaster::new(service(&server, chain_with(required, required)), config());
        let approved = paymaster.can_sponsor(user(), Bytes::default(), 1).await.unwrap();
        assert!(approved.can_sponsor);

        let paymaster = TokenPaymaster::new(
            service(&server, chain_with(required, required - 1)),
            config(),
        );
        let denied = paymaster.can_sponsor(user(), Bytes::default(), 1).await.unwrap();
        assert!(!denied.can_sponsor);
    }

    #[tokio::test]
    async fn can_sponsor_respects_min_balance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/gas-estimates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "preVerificationGas": "0",
                "verificationGasLimit": "0",
                "callGasLimit": "0"
            })))
            .mount(&server)
            .await;

        let paymaster = TokenPaymaster::new(
            service(&server, chain_with(U256::from(999), U256::MAX)),
            config(),
        );
        let response = paymaster.can_sponsor(user(), Bytes::default(), 1).await.unwrap();
        assert!(!response.can_sponsor);
        assert_eq!(response.reason.as_deref(), Some("token balance below minimum"));
    }
}
