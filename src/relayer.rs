// src/relayer.rs
mod sponsor;
mod usage;

pub use sponsor::{AdWalletSponsorContract, SponsorContract, SponsoredTransfer};
pub use usage::{DailyUsage, FileUsageStore, MemoryUsageStore, UsageStore, DAILY_LIMIT};

#[cfg(test)]
pub use sponsor::MockSponsorContract;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use ethers::types::{Address, U256};
use ethers::utils::parse_units;
use tracing::{debug, info, warn};

use crate::error::GaslessError;
use crate::network::NetworkManager;
use crate::types::{GasToken, RelayTransferRequest, RelayTransferResponse};

const SIGNATURE_LENGTH: usize = 65;

/// Pays gas for token transfers through a per-chain sponsor contract, capped
/// at `daily_limit` transfers per sender per UTC day.
pub struct Relayer {
    networks: NetworkManager,
    sponsors: HashMap<u64, Arc<dyn SponsorContract>>,
    usage: Arc<dyn UsageStore>,
    daily_limit: u32,
}

impl Relayer {
    pub fn new(networks: NetworkManager, usage: Arc<dyn UsageStore>) -> Self {
        Self {
            networks,
            sponsors: HashMap::new(),
            usage,
            daily_limit: DAILY_LIMIT,
        }
    }

    pub fn with_daily_limit(mut self, daily_limit: u32) -> Self {
        self.daily_limit = daily_limit;
        self
    }

    /// Enables relaying on `chain_id` through `sponsor`.
    pub fn add_sponsor(&mut self, chain_id: u64, sponsor: Arc<dyn SponsorContract>) {
        self.sponsors.insert(chain_id, sponsor);
    }

    pub fn enabled_chains(&self) -> Vec<u64> {
        let mut chains: Vec<_> = self.sponsors.keys().copied().collect();
        chains.sort_unstable();
        chains
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    pub async fn relay_transfer(
        &self,
        request: RelayTransferRequest,
    ) -> Result<RelayTransferResponse, GaslessError> {
        self.relay_transfer_on(request, Utc::now().date_naive()).await
    }

    /// Relays `request`, counting it against the sender's usage for `day`.
    pub async fn relay_transfer_on(
        &self,
        request: RelayTransferRequest,
        day: NaiveDate,
    ) -> Result<RelayTransferResponse, GaslessError> {
        let (sponsor, token, amount) = self.validate(&request)?;

        let used = self
            .usage
            .try_consume(request.from, day, self.daily_limit)
            .await
            .map_err(|e| GaslessError::Network(format!("usage store unavailable: {e}")))?;
        let Some(used) = used else {
            warn!("Daily limit reached for {:?}", request.from);
            return Err(GaslessError::Relayer(format!(
                "daily limit of {} sponsored transfers reached",
                self.daily_limit
            )));
        };
        debug!(
            "Sponsored transfer {}/{} today for {:?}",
            used, self.daily_limit, request.from
        );

        match self.execute(sponsor, &request, token.address, amount).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if let Err(refund) = self.usage.refund(request.from, day).await {
                    warn!("Failed to refund usage for {:?}: {}", request.from, refund);
                }
                Err(e)
            }
        }
    }

    fn validate<'a>(
        &'a self,
        request: &RelayTransferRequest,
    ) -> Result<(&'a Arc<dyn SponsorContract>, &'a GasToken, U256), GaslessError> {
        if request.from.is_zero() || request.to.is_zero() {
            return Err(GaslessError::Relayer(
                "from and to must be non-zero addresses".to_string(),
            ));
        }
        let sponsor = self.sponsors.get(&request.chain_id).ok_or_else(|| {
            GaslessError::Relayer(format!(
                "relaying is not enabled on chain {}",
                request.chain_id
            ))
        })?;
        let token = self
            .networks
            .gas_token(request.chain_id, &request.token_symbol)
            .ok_or_else(|| {
                GaslessError::Relayer(format!(
                    "unsupported token {} on chain {}",
                    request.token_symbol, request.chain_id
                ))
            })?;
        let amount = parse_amount(&request.amount, token.decimals)?;
        if request.signature.len() != SIGNATURE_LENGTH {
            return Err(GaslessError::InvalidSignature(format!(
                "expected {SIGNATURE_LENGTH} bytes, got {}",
                request.signature.len()
            )));
        }
        Ok((sponsor, token, amount))
    }

    async fn execute(
        &self,
        sponsor: &Arc<dyn SponsorContract>,
        request: &RelayTransferRequest,
        token: Address,
        amount: U256,
    ) -> Result<RelayTransferResponse, GaslessError> {
        let on_chain = sponsor
            .nonce_of(request.from)
            .await
            .map_err(|e| GaslessError::Network(format!("failed to read nonce: {e}")))?;
        if on_chain != request.nonce {
            return Err(GaslessError::InvalidNonce {
                expected: on_chain.to_string(),
                actual: request.nonce.to_string(),
            });
        }

        let tx_hash = sponsor
            .execute_sponsored_transfer(SponsoredTransfer {
                token,
                from: request.from,
                to: request.to,
                amount,
                nonce: request.nonce,
                signature: request.signature.clone(),
            })
            .await
            .map_err(|e| GaslessError::TransactionFailed(e.to_string()))?;

        info!(
            "Relayed {} {} from {:?} to {:?} in {:?}",
            request.amount, request.token_symbol, request.from, request.to, tx_hash
        );
        Ok(RelayTransferResponse { tx_hash })
    }
}

/// Converts a decimal amount in whole-token units into base units.
pub fn parse_amount(amount: &str, decimals: u8) -> Result<U256, GaslessError> {
    let amount = amount.trim();
    if amount.is_empty() || amount.starts_with('-') {
        return Err(GaslessError::Relayer(format!("invalid amount {amount:?}")));
    }
    let parsed = parse_units(amount, u32::from(decimals))
        .map_err(|e| GaslessError::Relayer(format!("invalid amount {amount:?}: {e}")))?;
    let value = U256::from(parsed);
    if value.is_zero() {
        return Err(GaslessError::Relayer("amount must be positive".to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::MAINNET;
    use ethers::types::{Bytes, H256};
    use mockall::predicate::eq;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn request(nonce: u64) -> RelayTransferRequest {
        RelayTransferRequest {
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            amount: "1.5".to_string(),
            token_symbol: "usdc".to_string(),
            chain_id: MAINNET,
            signature: Bytes::from(vec![0x1b; SIGNATURE_LENGTH]),
            nonce: U256::from(nonce),
        }
    }

    fn relayer(sponsor: MockSponsorContract, usage: Arc<dyn UsageStore>) -> Relayer {
        let mut relayer = Relayer::new(NetworkManager::with_defaults(), usage);
        relayer.add_sponsor(MAINNET, Arc::new(sponsor));
        relayer
    }

    #[tokio::test]
    async fn fifth_transfer_succeeds_and_sixth_is_rejected() {
        let mut sponsor = MockSponsorContract::new();
        sponsor
            .expect_nonce_of()
            .times(DAILY_LIMIT as usize)
            .returning(|_| Ok(U256::zero()));
        sponsor
            .expect_execute_sponsored_transfer()
            .times(DAILY_LIMIT as usize)
            .returning(|_| Ok(H256::repeat_byte(0xaa)));
        let relayer = relayer(sponsor, Arc::new(MemoryUsageStore::new()));

        for _ in 0..DAILY_LIMIT {
            let response = relayer.relay_transfer_on(request(0), day()).await.unwrap();
            assert_eq!(response.tx_hash, H256::repeat_byte(0xaa));
        }

        let err = relayer.relay_transfer_on(request(0), day()).await.unwrap_err();
        assert!(matches!(err, GaslessError::Relayer(ref msg) if msg.contains("daily limit")));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn sends_token_amount_in_base_units() {
        let mut sponsor = MockSponsorContract::new();
        sponsor
            .expect_nonce_of()
            .with(eq(Address::repeat_byte(0x11)))
            .returning(|_| Ok(U256::from(3)));
        sponsor
            .expect_execute_sponsored_transfer()
            .withf(|transfer| {
                transfer.amount == U256::from(1_500_000u64)
                    && transfer.nonce == U256::from(3)
                    && transfer.to == Address::repeat_byte(0x22)
                    && transfer.token
                        == "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
                            .parse::<Address>()
                            .unwrap()
            })
            .returning(|_| Ok(H256::repeat_byte(0x01)));
        let relayer = relayer(sponsor, Arc::new(MemoryUsageStore::new()));

        relayer.relay_transfer_on(request(3), day()).await.unwrap();
    }

    #[tokio::test]
    async fn nonce_mismatch_refunds_the_slot() {
        let mut sponsor = MockSponsorContract::new();
        sponsor.expect_nonce_of().returning(|_| Ok(U256::from(7)));
        sponsor.expect_execute_sponsored_transfer().never();
        let usage = Arc::new(MemoryUsageStore::new());
        let relayer = relayer(sponsor, usage.clone());

        let err = relayer.relay_transfer_on(request(6), day()).await.unwrap_err();
        match err {
            GaslessError::InvalidNonce { expected, actual } => {
                assert_eq!(expected, "7");
                assert_eq!(actual, "6");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(usage.usage(Address::repeat_byte(0x11), day()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_transfer_refunds_the_slot() {
        let mut sponsor = MockSponsorContract::new();
        sponsor.expect_nonce_of().returning(|_| Ok(U256::zero()));
        sponsor
            .expect_execute_sponsored_transfer()
            .returning(|_| Err(anyhow::anyhow!("execution reverted")));
        let usage = Arc::new(MemoryUsageStore::new());
        let relayer = relayer(sponsor, usage.clone());

        let err = relayer.relay_transfer_on(request(0), day()).await.unwrap_err();
        assert!(matches!(err, GaslessError::TransactionFailed(_)));
        assert!(!err.is_client_error());
        assert_eq!(usage.usage(Address::repeat_byte(0x11), day()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_requests_without_touching_chain() {
        let mut sponsor = MockSponsorContract::new();
        sponsor.expect_nonce_of().never();
        sponsor.expect_execute_sponsored_transfer().never();
        let usage = Arc::new(MemoryUsageStore::new());
        let relayer = relayer(sponsor, usage.clone());

        let mut unknown_token = request(0);
        unknown_token.token_symbol = "DOGE".to_string();
        let mut unknown_chain = request(0);
        unknown_chain.chain_id = 999;
        let mut bad_amount = request(0);
        bad_amount.amount = "-1".to_string();
        let mut zero_to = request(0);
        zero_to.to = Address::zero();

        for invalid in [unknown_token, unknown_chain, bad_amount, zero_to] {
            let err = relayer.relay_transfer_on(invalid, day()).await.unwrap_err();
            assert!(matches!(err, GaslessError::Relayer(_)), "{err}");
        }

        let mut short_signature = request(0);
        short_signature.signature = Bytes::from(vec![1, 2, 3]);
        let err = relayer
            .relay_transfer_on(short_signature, day())
            .await
            .unwrap_err();
        assert!(matches!(err, GaslessError::InvalidSignature(_)));

        assert_eq!(usage.usage(Address::repeat_byte(0x11), day()).await.unwrap(), 0);
    }

    #[test]
    fn amount_parsing() {
        assert_eq!(parse_amount("1.5", 6).unwrap(), U256::from(1_500_000u64));
        assert_eq!(
            parse_amount("2", 18).unwrap(),
            U256::from(2_000_000_000_000_000_000u128)
        );
        assert!(parse_amount("0", 6).is_err());
        assert!(parse_amount("abc", 6).is_err());
        assert!(parse_amount("", 6).is_err());
    }
}
