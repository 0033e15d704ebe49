// src/config.rs
use std::fmt;

use ethers::signers::LocalWallet;
use ethers::types::Address;
use tracing::{debug, warn};

use crate::error::GaslessError;
use crate::network::NetworkManager;

pub const SPONSOR_KEY_PREFIX: &str = "ADWALLET_SPONSOR_PK_";
pub const SPONSOR_CONTRACT_PREFIX: &str = "NEXT_PUBLIC_ADWALLET_CONTRACT_ADDR_";
pub const RPC_URL_PREFIX: &str = "RPC_URL_";

/// Relayer settings for one chain.
#[derive(Clone)]
pub struct RelayerChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub sponsor_key: String,
    pub contract: Address,
}

impl RelayerChainConfig {
    pub fn wallet(&self) -> Result<LocalWallet, GaslessError> {
        self.sponsor_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| {
                GaslessError::Relayer(format!(
                    "invalid sponsor key for chain {}: {e}",
                    self.chain_id
                ))
            })
    }
}

impl fmt::Debug for RelayerChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerChainConfig")
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("sponsor_key", &"<redacted>")
            .field("contract", &self.contract)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelayerConfig {
    pub chains: Vec<RelayerChainConfig>,
}

impl RelayerConfig {
    pub fn from_env(networks: &NetworkManager) -> Result<Self, GaslessError> {
        Self::from_lookup(networks, |key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`. A chain is enabled only when both its
    /// sponsor key and contract address are set; `RPC_URL_<id>` overrides the
    /// registry's RPC URL.
    pub fn from_lookup(
        networks: &NetworkManager,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, GaslessError> {
        let get = |prefix: &str, chain_id: u64| {
            lookup(&format!("{prefix}{chain_id}")).filter(|value| !value.trim().is_empty())
        };

        let mut chains = Vec::new();
        for network in networks.networks() {
            let chain_id = network.chain_id;
            let (sponsor_key, contract) = match (
                get(SPONSOR_KEY_PREFIX, chain_id),
                get(SPONSOR_CONTRACT_PREFIX, chain_id),
            ) {
                (Some(key), Some(contract)) => (key, contract),
                (None, None) => {
                    debug!("Relaying disabled on chain {}", chain_id);
                    continue;
                }
                _ => {
                    warn!(
                        "Chain {} needs both a sponsor key and a contract address; skipping",
                        chain_id
                    );
                    continue;
                }
            };
            let contract = contract.trim().parse::<Address>().map_err(|e| {
                GaslessError::Relayer(format!(
                    "invalid sponsor contract for chain {chain_id}: {e}"
                ))
            })?;
            let rpc_url =
                get(RPC_URL_PREFIX, chain_id).unwrap_or_else(|| network.rpc_url.clone());

            chains.push(RelayerChainConfig {
                chain_id,
                rpc_url,
                sponsor_key: sponsor_key.trim().to_string(),
                contract,
            });
        }
        Ok(Self { chains })
    }
}
