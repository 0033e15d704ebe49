// src/network.rs
use std::collections::BTreeMap;

use ethers::types::Address;
use tracing::{debug, info};

use crate::error::GaslessError;
use crate::types::{GasToken, NetworkConfig};

pub const MAINNET: u64 = 1;
pub const SEPOLIA: u64 = 11_155_111;
pub const POLYGON: u64 = 137;
pub const BASE: u64 = 8_453;

/// Registry of known networks keyed by chain id, with exactly one current.
#[derive(Debug, Clone)]
pub struct NetworkManager {
    networks: BTreeMap<u64, NetworkConfig>,
    current: u64,
}

impl NetworkManager {
    pub fn new(
        networks: impl IntoIterator<Item = NetworkConfig>,
        current: u64,
    ) -> Result<Self, GaslessError> {
        let networks: BTreeMap<u64, NetworkConfig> = networks
            .into_iter()
            .map(|network| (network.chain_id, network))
            .collect();
        if !networks.contains_key(&current) {
            return Err(GaslessError::Network(format!(
                "current chain {current} is not in the network list"
            )));
        }
        Ok(Self { networks, current })
    }

    /// Ethereum, Sepolia, Polygon and Base on public RPC endpoints, Ethereum
    /// current.
    pub fn with_defaults() -> Self {
        let networks = default_networks()
            .into_iter()
            .map(|network| (network.chain_id, network))
            .collect();
        Self {
            networks,
            current: MAINNET,
        }
    }

    /// Inserts a network, replacing any existing entry with the same chain id.
    pub fn add_network(&mut self, network: NetworkConfig) {
        let chain_id = network.chain_id;
        if self.networks.insert(chain_id, network).is_some() {
            debug!("Replaced network config for chain {}", chain_id);
        } else {
            info!("Added network {}", chain_id);
        }
    }

    /// Removes a network. The current network can never be removed.
    pub fn remove_network(&mut self, chain_id: u64) -> Result<NetworkConfig, GaslessError> {
        if chain_id == self.current {
            return Err(GaslessError::Network(format!(
                "cannot remove current network {chain_id}"
            )));
        }
        self.networks
            .remove(&chain_id)
            .ok_or_else(|| GaslessError::Network(format!("unknown network {chain_id}")))
    }

    pub fn switch_network(&mut self, chain_id: u64) -> Result<&NetworkConfig, GaslessError> {
        if !self.networks.contains_key(&chain_id) {
            return Err(GaslessError::Network(format!(
                "unsupported network {chain_id}"
            )));
        }
        self.current = chain_id;
        info!("Switched to network {}", chain_id);
        Ok(&self.networks[&chain_id])
    }

    pub fn current_chain_id(&self) -> u64 {
        self.current
    }

    pub fn current_network(&self) -> &NetworkConfig {
        // `current` is always a key: `new` checks it, `remove_network` refuses it
        // and `switch_network` only moves to existing keys.
        &self.networks[&self.current]
    }

    pub fn network(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.get(&chain_id)
    }

    pub fn networks(&self) -> impl Iterator<Item = &NetworkConfig> {
        self.networks.values()
    }

    pub fn is_supported(&self, chain_id: u64) -> bool {
        self.networks.contains_key(&chain_id)
    }

    /// Case-insensitive lookup of a gas token by symbol.
    pub fn gas_token(&self, chain_id: u64, symbol: &str) -> Option<&GasToken> {
        self.networks
            .get(&chain_id)?
            .gas_tokens
            .iter()
            .find(|token| token.symbol.eq_ignore_ascii_case(symbol))
    }
}

impl Default for NetworkManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn token(symbol: &str, address: &str, decimals: u8) -> GasToken {
    GasToken {
        symbol: symbol.to_string(),
        address: address.parse::<Address>().unwrap_or_default(),
        decimals,
    }
}

fn default_networks() -> Vec<NetworkConfig> {
    vec![
        NetworkConfig {
            chain_id: MAINNET,
            name: "Ethereum".to_string(),
            rpc_url: "https://eth.llamarpc.com".to_string(),
            relayer_url: None,
            paymaster_address: None,
            forwarder_address: None,
            gas_tokens: vec![
                token("USDC", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 6),
                token("USDT", "0xdAC17F958D2ee523a2206206994597C13D831ec7", 6),
            ],
        },
        NetworkConfig {
            chain_id: SEPOLIA,
            name: "Sepolia".to_string(),
            rpc_url: "https://rpc.sepolia.org".to_string(),
            relayer_url: None,
            paymaster_address: None,
            forwarder_address: None,
            gas_tokens: vec![token(
                "USDC",
                "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238",
                6,
            )],
        },
        NetworkConfig {
            chain_id: POLYGON,
            name: "Polygon".to_string(),
            rpc_url: "https://polygon-rpc.com".to_string(),
            relayer_url: None,
            paymaster_address: None,
            forwarder_address: None,
            gas_tokens: vec![token(
                "USDC",
                "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
                6,
            )],
        },
        NetworkConfig {
            chain_id: BASE,
            name: "Base".to_string(),
            rpc_url: "https://mainnet.base.org".to_string(),
            relayer_url: None,
            paymaster_address: None,
            forwarder_address: None,
            gas_tokens: vec![token(
                "USDC",
                "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                6,
            )],
        },
    ]
}
