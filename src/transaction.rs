// src/transaction.rs
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, keccak256};

use crate::error::GaslessError;
use crate::types::{ForwardRequest, GaslessTransaction, NetworkConfig};

const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const FORWARD_REQUEST_TYPE: &str =
    "ForwardRequest(address from,address to,uint256 value,uint256 gas,uint256 nonce,bytes data)";

/// EIP-712 domain of a trusted forwarder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl ForwarderDomain {
    /// OpenZeppelin `MinimalForwarder` naming.
    pub fn minimal_forwarder(chain_id: u64, verifying_contract: Address) -> Self {
        Self {
            name: "MinimalForwarder".to_string(),
            version: "0.0.1".to_string(),
            chain_id,
            verifying_contract,
        }
    }

    pub fn separator(&self) -> H256 {
        H256::from(keccak256(encode(&[
            Token::FixedBytes(keccak256(EIP712_DOMAIN_TYPE).to_vec()),
            Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.verifying_contract),
        ])))
    }
}

/// `transfer(address,uint256)` call data.
pub fn erc20_transfer_call_data(to: Address, amount: U256) -> Bytes {
    let mut data = id("transfer(address,uint256)").to_vec();
    data.extend(encode(&[Token::Address(to), Token::Uint(amount)]));
    Bytes::from(data)
}

pub fn forward_request_struct_hash(request: &ForwardRequest) -> H256 {
    H256::from(keccak256(encode(&[
        Token::FixedBytes(keccak256(FORWARD_REQUEST_TYPE).to_vec()),
        Token::Address(request.from),
        Token::Address(request.to),
        Token::Uint(request.value),
        Token::Uint(request.gas),
        Token::Uint(request.nonce),
        Token::FixedBytes(keccak256(&request.data).to_vec()),
    ])))
}

/// `keccak256(0x1901 ‖ domainSeparator ‖ structHash)`.
pub fn forward_request_digest(request: &ForwardRequest, domain: &ForwarderDomain) -> H256 {
    let mut message = Vec::with_capacity(66);
    message.extend_from_slice(&[0x19, 0x01]);
    message.extend_from_slice(domain.separator().as_bytes());
    message.extend_from_slice(forward_request_struct_hash(request).as_bytes());
    H256::from(keccak256(message))
}

/// Builds meta-transactions for a network's trusted forwarder.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    network: NetworkConfig,
    domain: ForwarderDomain,
}

impl TransactionBuilder {
    pub fn new(network: NetworkConfig) -> Result<Self, GaslessError> {
        let forwarder = network.forwarder_address.ok_or_else(|| {
            GaslessError::Network(format!(
                "network {} has no forwarder configured",
                network.chain_id
            ))
        })?;
        let domain = ForwarderDomain::minimal_forwarder(network.chain_id, forwarder);
        Ok(Self { network, domain })
    }

    pub fn with_domain(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.domain.name = name.into();
        self.domain.version = version.into();
        self
    }

    pub fn domain(&self) -> &ForwarderDomain {
        &self.domain
    }

    pub fn build(&self, request: ForwardRequest) -> GaslessTransaction {
        let digest = forward_request_digest(&request, &self.domain);
        GaslessTransaction {
            request,
            chain_id: self.network.chain_id,
            forwarder: self.domain.verifying_contract,
            digest,
        }
    }

    /// An ERC-20 transfer of `amount` base units of `token_symbol` to `to`.
    pub fn build_token_transfer(
        &self,
        from: Address,
        token_symbol: &str,
        to: Address,
        amount: U256,
        gas: U256,
        nonce: U256,
    ) -> Result<GaslessTransaction, GaslessError> {
        let token = self
            .network
            .gas_tokens
            .iter()
            .find(|token| token.symbol.eq_ignore_ascii_case(token_symbol))
            .ok_or_else(|| {
                GaslessError::Relayer(format!(
                    "token {token_symbol} is not supported on chain {}",
                    self.network.chain_id
                ))
            })?;

        Ok(self.build(ForwardRequest {
            from,
            to: token.address,
            value: U256::zero(),
            gas,
            nonce,
            data: erc20_transfer_call_data(to, amount),
        }))
    }
}
