// src/types.rs
use std::fmt;

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An ERC-4337 v0.6 user operation.
///
/// Numeric fields accept decimal strings, `0x` hex strings or JSON numbers and
/// serialize as hex quantities, which is what bundlers expect.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    #[serde(deserialize_with = "flexible_u256::deserialize")]
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    #[serde(deserialize_with = "flexible_u256::deserialize")]
    pub call_gas_limit: U256,
    #[serde(deserialize_with = "flexible_u256::deserialize")]
    pub verification_gas_limit: U256,
    #[serde(deserialize_with = "flexible_u256::deserialize")]
    pub pre_verification_gas: U256,
    #[serde(deserialize_with = "flexible_u256::deserialize")]
    pub max_fee_per_gas: U256,
    #[serde(deserialize_with = "flexible_u256::deserialize")]
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// callGasLimit + verificationGasLimit + preVerificationGas, `None` on overflow.
    pub fn total_gas(&self) -> Option<U256> {
        sum_gas(
            self.call_gas_limit,
            self.verification_gas_limit,
            self.pre_verification_gas,
        )
    }

    pub fn is_sponsored(&self) -> bool {
        !self.paymaster_and_data.is_empty()
    }
}

/// The same operation with every number as a decimal string, used on the
/// paymaster HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUserOperation {
    pub sender: Address,
    #[serde(with = "decimal_u256")]
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    #[serde(with = "decimal_u256")]
    pub call_gas_limit: U256,
    #[serde(with = "decimal_u256")]
    pub verification_gas_limit: U256,
    #[serde(with = "decimal_u256")]
    pub pre_verification_gas: U256,
    #[serde(with = "decimal_u256")]
    pub max_fee_per_gas: U256,
    #[serde(with = "decimal_u256")]
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl From<&UserOperation> for WireUserOperation {
    fn from(op: &UserOperation) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.init_code.clone(),
            call_data: op.call_data.clone(),
            call_gas_limit: op.call_gas_limit,
            verification_gas_limit: op.verification_gas_limit,
            pre_verification_gas: op.pre_verification_gas,
            max_fee_per_gas: op.max_fee_per_gas,
            max_priority_fee_per_gas: op.max_priority_fee_per_gas,
            paymaster_and_data: op.paymaster_and_data.clone(),
            signature: op.signature.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasToken {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relayer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paymaster_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarder_address: Option<Address>,
    #[serde(default)]
    pub gas_tokens: Vec<GasToken>,
}

/// Sponsorship rules attached to a registered paymaster.
///
/// `time_window`, `max_operations_per_time_window` and `require_whitelist` are
/// carried for callers but not enforced by compliance checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterPolicy {
    #[serde(with = "decimal_u256")]
    pub sponsorship_limit: U256,
    pub time_window: u64,
    pub max_operations_per_time_window: u64,
    #[serde(default)]
    pub allowed_targets: Option<Vec<Address>>,
    #[serde(default)]
    pub blocked_targets: Option<Vec<Address>>,
    #[serde(default)]
    pub require_whitelist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPaymasterConfig {
    pub token_address: Address,
    pub token_decimals: u8,
    /// Tokens per ETH, scaled by 1e18.
    #[serde(with = "decimal_u256")]
    pub exchange_rate: U256,
    #[serde(with = "decimal_u256")]
    pub min_balance: U256,
    #[serde(with = "decimal_u256")]
    pub max_gas_price: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterStakeInfo {
    #[serde(with = "decimal_u256")]
    pub stake: U256,
    pub unstake_delay_sec: u32,
    pub withdraw_time: u64,
}

/// Full EntryPoint deposit record for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositInfo {
    #[serde(with = "decimal_u256")]
    pub deposit: U256,
    pub staked: bool,
    #[serde(with = "decimal_u256")]
    pub stake: U256,
    pub unstake_delay_sec: u32,
    pub withdraw_time: u64,
}

/// EntryPoint `deposits(address)` return values.
impl From<(u128, bool, u128, u32, u64)> for DepositInfo {
    fn from(
        (deposit, staked, stake, unstake_delay_sec, withdraw_time): (u128, bool, u128, u32, u64),
    ) -> Self {
        Self {
            deposit: U256::from(deposit),
            staked,
            stake: U256::from(stake),
            unstake_delay_sec,
            withdraw_time,
        }
    }
}

impl DepositInfo {
    pub fn stake_info(&self) -> PaymasterStakeInfo {
        PaymasterStakeInfo {
            stake: self.stake,
            unstake_delay_sec: self.unstake_delay_sec,
            withdraw_time: self.withdraw_time,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimates {
    #[serde(with = "decimal_u256")]
    pub pre_verification_gas: U256,
    #[serde(with = "decimal_u256")]
    pub verification_gas_limit: U256,
    #[serde(with = "decimal_u256")]
    pub call_gas_limit: U256,
}

impl GasEstimates {
    pub fn total_gas(&self) -> Option<U256> {
        sum_gas(
            self.call_gas_limit,
            self.verification_gas_limit,
            self.pre_verification_gas,
        )
    }
}

/// Checked sum of the three gas limits of an operation.
fn sum_gas(call: U256, verification: U256, pre_verification: U256) -> Option<U256> {
    call.checked_add(verification)?.checked_add(pre_verification)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimateRequest {
    pub sender: Address,
    pub call_data: Bytes,
    pub init_code: Bytes,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipRequest {
    pub user_operation: WireUserOperation,
    pub chain_id: u64,
    pub entry_point: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorshipResponse {
    pub paymaster_and_data: Bytes,
    #[serde(with = "decimal_u256")]
    pub pre_verification_gas: U256,
    #[serde(with = "decimal_u256")]
    pub verification_gas_limit: U256,
    #[serde(with = "decimal_u256")]
    pub call_gas_limit: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanSponsorRequest {
    pub sender: Address,
    pub call_data: Bytes,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanSponsorResponse {
    pub can_sponsor: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CanSponsorResponse {
    pub fn approved() -> Self {
        Self {
            can_sponsor: true,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            can_sponsor: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterStatus {
    pub status: String,
    #[serde(default, with = "option_decimal_u256")]
    pub balance: Option<U256>,
    #[serde(default)]
    pub supported_chains: Vec<u64>,
}

/// Fee data as reported by the chain. Missing values mean the chain did not
/// provide them (e.g. a pre-London chain has no base fee).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeData {
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

/// Unpacked `validationData` returned by `validatePaymasterUserOp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationData {
    pub valid_after: u64,
    pub valid_until: u64,
    pub authorizer: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    #[serde(default)]
    pub entry_point: Option<Address>,
    pub sender: Address,
    #[serde(deserialize_with = "flexible_u256::deserialize")]
    pub nonce: U256,
    #[serde(default)]
    pub paymaster: Option<Address>,
    #[serde(deserialize_with = "flexible_u256::deserialize")]
    pub actual_gas_cost: U256,
    #[serde(deserialize_with = "flexible_u256::deserialize")]
    pub actual_gas_used: U256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub logs: Vec<serde_json::Value>,
    #[serde(default)]
    pub receipt: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub user_op_hash: H256,
    pub bundler_response: serde_json::Value,
}

/// EIP-2771 forward request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    pub from: Address,
    pub to: Address,
    #[serde(with = "decimal_u256")]
    pub value: U256,
    #[serde(with = "decimal_u256")]
    pub gas: U256,
    #[serde(with = "decimal_u256")]
    pub nonce: U256,
    pub data: Bytes,
}

/// A forward request ready to be signed and handed to a relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaslessTransaction {
    pub request: ForwardRequest,
    pub chain_id: u64,
    pub forwarder: Address,
    pub digest: H256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayTransferRequest {
    pub from: Address,
    pub to: Address,
    /// Token amount in whole-token units, e.g. `"1.5"`.
    pub amount: String,
    pub token_symbol: String,
    pub chain_id: u64,
    pub signature: Bytes,
    #[serde(deserialize_with = "flexible_u256::deserialize")]
    pub nonce: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayTransferResponse {
    pub tx_hash: H256,
}

/// Parses a decimal or `0x`-prefixed hex string into a `U256`.
pub fn parse_u256(value: &str) -> Result<U256, String> {
    let value = value.trim();
    if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        if hex.is_empty() {
            return Ok(U256::zero());
        }
        U256::from_str_radix(hex, 16).map_err(|e| format!("invalid hex number {value}: {e}"))
    } else {
        U256::from_dec_str(value).map_err(|e| format!("invalid decimal number {value}: {e}"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

impl NumberOrString {
    fn into_u256(self) -> Result<U256, String> {
        match self {
            Self::Number(n) => Ok(U256::from(n)),
            Self::String(s) => parse_u256(&s),
        }
    }
}

pub mod flexible_u256 {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        NumberOrString::deserialize(deserializer)?
            .into_u256()
            .map_err(serde::de::Error::custom)
    }
}

pub mod decimal_u256 {
    use super::*;

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<U256, D::Error>
    where
        D: Deserializer<'de>,
    {
        flexible_u256::deserialize(deserializer)
    }
}

pub mod option_decimal_u256 {
    use super::*;

    pub fn serialize<S>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<NumberOrString>::deserialize(deserializer)?
            .map(NumberOrString::into_u256)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for GasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.symbol, self.address)
    }
}
