// src/account.rs
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, Bytes, H256, U256};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::GaslessError;
use crate::paymaster::PaymasterService;
use crate::provider::ChainProvider;
use crate::types::{SubmitResult, UserOperation, UserOperationReceipt};
use crate::user_op::{calculate_user_operation_hash, entry_point_v06};
use crate::wallet::WalletInterface;

pub const DEFAULT_BUNDLER_URL_TEMPLATE: &str = "https://bundler.biconomy.io/api/v2/{chain_id}";

#[derive(Debug, Clone)]
pub struct AccountAbstractionConfig {
    pub entry_point: Address,
    /// Bundler endpoint with a `{chain_id}` placeholder.
    pub bundler_url_template: String,
    pub timeout: Duration,
}

impl Default for AccountAbstractionConfig {
    fn default() -> Self {
        Self {
            entry_point: entry_point_v06(),
            bundler_url_template: DEFAULT_BUNDLER_URL_TEMPLATE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

/// Builds, sponsors, hashes and submits ERC-4337 user operations.
pub struct AccountAbstraction {
    config: AccountAbstractionConfig,
    paymaster: Arc<PaymasterService>,
    http: Client,
}

impl AccountAbstraction {
    pub fn new(
        config: AccountAbstractionConfig,
        paymaster: Arc<PaymasterService>,
    ) -> Result<Self, GaslessError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GaslessError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            paymaster,
            http,
        })
    }

    pub fn entry_point(&self) -> Address {
        self.config.entry_point
    }

    pub fn bundler_url(&self, chain_id: u64) -> String {
        self.config
            .bundler_url_template
            .replace("{chain_id}", &chain_id.to_string())
    }

    /// Fills gas limits, fees and nonce for a fresh, unsponsored and unsigned
    /// operation. A failed nonce read falls back to zero.
    pub async fn create_user_operation(
        &self,
        sender: Address,
        call_data: Bytes,
        init_code: Bytes,
        chain_id: u64,
        provider: &dyn ChainProvider,
    ) -> Result<UserOperation, GaslessError> {
        let estimates = self
            .paymaster
            .get_gas_estimates(sender, call_data.clone(), init_code.clone(), chain_id)
            .await
            .map_err(|e| GaslessError::Paymaster(format!("failed to get gas estimates: {e}")))?;

        let fee_data = provider
            .fee_data()
            .await
            .map_err(|e| GaslessError::Paymaster(format!("failed to get fee data: {e:#}")))?;

        let nonce = match provider
            .get_nonce(self.config.entry_point, sender, U256::zero())
            .await
        {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!("Failed to read nonce for {:?}, using 0: {:#}", sender, e);
                U256::zero()
            }
        };

        debug!(
            "Created user operation for {:?} with nonce {} on chain {}",
            sender, nonce, chain_id
        );

        Ok(UserOperation {
            sender,
            nonce,
            init_code,
            call_data,
            call_gas_limit: estimates.call_gas_limit,
            verification_gas_limit: estimates.verification_gas_limit,
            pre_verification_gas: estimates.pre_verification_gas,
            max_fee_per_gas: fee_data.max_fee_per_gas.unwrap_or_default(),
            max_priority_fee_per_gas: fee_data.max_priority_fee_per_gas.unwrap_or_default(),
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
        })
    }

    /// Returns a copy of `user_op` carrying the paymaster's data and gas limits.
    pub async fn get_sponsored_user_operation(
        &self,
        user_op: &UserOperation,
        chain_id: u64,
    ) -> Result<UserOperation, GaslessError> {
        let sponsorship = self
            .paymaster
            .request_sponsorship(user_op, chain_id)
            .await
            .map_err(|e| match e {
                GaslessError::Paymaster(_) => e,
                other => GaslessError::Paymaster(other.to_string()),
            })?;

        Ok(UserOperation {
            paymaster_and_data: sponsorship.paymaster_and_data,
            pre_verification_gas: sponsorship.pre_verification_gas,
            verification_gas_limit: sponsorship.verification_gas_limit,
            call_gas_limit: sponsorship.call_gas_limit,
            ..user_op.clone()
        })
    }

    pub fn calculate_user_operation_hash(&self, user_op: &UserOperation, chain_id: u64) -> H256 {
        calculate_user_operation_hash(user_op, self.config.entry_point, chain_id)
    }

    /// Signs the operation hash with EIP-191 personal-sign.
    pub async fn sign_user_operation(
        &self,
        user_op: &UserOperation,
        chain_id: u64,
        wallet: &dyn WalletInterface,
    ) -> Result<UserOperation, GaslessError> {
        let hash = self.calculate_user_operation_hash(user_op, chain_id);
        let signature = wallet.sign_message(hash.as_bytes()).await?;
        Ok(UserOperation {
            signature: Bytes::from(signature.to_vec()),
            ..user_op.clone()
        })
    }

    /// `eth_sendUserOperation`. A JSON-RPC error is a failed transaction.
    pub async fn submit_user_operation(
        &self,
        user_op: &UserOperation,
        chain_id: u64,
        bundler_url: Option<&str>,
    ) -> Result<SubmitResult, GaslessError> {
        let url = bundler_url.map_or_else(|| self.bundler_url(chain_id), str::to_string);
        let response = self
            .rpc_call(
                &url,
                "eth_sendUserOperation",
                json!([user_op, self.config.entry_point]),
            )
            .await?;

        let user_op_hash = response
            .get("result")
            .cloned()
            .map(serde_json::from_value::<H256>)
            .transpose()
            .map_err(|e| GaslessError::TransactionFailed(format!("invalid userOpHash: {e}")))?
            .ok_or_else(|| {
                GaslessError::TransactionFailed("bundler returned no userOpHash".to_string())
            })?;

        info!("Submitted user operation {:?} on chain {}", user_op_hash, chain_id);
        Ok(SubmitResult {
            user_op_hash,
            bundler_response: response,
        })
    }

    /// One poll of `eth_getUserOperationReceipt`; `None` while the bundler does
    /// not know the operation or it is still pending.
    pub async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
        chain_id: u64,
        bundler_url: Option<&str>,
    ) -> Result<Option<UserOperationReceipt>, GaslessError> {
        let url = bundler_url.map_or_else(|| self.bundler_url(chain_id), str::to_string);
        let response = self
            .rpc_call(&url, "eth_getUserOperationReceipt", json!([user_op_hash]))
            .await?;

        match response.get("result") {
            None | Some(Value::Null) => Ok(None),
            Some(result) => serde_json::from_value(result.clone())
                .map(Some)
                .map_err(|e| GaslessError::TransactionFailed(format!("invalid receipt: {e}"))),
        }
    }

    async fn rpc_call(&self, url: &str, method: &str, params: Value) -> Result<Value, GaslessError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        let response = self.http.post(url).json(&request).send().await?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| GaslessError::Network(format!("bundler returned {status}: {e}")))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown bundler error");
            return Err(GaslessError::TransactionFailed(format!("{method}: {message}")));
        }
        Ok(body)
    }
}
