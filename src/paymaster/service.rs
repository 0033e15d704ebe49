// src/paymaster/service.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::GaslessError;
use crate::paymaster::Paymaster;
use crate::provider::{ChainProvider, PostOpMode};
use crate::types::{
    CanSponsorRequest, CanSponsorResponse, DepositInfo, GasEstimateRequest, GasEstimates,
    PaymasterStakeInfo, PaymasterStatus, SponsorshipRequest, SponsorshipResponse, UserOperation,
    ValidationData, WireUserOperation,
};
use crate::user_op::{calculate_user_operation_hash, entry_point_v06};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PaymasterServiceConfig {
    /// Root of the sponsorship backend, e.g. `https://paymaster.example.com`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub paymaster_address: Address,
    pub entry_point: Address,
    /// Chain the on-chain paymaster contract lives on.
    pub chain_id: u64,
    pub timeout: Duration,
}

impl PaymasterServiceConfig {
    pub fn new(base_url: impl Into<String>, paymaster_address: Address, chain_id: u64) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            paymaster_address,
            entry_point: entry_point_v06(),
            chain_id,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// Client of the sponsorship backend plus the paymaster's on-chain hooks.
pub struct PaymasterService {
    http: Client,
    config: PaymasterServiceConfig,
    chain: Arc<dyn ChainProvider>,
}

impl PaymasterService {
    pub fn new(
        config: PaymasterServiceConfig,
        chain: Arc<dyn ChainProvider>,
    ) -> Result<Self, GaslessError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GaslessError::Network(format!("failed to build HTTP client: {e}")))?;

        info!(
            "Initialized paymaster service for {:?} at {}",
            config.paymaster_address, config.base_url
        );

        Ok(Self {
            http,
            config,
            chain,
        })
    }

    pub fn config(&self) -> &PaymasterServiceConfig {
        &self.config
    }

    pub fn chain(&self) -> &Arc<dyn ChainProvider> {
        &self.chain
    }

    pub async fn sponsor_transaction(
        &self,
        request: &SponsorshipRequest,
    ) -> Result<SponsorshipResponse, GaslessError> {
        debug!(
            "Requesting sponsorship for sender {:?} on chain {}",
            request.user_operation.sender, request.chain_id
        );
        self.post("/api/v1/sponsor", request).await
    }

    pub async fn request_sponsorship(
        &self,
        user_op: &UserOperation,
        chain_id: u64,
    ) -> Result<SponsorshipResponse, GaslessError> {
        let request = SponsorshipRequest {
            user_operation: WireUserOperation::from(user_op),
            chain_id,
            entry_point: self.config.entry_point,
        };
        self.sponsor_transaction(&request).await
    }

    /// Never fails: transport and backend errors come back as a denial.
    pub async fn check_can_sponsor(
        &self,
        sender: Address,
        call_data: Bytes,
        chain_id: u64,
    ) -> CanSponsorResponse {
        let request = CanSponsorRequest {
            sender,
            call_data,
            chain_id,
        };
        match self
            .post::<_, CanSponsorResponse>("/api/v1/can-sponsor", &request)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("can-sponsor check failed for {:?}: {}", sender, e);
                CanSponsorResponse::denied(format!("sponsorship check failed: {e}"))
            }
        }
    }

    pub async fn get_gas_estimates(
        &self,
        sender: Address,
        call_data: Bytes,
        init_code: Bytes,
        chain_id: u64,
    ) -> Result<GasEstimates, GaslessError> {
        let request = GasEstimateRequest {
            sender,
            call_data,
            init_code,
            chain_id,
        };
        self.post("/api/v1/gas-estimates", &request).await
    }

    pub async fn get_status(&self) -> Result<PaymasterStatus, GaslessError> {
        let request = self.http.get(self.url("/api/v1/status"));
        self.send(request).await
    }

    /// Calls the paymaster's `validatePaymasterUserOp` as the EntryPoint would.
    pub async fn validate_paymaster_user_op(
        &self,
        user_op: &UserOperation,
        max_cost: U256,
    ) -> Result<(Bytes, ValidationData), GaslessError> {
        let user_op_hash =
            calculate_user_operation_hash(user_op, self.config.entry_point, self.config.chain_id);
        let (context, validation_data) = self
            .chain
            .validate_paymaster_user_op(
                self.config.paymaster_address,
                self.config.entry_point,
                user_op.clone(),
                user_op_hash,
                max_cost,
            )
            .await
            .map_err(|e| GaslessError::Paymaster(format!("validatePaymasterUserOp failed: {e:#}")))?;

        Ok((context, ValidationData::unpack(validation_data)))
    }

    /// Fire-and-forget `postOp`. Failures are logged, never returned.
    pub async fn post_op(&self, mode: PostOpMode, context: Bytes, actual_gas_cost: U256) {
        if let Err(e) = self
            .chain
            .post_op(self.config.paymaster_address, mode, context, actual_gas_cost)
            .await
        {
            warn!(
                "postOp on paymaster {:?} failed: {:#}",
                self.config.paymaster_address, e
            );
        }
    }

    pub async fn get_deposit_info(&self) -> Result<DepositInfo, GaslessError> {
        self.chain
            .get_deposit_info(self.config.entry_point, self.config.paymaster_address)
            .await
            .map_err(|e| GaslessError::Network(format!("failed to read deposit info: {e:#}")))
    }

    pub async fn get_stake_info(&self) -> Result<PaymasterStakeInfo, GaslessError> {
        Ok(self.get_deposit_info().await?.stake_info())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, GaslessError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.http.post(self.url(path)).json(body);
        self.send(request).await
    }

    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, GaslessError> {
        let request = match &self.config.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        };
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GaslessError::Paymaster(format!(
                "paymaster backend returned {status}: {body}"
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| GaslessError::Paymaster(format!("invalid paymaster response: {e}")))
    }
}

#[async_trait]
impl Paymaster for PaymasterService {
    fn address(&self) -> Address {
        self.config.paymaster_address
    }

    async fn can_sponsor(
        &self,
        sender: Address,
        call_data: Bytes,
        chain_id: u64,
    ) -> Result<CanSponsorResponse, GaslessError> {
        Ok(self.check_can_sponsor(sender, call_data, chain_id).await)
    }

    async fn sponsor(
        &self,
        user_op: UserOperation,
        chain_id: u64,
    ) -> Result<SponsorshipResponse, GaslessError> {
        self.request_sponsorship(&user_op, chain_id).await
    }
}
