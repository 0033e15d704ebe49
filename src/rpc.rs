// src/rpc.rs
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::error::{ErrorObject, ErrorObjectOwned, INVALID_PARAMS_CODE};
use tracing::{debug, error, info, warn};

use crate::error::GaslessError;
use crate::relayer::Relayer;
use crate::types::{RelayTransferRequest, RelayTransferResponse};

pub const SERVER_ERROR_CODE: i32 = -32000;

#[rpc(server, namespace = "relay")]
pub trait RelayRpc {
    /// Relays a signed token transfer through the chain's sponsor contract.
    #[method(name = "transfer")]
    async fn transfer(&self, request: RelayTransferRequest) -> RpcResult<RelayTransferResponse>;
}

pub struct RelayRpcImpl {
    relayer: Arc<Relayer>,
}

impl RelayRpcImpl {
    pub fn new(relayer: Arc<Relayer>) -> Self {
        Self { relayer }
    }
}

#[async_trait]
impl RelayRpcServer for RelayRpcImpl {
    async fn transfer(&self, request: RelayTransferRequest) -> RpcResult<RelayTransferResponse> {
        debug!(
            "Received relay request from {:?} on chain {}",
            request.from, request.chain_id
        );
        let from = request.from;

        match self.relayer.relay_transfer(request).await {
            Ok(response) => {
                info!("Relayed transfer for {:?}: {:?}", from, response.tx_hash);
                Ok(response)
            }
            Err(e) => {
                if e.is_client_error() {
                    warn!("Rejected relay request from {:?}: {}", from, e);
                } else {
                    error!("Relay failed for {:?}: {}", from, e);
                }
                Err(to_rpc_error(&e))
            }
        }
    }
}

/// Caller mistakes map to invalid params, everything else to a server error.
pub fn to_rpc_error(e: &GaslessError) -> ErrorObjectOwned {
    let code = if e.is_client_error() {
        INVALID_PARAMS_CODE
    } else {
        SERVER_ERROR_CODE
    };
    ErrorObject::owned(code, e.to_string(), Some(e.code().as_str()))
}
