// src/wallet.rs
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, H256};

use crate::error::GaslessError;

/// The signer side of a user's wallet.
#[async_trait]
pub trait WalletInterface: Send + Sync {
    async fn get_address(&self) -> Result<Address, GaslessError>;

    /// EIP-191 personal-sign over `message`.
    async fn sign_message(&self, message: &[u8]) -> Result<Signature, GaslessError>;

    /// Signs an already computed EIP-712 digest.
    async fn sign_typed_data(&self, digest: H256) -> Result<Signature, GaslessError>;

    async fn get_chain_id(&self) -> Result<u64, GaslessError>;
}

#[async_trait]
impl WalletInterface for LocalWallet {
    async fn get_address(&self) -> Result<Address, GaslessError> {
        Ok(self.address())
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, GaslessError> {
        Signer::sign_message(self, message)
            .await
            .map_err(|e| GaslessError::InvalidSignature(e.to_string()))
    }

    async fn sign_typed_data(&self, digest: H256) -> Result<Signature, GaslessError> {
        self.sign_hash(digest)
            .map_err(|e| GaslessError::InvalidSignature(e.to_string()))
    }

    async fn get_chain_id(&self) -> Result<u64, GaslessError> {
        Ok(self.chain_id())
    }
}
