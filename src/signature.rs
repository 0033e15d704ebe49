// src/signature.rs
use ethers::types::{Address, Signature, H256};

use crate::error::GaslessError;

/// Address and signature checks for gasless requests.
pub struct SignatureValidator;

impl SignatureValidator {
    /// `0x` followed by exactly 40 hex characters.
    pub fn is_valid_address(value: &str) -> bool {
        value.len() == 42
            && value.starts_with("0x")
            && value[2..].chars().all(|c| c.is_ascii_hexdigit())
    }

    pub fn parse_signature(signature: &str) -> Result<Signature, GaslessError> {
        let bytes = hex::decode(signature.trim_start_matches("0x"))
            .map_err(|e| GaslessError::InvalidSignature(format!("signature is not hex: {e}")))?;
        Signature::try_from(bytes.as_slice())
            .map_err(|e| GaslessError::InvalidSignature(format!("malformed signature: {e}")))
    }

    /// Signer of an EIP-191 personal message.
    pub fn recover_signer(message: &[u8], signature: &str) -> Result<Address, GaslessError> {
        Self::parse_signature(signature)?
            .recover(message)
            .map_err(|e| GaslessError::InvalidSignature(e.to_string()))
    }

    /// Signer of a raw digest (EIP-712 or a user operation hash).
    pub fn recover_typed_signer(digest: H256, signature: &str) -> Result<Address, GaslessError> {
        Self::parse_signature(signature)?
            .recover(digest)
            .map_err(|e| GaslessError::InvalidSignature(e.to_string()))
    }

    pub fn verify_signature(
        message: &[u8],
        signature: &str,
        expected: Address,
    ) -> Result<bool, GaslessError> {
        Ok(Self::recover_signer(message, signature)? == expected)
    }

    pub fn verify_typed_signature(
        digest: H256,
        signature: &str,
        expected: Address,
    ) -> Result<bool, GaslessError> {
        Ok(Self::recover_typed_signer(digest, signature)? == expected)
    }
}
