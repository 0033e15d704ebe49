// src/user_op.rs
use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

use crate::types::{UserOperation, ValidationData};

/// Canonical EntryPoint v0.6 deployment.
pub const ENTRY_POINT_V06: &str = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789";

pub fn entry_point_v06() -> Address {
    ENTRY_POINT_V06.parse().unwrap_or_default()
}

/// EntryPoint v0.6 `getUserOpHash`:
/// `keccak256(abi.encode(keccak256(pack(op)), entryPoint, chainId))`, where
/// `pack` hashes initCode, callData and paymasterAndData and leaves out the
/// signature.
pub fn calculate_user_operation_hash(
    user_op: &UserOperation,
    entry_point: Address,
    chain_id: u64,
) -> H256 {
    let packed = encode(&[
        Token::Address(user_op.sender),
        Token::Uint(user_op.nonce),
        Token::FixedBytes(keccak256(&user_op.init_code).to_vec()),
        Token::FixedBytes(keccak256(&user_op.call_data).to_vec()),
        Token::Uint(user_op.call_gas_limit),
        Token::Uint(user_op.verification_gas_limit),
        Token::Uint(user_op.pre_verification_gas),
        Token::Uint(user_op.max_fee_per_gas),
        Token::Uint(user_op.max_priority_fee_per_gas),
        Token::FixedBytes(keccak256(&user_op.paymaster_and_data).to_vec()),
    ]);

    let encoded = encode(&[
        Token::FixedBytes(keccak256(packed).to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ]);
    H256::from(keccak256(encoded))
}

const UINT48_MASK: u64 = 0xffff_ffff_ffff;

impl ValidationData {
    /// Splits a packed `validationData` word: authorizer in the low 160 bits,
    /// `valid_after` in bits 160..208 and `valid_until` in bits 208..256.
    pub fn unpack(data: U256) -> Self {
        let mut word = [0u8; 32];
        data.to_big_endian(&mut word);
        Self {
            authorizer: Address::from_slice(&word[12..]),
            valid_after: (data >> 160).low_u64() & UINT48_MASK,
            valid_until: (data >> 208).low_u64() & UINT48_MASK,
        }
    }

    pub fn pack(&self) -> U256 {
        let authorizer = U256::from_big_endian(self.authorizer.as_bytes());
        authorizer
            | (U256::from(self.valid_after & UINT48_MASK) << 160)
            | (U256::from(self.valid_until & UINT48_MASK) << 208)
    }
}

/// Best-effort call target: the first 20 bytes of the call data, selector
/// included. Only meaningful for call shapes that start with the target
/// address; returns `None` when the call data is shorter than an address.
pub fn call_data_target(call_data: &[u8]) -> Option<Address> {
    (call_data.len() >= 20).then(|| Address::from_slice(&call_data[..20]))
}
