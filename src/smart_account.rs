// src/smart_account.rs
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{get_create2_address_from_hash, id, keccak256};

/// Counterfactual smart accounts deployed by a `createAccount(address,uint256)`
/// factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmartAccountFactory {
    pub factory: Address,
    /// keccak256 of the account creation code the factory deploys with CREATE2.
    pub account_init_code_hash: H256,
}

impl SmartAccountFactory {
    pub fn new(factory: Address, account_init_code_hash: H256) -> Self {
        Self {
            factory,
            account_init_code_hash,
        }
    }

    /// `initCode` for a user operation: factory address followed by the
    /// `createAccount(owner, salt)` call.
    pub fn init_code(&self, owner: Address, salt: U256) -> Bytes {
        let mut data = self.factory.as_bytes().to_vec();
        data.extend_from_slice(&id("createAccount(address,uint256)"));
        data.extend(encode(&[Token::Address(owner), Token::Uint(salt)]));
        Bytes::from(data)
    }

    /// CREATE2 salt: `keccak256(abi.encode(owner, salt))`.
    pub fn create2_salt(owner: Address, salt: U256) -> H256 {
        H256::from(keccak256(encode(&[Token::Address(owner), Token::Uint(salt)])))
    }

    pub fn counterfactual_address(&self, owner: Address, salt: U256) -> Address {
        get_create2_address_from_hash(
            self.factory,
            Self::create2_salt(owner, salt).as_bytes().to_vec(),
            self.account_init_code_hash.as_bytes().to_vec(),
        )
    }
}
