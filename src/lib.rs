// src/lib.rs
//! Gasless transactions: ERC-4337 user operations sponsored by paymasters,
//! and a relayer that pays gas for signed token transfers.

pub mod account;
pub mod config;
pub mod contracts;
pub mod error;
pub mod logging;
pub mod network;
pub mod paymaster;
pub mod provider;
pub mod relayer;
pub mod rpc;
pub mod signature;
pub mod smart_account;
pub mod transaction;
pub mod types;
pub mod user_op;
pub mod wallet;

pub use account::{AccountAbstraction, AccountAbstractionConfig};
pub use error::{ErrorCode, GaslessError, UserFacingError};
pub use network::NetworkManager;
pub use paymaster::{
    Paymaster, PaymasterFactory, PaymasterManager, PaymasterService, TokenPaymaster,
};
pub use provider::{ChainProvider, EthersProvider};
pub use relayer::Relayer;
pub use types::UserOperation;
pub use wallet::WalletInterface;
