// src/error.rs
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidSignature,
    InsufficientFunds,
    NetworkError,
    RelayerError,
    PaymasterError,
    TransactionFailed,
    InvalidNonce,
    ExpiredTransaction,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::NetworkError => "NETWORK_ERROR",
            Self::RelayerError => "RELAYER_ERROR",
            Self::PaymasterError => "PAYMASTER_ERROR",
            Self::TransactionFailed => "TRANSACTION_FAILED",
            Self::InvalidNonce => "INVALID_NONCE",
            Self::ExpiredTransaction => "EXPIRED_TRANSACTION",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum GaslessError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Relayer error: {0}")]
    Relayer(String),

    #[error("Paymaster error: {0}")]
    Paymaster(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Invalid nonce: expected {expected}, got {actual}")]
    InvalidNonce { expected: String, actual: String },

    #[error("Transaction expired: {0}")]
    ExpiredTransaction(String),
}

impl GaslessError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidSignature(_) => ErrorCode::InvalidSignature,
            Self::InsufficientFunds(_) => ErrorCode::InsufficientFunds,
            Self::Network(_) => ErrorCode::NetworkError,
            Self::Relayer(_) => ErrorCode::RelayerError,
            Self::Paymaster(_) => ErrorCode::PaymasterError,
            Self::TransactionFailed(_) => ErrorCode::TransactionFailed,
            Self::InvalidNonce { .. } => ErrorCode::InvalidNonce,
            Self::ExpiredTransaction(_) => ErrorCode::ExpiredTransaction,
        }
    }

    /// Errors caused by the caller's input rather than by this service or its
    /// upstreams.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSignature(_)
                | Self::Relayer(_)
                | Self::InvalidNonce { .. }
                | Self::ExpiredTransaction(_)
        )
    }
}

impl From<reqwest::Error> for GaslessError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Coarse categories shown to end users, derived from free-form error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFacingError {
    AdIncomplete,
    GasLimit,
    InsufficientFunds,
    Network,
    Unknown,
}

impl UserFacingError {
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        let mentions_ad = message
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| word == "ad" || word == "ads" || word == "advert");
        if mentions_ad && (message.contains("incomplete") || message.contains("not completed")) {
            Self::AdIncomplete
        } else if message.contains("gas") && (message.contains("limit") || message.contains("estimate")) {
            Self::GasLimit
        } else if message.contains("insufficient") || message.contains("balance") {
            Self::InsufficientFunds
        } else if message.contains("network")
            || message.contains("timeout")
            || message.contains("timed out")
            || message.contains("connection")
        {
            Self::Network
        } else {
            Self::Unknown
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::AdIncomplete => "Please finish watching the ad before sending.",
            Self::GasLimit => "The transaction needs more gas than can be sponsored.",
            Self::InsufficientFunds => "Insufficient balance for this transfer.",
            Self::Network => "Network problem, please try again.",
            Self::Unknown => "The transaction could not be completed.",
        }
    }
}

impl From<&GaslessError> for UserFacingError {
    fn from(e: &GaslessError) -> Self {
        match e.code() {
            ErrorCode::InsufficientFunds => Self::InsufficientFunds,
            ErrorCode::NetworkError => Self::Network,
            _ => Self::classify(&e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_upper_snake() {
        assert_eq!(
            GaslessError::Paymaster("x".into()).code().to_string(),
            "PAYMASTER_ERROR"
        );
        assert_eq!(
            GaslessError::InvalidNonce {
                expected: "1".into(),
                actual: "2".into()
            }
            .code(),
            ErrorCode::InvalidNonce
        );
    }

    #[test]
    fn classifies_by_keyword() {
        assert_eq!(
            UserFacingError::classify("Ad not completed yet"),
            UserFacingError::AdIncomplete
        );
        assert_eq!(
            UserFacingError::classify("exceeds block gas limit"),
            UserFacingError::GasLimit
        );
        assert_eq!(
            UserFacingError::classify("insufficient funds for transfer"),
            UserFacingError::InsufficientFunds
        );
        assert_eq!(
            UserFacingError::classify("request timed out"),
            UserFacingError::Network
        );
        assert_eq!(UserFacingError::classify("boom"), UserFacingError::Unknown);
    }

    #[test]
    fn structured_codes_win_over_keywords() {
        let e = GaslessError::Network("gas limit endpoint down".into());
        assert_eq!(UserFacingError::from(&e), UserFacingError::Network);
    }
}
