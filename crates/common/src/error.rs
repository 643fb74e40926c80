use thiserror::Error;

/// Reasons a transaction is rejected before it reaches the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Asset code length is invalid: {0}")]
    InvalidAssetCode(String),

    #[error("cannot parse amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid memo: {0}")]
    InvalidMemo(String),

    #[error("Invalid account id: {0}")]
    InvalidAccount(String),

    #[error("Transaction must contain between 1 and 100 operations, got {0}")]
    OperationCount(usize),

    #[error("Sequence number {0} does not fit the ledger sequence type")]
    SequenceOverflow(u64),

    #[error("Envelope encoding failed: {0}")]
    Encoding(String),
}

impl BuildError {
    /// Machine-readable code reported to API clients
    pub fn code(&self) -> &'static str {
        match self {
            BuildError::InvalidAssetCode(_) => "asset_code_invalid",
            BuildError::InvalidAmount(_) => "invalid_amount",
            BuildError::InvalidMemo(_) => "memo_invalid",
            BuildError::InvalidAccount(_) => "invalid_account",
            BuildError::OperationCount(_) => "invalid_operations",
            BuildError::SequenceOverflow(_) | BuildError::Encoding(_) => "transaction_build_failed",
        }
    }

    /// Whether the failure was caused by caller input rather than by the gateway
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            BuildError::SequenceOverflow(_) | BuildError::Encoding(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot initialize account {account}: {reason}")]
    AccountInit { account: String, reason: String },

    #[error("Transaction build error: {0}")]
    TransactionBuild(#[from] BuildError),

    #[error("Sequence conflict for account {account} at sequence {sequence}")]
    SequenceConflict { account: String, sequence: u64 },

    #[error("Transaction submission failed: {0}")]
    Submission(String),

    #[error("Cannot resolve address {address}: {reason}")]
    Resolution { address: String, reason: String },

    #[error("Account {0} is not managed by this gateway")]
    AccountNotManaged(String),

    #[error("Invalid secret seed")]
    InvalidSeed,
}

impl Error {
    /// Machine-readable code reported to API clients
    pub fn code(&self) -> &'static str {
        match self {
            Error::AccountInit { .. } => "source_not_exist",
            Error::TransactionBuild(e) => e.code(),
            Error::SequenceConflict { .. } => "sequence_conflict",
            Error::Submission(_) => "submission_failed",
            Error::Resolution { .. } => "invalid_destination",
            Error::AccountNotManaged(_) => "account_not_managed",
            Error::InvalidSeed => "invalid_source",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_codes() {
        assert_eq!(
            BuildError::InvalidAssetCode("TOOLONGASSETCODE".into()).code(),
            "asset_code_invalid"
        );
        assert_eq!(BuildError::InvalidAmount("abc".into()).code(), "invalid_amount");
        assert!(BuildError::InvalidMemo("too long".into()).is_client_error());
        assert!(!BuildError::Encoding("boom".into()).is_client_error());
    }

    #[test]
    fn test_error_code_delegates_to_build_error() {
        let err: Error = BuildError::InvalidAmount("1.123456789".into()).into();
        assert_eq!(err.code(), "invalid_amount");
    }
}
