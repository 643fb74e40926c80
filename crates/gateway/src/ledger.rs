//! Ledger client contract
//!
//! The gateway talks to the network through the [`Ledger`] trait. The
//! production implementation is [`crate::horizon::HorizonClient`]; the
//! in-memory [`crate::mock_ledger::MockLedger`] backs mock mode and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transaction result code the ledger returns when the submitted sequence
/// number is not `current + 1`
pub const BAD_SEQUENCE_CODE: &str = "tx_bad_seq";

/// Account state as seen on the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub account_id: String,
    pub sequence: u64,
}

/// Result codes attached to a rejected transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCodes {
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub operations: Vec<String>,
}

/// Successful submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub hash: String,
    pub ledger: u64,
    #[serde(default)]
    pub envelope_xdr: Option<String>,
    #[serde(default)]
    pub result_xdr: Option<String>,
}

/// One record of the account's payment-operation stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOperation {
    pub id: String,
    pub paging_token: String,
    #[serde(rename = "type")]
    pub operation_type: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub asset_code: Option<String>,
    #[serde(default)]
    pub asset_issuer: Option<String>,
    #[serde(default)]
    pub transaction_hash: String,
}

impl PaymentOperation {
    pub fn is_payment(&self) -> bool {
        self.operation_type == "payment"
    }

    pub fn is_native(&self) -> bool {
        self.asset_type.as_deref() == Some("native")
            || (self.asset_code.is_none() && self.asset_issuer.is_none())
    }
}

/// Memo attached to the transaction that carried an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMemo {
    pub memo_type: String,
    pub value: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Transaction rejected (status {status}): {codes:?}")]
    Rejected { status: u16, codes: ResultCodes },

    #[error("Ledger request failed: {0}")]
    Transport(String),

    #[error("Unexpected ledger response: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Whether the ledger refused the transaction because of its sequence number
    pub fn is_bad_sequence(&self) -> bool {
        matches!(
            self,
            LedgerError::Rejected { codes, .. }
                if codes.transaction.as_deref() == Some(BAD_SEQUENCE_CODE)
        )
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LedgerError::Decode(err.to_string())
        } else {
            LedgerError::Transport(err.to_string())
        }
    }
}

/// Network operations the gateway depends on
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Load an account and its current sequence number
    async fn load_account(&self, account_id: &str) -> Result<AccountRecord, LedgerError>;

    /// Submit a base64-encoded, signed transaction envelope
    async fn submit_transaction(&self, envelope: &str) -> Result<SubmitResponse, LedgerError>;

    /// Fetch the next page of payment operations for `account_id`, in stream
    /// order, strictly after `cursor` (from the beginning when `None`)
    async fn payments(
        &self,
        account_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<PaymentOperation>, LedgerError>;

    /// Paging token of the newest operation for `account_id`, if any
    async fn head_paging_token(&self, account_id: &str) -> Result<Option<String>, LedgerError>;

    /// Load the memo of the transaction that carried `operation`
    async fn load_memo(
        &self,
        operation: &PaymentOperation,
    ) -> Result<Option<TransactionMemo>, LedgerError>;
}
