use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settled outcome of processing one ledger operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "Not a payment operation")]
    NotPayment,
    #[serde(rename = "Operation sent not received")]
    SentNotReceived,
    #[serde(rename = "Asset not allowed")]
    AssetNotAllowed,
    #[serde(rename = "Transaction does not have memo")]
    NoMemo,
    #[serde(rename = "Success")]
    Success,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::NotPayment => "Not a payment operation",
            PaymentStatus::SentNotReceived => "Operation sent not received",
            PaymentStatus::AssetNotAllowed => "Asset not allowed",
            PaymentStatus::NoMemo => "Transaction does not have memo",
            PaymentStatus::Success => "Success",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record, one per ledger operation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedPayment {
    /// Ledger-assigned operation id
    pub operation_id: String,

    /// When the outcome was settled
    pub processed_at: DateTime<Utc>,

    /// Stream cursor of the operation; the latest one is the resumption point
    pub paging_token: String,

    pub status: PaymentStatus,
}

impl ReceivedPayment {
    /// Create a new record stamped with the current time
    pub fn new(operation_id: String, paging_token: String, status: PaymentStatus) -> Self {
        Self {
            operation_id,
            processed_at: Utc::now(),
            paging_token,
            status,
        }
    }
}
