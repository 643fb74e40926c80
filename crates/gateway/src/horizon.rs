//! Horizon REST client for Stellar ledger interaction
//!
//! Implements [`Ledger`] against a Horizon instance: account lookup,
//! transaction submission, payment-operation pages and memo lookup.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ledger::{
    AccountRecord, Ledger, LedgerError, PaymentOperation, ResultCodes, SubmitResponse,
    TransactionMemo,
};

/// Horizon client for production use
pub struct HorizonClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account_id: String,
    sequence: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(rename = "_embedded")]
    embedded: Embedded<T>,
}

#[derive(Debug, Deserialize)]
struct Embedded<T> {
    records: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    memo_type: String,
    #[serde(default)]
    memo: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Problem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    extras: Option<ProblemExtras>,
}

#[derive(Debug, Default, Deserialize)]
struct ProblemExtras {
    #[serde(default)]
    result_codes: ResultCodes,
}

impl HorizonClient {
    /// Create a new Horizon client
    ///
    /// # Arguments
    /// * `base_url` - Horizon root (e.g., "https://horizon-testnet.stellar.org")
    pub fn new(base_url: &str) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        info!("Using Horizon at {}", base_url);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn payments_page(
        &self,
        account_id: &str,
        order: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<PaymentOperation>, LedgerError> {
        let url = format!("{}/accounts/{}/payments", self.base_url, account_id);
        let limit = limit.to_string();

        let mut query = vec![("order", order), ("limit", limit.as_str())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        let response = self.client.get(&url).query(&query).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LedgerError::NotFound(account_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(LedgerError::Transport(format!(
                "payments request returned {}",
                response.status()
            )));
        }

        let page: Page<PaymentOperation> = response.json().await?;
        Ok(page.embedded.records)
    }
}

#[async_trait]
impl Ledger for HorizonClient {
    async fn load_account(&self, account_id: &str) -> Result<AccountRecord, LedgerError> {
        let url = format!("{}/accounts/{}", self.base_url, account_id);
        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LedgerError::NotFound(account_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(LedgerError::Transport(format!(
                "account request returned {}",
                response.status()
            )));
        }

        let account: AccountResponse = response.json().await?;
        let sequence = account
            .sequence
            .parse()
            .map_err(|_| LedgerError::Decode(format!("invalid sequence: {}", account.sequence)))?;

        debug!("Horizon: load_account({}) -> sequence {}", account_id, sequence);

        Ok(AccountRecord {
            account_id: account.account_id,
            sequence,
        })
    }

    async fn submit_transaction(&self, envelope: &str) -> Result<SubmitResponse, LedgerError> {
        let url = format!("{}/transactions", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[("tx", envelope)])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let submitted: SubmitResponse = response.json().await?;
            info!(
                "Horizon: transaction {} included in ledger {}",
                submitted.hash, submitted.ledger
            );
            return Ok(submitted);
        }

        if status.is_client_error() {
            let problem: Problem = response.json().await.unwrap_or_default();
            let codes = problem.extras.map(|e| e.result_codes).unwrap_or_default();
            warn!(
                "Horizon rejected transaction: {} ({:?})",
                problem.title, codes
            );
            return Err(LedgerError::Rejected {
                status: status.as_u16(),
                codes,
            });
        }

        Err(LedgerError::Transport(format!(
            "transaction submission returned {}",
            status
        )))
    }

    async fn payments(
        &self,
        account_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<PaymentOperation>, LedgerError> {
        let records = self.payments_page(account_id, "asc", cursor, limit).await?;
        debug!(
            "Horizon: payments({}, {:?}) -> {} records",
            account_id,
            cursor,
            records.len()
        );
        Ok(records)
    }

    async fn head_paging_token(&self, account_id: &str) -> Result<Option<String>, LedgerError> {
        let records = self.payments_page(account_id, "desc", None, 1).await?;
        Ok(records.into_iter().next().map(|op| op.paging_token))
    }

    async fn load_memo(
        &self,
        operation: &PaymentOperation,
    ) -> Result<Option<TransactionMemo>, LedgerError> {
        let url = format!("{}/transactions/{}", self.base_url, operation.transaction_hash);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(LedgerError::Transport(format!(
                "transaction request returned {}",
                response.status()
            )));
        }

        let transaction: TransactionResponse = response.json().await?;
        Ok(memo_from_response(transaction))
    }
}

fn memo_from_response(transaction: TransactionResponse) -> Option<TransactionMemo> {
    if transaction.memo_type == "none" {
        return None;
    }

    transaction.memo.map(|value| TransactionMemo {
        memo_type: transaction.memo_type,
        value,
    })
}
