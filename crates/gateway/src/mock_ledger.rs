//! Mock ledger for development and testing
//!
//! Simulates a Stellar network in memory. Submissions are decoded and must
//! carry `current sequence + 1`, exactly as the real ledger enforces.
//! Accepted transactions append their operations to the payment stream, so a
//! payment sent through the gateway to the monitored account is observed by
//! the listener.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use gateway_common::encode_account_id;
use std::collections::HashMap;
use std::sync::Mutex;
use stellar_xdr::curr::{
    AccountId, AlphaNum12, AlphaNum4, Asset, Memo, MuxedAccount, OperationBody, PublicKey,
    Uint256,
};
use tracing::debug;

use crate::builder::{format_amount, inspect_envelope, EnvelopeSummary};
use crate::ledger::{
    AccountRecord, Ledger, LedgerError, PaymentOperation, ResultCodes, SubmitResponse,
    TransactionMemo, BAD_SEQUENCE_CODE,
};

/// A transaction accepted by the mock ledger
#[derive(Debug, Clone)]
pub struct SubmittedTransaction {
    pub source: String,
    pub sequence: u64,
    pub envelope: String,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, u64>,
    operations: Vec<PaymentOperation>,
    memos: HashMap<String, TransactionMemo>,
    submitted: Vec<SubmittedTransaction>,
    ledger: u64,
    memo_failures: usize,
    stream_failures: usize,
    rejections: HashMap<String, String>,
}

/// Mock Stellar ledger
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<State>,
}

impl MockLedger {
    /// Create an empty mock ledger
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create (or reset) an account with the given sequence number
    pub fn create_account(&self, account_id: &str, sequence: u64) {
        self.state().accounts.insert(account_id.to_string(), sequence);
    }

    /// Current sequence number of an account
    pub fn sequence(&self, account_id: &str) -> Option<u64> {
        self.state().accounts.get(account_id).copied()
    }

    /// Advance an account's sequence outside the gateway (another submitter)
    pub fn bump_sequence(&self, account_id: &str, by: u64) {
        if let Some(sequence) = self.state().accounts.get_mut(account_id) {
            *sequence += by;
        }
    }

    /// Append an operation to the payment stream
    pub fn push_operation(&self, operation: PaymentOperation) {
        self.state().operations.push(operation);
    }

    /// Attach a memo to a transaction hash
    pub fn set_memo(&self, transaction_hash: &str, memo_type: &str, value: &str) {
        self.state().memos.insert(
            transaction_hash.to_string(),
            TransactionMemo {
                memo_type: memo_type.to_string(),
                value: value.to_string(),
            },
        );
    }

    /// Make the next `count` memo lookups fail
    pub fn fail_memo_lookups(&self, count: usize) {
        self.state().memo_failures = count;
    }

    /// Make the next `count` stream page fetches fail
    pub fn fail_stream_fetches(&self, count: usize) {
        self.state().stream_failures = count;
    }

    /// Reject every submission from `account_id` with a transaction result code
    pub fn reject_submissions(&self, account_id: &str, code: &str) {
        self.state()
            .rejections
            .insert(account_id.to_string(), code.to_string());
    }

    /// Transactions accepted so far, in order
    pub fn submitted(&self) -> Vec<SubmittedTransaction> {
        self.state().submitted.clone()
    }
}

impl State {
    fn next_paging_token(&self) -> u64 {
        self.operations
            .last()
            .and_then(|op| op.paging_token.parse::<u64>().ok())
            .unwrap_or(0)
            + 1
    }

    /// Append the transaction's operations to the stream and record its memo
    fn apply(&mut self, summary: &EnvelopeSummary, hash: &str) {
        let transaction = &summary.transaction;

        if let Some(memo) = memo_record(&transaction.memo) {
            self.memos.insert(hash.to_string(), memo);
        }

        for operation in transaction.operations.iter() {
            let token = self.next_paging_token();
            let mut record = PaymentOperation {
                id: token.to_string(),
                paging_token: token.to_string(),
                from: Some(summary.source.clone()),
                transaction_hash: hash.to_string(),
                ..Default::default()
            };

            match &operation.body {
                OperationBody::Payment(payment) => {
                    let (asset_type, asset_code, asset_issuer) = asset_fields(&payment.asset);
                    record.operation_type = "payment".to_string();
                    record.to = Some(muxed_address(&payment.destination));
                    record.amount = Some(format_amount(payment.amount));
                    record.asset_type = Some(asset_type.to_string());
                    record.asset_code = asset_code;
                    record.asset_issuer = asset_issuer;
                }
                OperationBody::CreateAccount(create) => {
                    let destination = account_address(&create.destination);
                    self.accounts.entry(destination.clone()).or_insert(0);
                    record.operation_type = "create_account".to_string();
                    record.to = Some(destination);
                    record.amount = Some(format_amount(create.starting_balance));
                }
                other => {
                    record.operation_type = other.name().to_string();
                }
            }

            self.operations.push(record);
        }
    }
}

fn account_address(account: &AccountId) -> String {
    let AccountId(PublicKey::PublicKeyTypeEd25519(Uint256(key))) = account;
    encode_account_id(*key)
}

fn muxed_address(account: &MuxedAccount) -> String {
    match account {
        MuxedAccount::Ed25519(Uint256(key)) => encode_account_id(*key),
        MuxedAccount::MuxedEd25519(muxed) => encode_account_id(muxed.ed25519.0),
    }
}

fn asset_fields(asset: &Asset) -> (&'static str, Option<String>, Option<String>) {
    let code = |bytes: &[u8]| {
        String::from_utf8_lossy(bytes)
            .trim_end_matches('\0')
            .to_string()
    };
    match asset {
        Asset::Native => ("native", None, None),
        Asset::CreditAlphanum4(AlphaNum4 { asset_code, issuer }) => (
            "credit_alphanum4",
            Some(code(asset_code.0.as_slice())),
            Some(account_address(issuer)),
        ),
        Asset::CreditAlphanum12(AlphaNum12 { asset_code, issuer }) => (
            "credit_alphanum12",
            Some(code(asset_code.0.as_slice())),
            Some(account_address(issuer)),
        ),
    }
}

/// Memo as reported by Horizon (hash memos are base64)
fn memo_record(memo: &Memo) -> Option<TransactionMemo> {
    let (memo_type, value) = match memo {
        Memo::None => return None,
        Memo::Text(text) => ("text", text.to_string()),
        Memo::Id(id) => ("id", id.to_string()),
        Memo::Hash(hash) => ("hash", BASE64.encode(hash.0)),
        Memo::Return(hash) => ("return", BASE64.encode(hash.0)),
    };
    Some(TransactionMemo {
        memo_type: memo_type.to_string(),
        value,
    })
}

/// Horizon lists an operation under both its source and its destination
fn involves(operation: &PaymentOperation, account_id: &str) -> bool {
    operation.from.as_deref() == Some(account_id) || operation.to.as_deref() == Some(account_id)
}

fn rejected(code: &str) -> LedgerError {
    LedgerError::Rejected {
        status: 400,
        codes: ResultCodes {
            transaction: Some(code.to_string()),
            operations: vec![],
        },
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn load_account(&self, account_id: &str) -> Result<AccountRecord, LedgerError> {
        let sequence = self
            .sequence(account_id)
            .ok_or_else(|| LedgerError::NotFound(account_id.to_string()))?;

        Ok(AccountRecord {
            account_id: account_id.to_string(),
            sequence,
        })
    }

    async fn submit_transaction(&self, envelope: &str) -> Result<SubmitResponse, LedgerError> {
        let summary =
            inspect_envelope(envelope).map_err(|_| rejected("tx_malformed"))?;

        let mut state = self.state();

        if let Some(code) = state.rejections.get(&summary.source) {
            return Err(rejected(code));
        }

        let current = *state
            .accounts
            .get(&summary.source)
            .ok_or_else(|| rejected("tx_no_source_account"))?;

        if summary.sequence != current + 1 {
            debug!(
                "Mock ledger: bad sequence for {} (got {}, expected {})",
                summary.source,
                summary.sequence,
                current + 1
            );
            return Err(rejected(BAD_SEQUENCE_CODE));
        }

        state.accounts.insert(summary.source.clone(), summary.sequence);
        state.ledger += 1;
        let ledger = state.ledger;
        let hash = format!("mock_tx_{:08x}", ledger);

        state.apply(&summary, &hash);
        state.submitted.push(SubmittedTransaction {
            source: summary.source,
            sequence: summary.sequence,
            envelope: envelope.to_string(),
        });

        Ok(SubmitResponse {
            hash,
            ledger,
            envelope_xdr: Some(envelope.to_string()),
            result_xdr: None,
        })
    }

    async fn payments(
        &self,
        account_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<PaymentOperation>, LedgerError> {
        let mut state = self.state();

        if state.stream_failures > 0 {
            state.stream_failures -= 1;
            return Err(LedgerError::Transport("mock stream failure".to_string()));
        }

        let after: u64 = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let page = state
            .operations
            .iter()
            .filter(|op| involves(op, account_id))
            .filter(|op| op.paging_token.parse::<u64>().map(|t| t > after).unwrap_or(false))
            .take(limit as usize)
            .cloned()
            .collect();

        Ok(page)
    }

    async fn head_paging_token(&self, account_id: &str) -> Result<Option<String>, LedgerError> {
        Ok(self
            .state()
            .operations
            .iter()
            .rev()
            .find(|op| involves(op, account_id))
            .map(|op| op.paging_token.clone()))
    }

    async fn load_memo(
        &self,
        operation: &PaymentOperation,
    ) -> Result<Option<TransactionMemo>, LedgerError> {
        let mut state = self.state();

        if state.memo_failures > 0 {
            state.memo_failures -= 1;
            return Err(LedgerError::Transport("Connection error".to_string()));
        }

        Ok(state.memos.get(&operation.transaction_hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(token: &str) -> PaymentOperation {
        PaymentOperation {
            id: token.to_string(),
            paging_token: token.to_string(),
            operation_type: "payment".to_string(),
            from: Some("GB".to_string()),
            to: Some("GA".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mock_ledger_load_account() {
        let ledger = MockLedger::new();
        ledger.create_account("GA", 100);

        let account = ledger.load_account("GA").await.unwrap();
        assert_eq!(account.sequence, 100);

        assert!(matches!(
            ledger.load_account("GB").await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_ledger_pages_after_cursor() {
        let ledger = MockLedger::new();
        for token in ["1", "2", "3", "4"] {
            ledger.push_operation(op(token));
        }

        let page = ledger.payments("GA", Some("2"), 10).await.unwrap();
        let ids: Vec<_> = page.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "4"]);

        let page = ledger.payments("GA", None, 2).await.unwrap();
        assert_eq!(page.len(), 2);

        assert_eq!(
            ledger.head_paging_token("GA").await.unwrap().as_deref(),
            Some("4")
        );
    }

    #[tokio::test]
    async fn test_mock_ledger_lists_only_involved_operations() {
        let ledger = MockLedger::new();
        ledger.push_operation(op("1"));
        ledger.push_operation(PaymentOperation {
            from: Some("GC".to_string()),
            to: Some("GD".to_string()),
            ..op("2")
        });
        ledger.push_operation(PaymentOperation {
            from: Some("GA".to_string()),
            to: Some("GC".to_string()),
            ..op("3")
        });

        let ids = |page: Vec<PaymentOperation>| -> Vec<String> {
            page.into_iter().map(|op| op.id).collect()
        };
        assert_eq!(ids(ledger.payments("GA", None, 10).await.unwrap()), vec!["1", "3"]);
        assert_eq!(ids(ledger.payments("GD", None, 10).await.unwrap()), vec!["2"]);
        assert!(ledger.payments("GE", None, 10).await.unwrap().is_empty());

        assert_eq!(
            ledger.head_paging_token("GB").await.unwrap().as_deref(),
            Some("1")
        );
        assert!(ledger.head_paging_token("GE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mock_ledger_streams_submitted_operations() {
        use crate::builder::{
            build_envelope, AssetDescriptor, MemoDescriptor, OperationDescriptor,
            TransactionRequest,
        };
        use gateway_common::Keypair;

        let seed = stellar_strkey::ed25519::PrivateKey([1; 32]).to_string();
        let source = Keypair::from_secret(&seed).unwrap();
        let destination = encode_account_id([2; 32]);
        let newcomer = encode_account_id([3; 32]);
        let issuer = encode_account_id([4; 32]);

        let ledger = MockLedger::new();
        ledger.create_account(source.address(), 10);
        ledger.push_operation(op("7"));

        let request = TransactionRequest {
            source: source.address().to_string(),
            operations: vec![
                OperationDescriptor::Payment {
                    destination: destination.clone(),
                    asset: AssetDescriptor::Credit {
                        code: "USD".to_string(),
                        issuer: issuer.clone(),
                    },
                    amount: "12.5".to_string(),
                },
                OperationDescriptor::CreateAccount {
                    destination: newcomer.clone(),
                    starting_balance: "20".to_string(),
                },
            ],
            memo: MemoDescriptor::Text("invoice-1".to_string()),
            network_passphrase: "Test SDF Network ; September 2015".to_string(),
        };
        let signed = build_envelope(&request, 11, &source).unwrap();
        let response = ledger.submit_transaction(&signed.envelope_xdr).await.unwrap();

        let page = ledger.payments(source.address(), Some("7"), 10).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(ledger.payments(&destination, None, 10).await.unwrap().len(), 1);
        assert_eq!(ledger.payments(&newcomer, None, 10).await.unwrap().len(), 1);

        let payment = &page[0];
        assert_eq!(payment.paging_token, "8");
        assert!(payment.is_payment());
        assert_eq!(payment.to.as_deref(), Some(destination.as_str()));
        assert_eq!(payment.from.as_deref(), Some(source.address()));
        assert_eq!(payment.amount.as_deref(), Some("12.5000000"));
        assert_eq!(payment.asset_code.as_deref(), Some("USD"));
        assert_eq!(payment.asset_issuer.as_deref(), Some(issuer.as_str()));
        assert_eq!(payment.transaction_hash, response.hash);

        assert_eq!(page[1].operation_type, "create_account");
        assert_eq!(ledger.sequence(&newcomer), Some(0));

        let memo = ledger.load_memo(payment).await.unwrap().unwrap();
        assert_eq!(memo.memo_type, "text");
        assert_eq!(memo.value, "invoice-1");
    }

    #[tokio::test]
    async fn test_mock_ledger_memo_failures() {
        let ledger = MockLedger::new();
        let operation = PaymentOperation {
            transaction_hash: "tx1".to_string(),
            ..op("1")
        };
        ledger.set_memo("tx1", "text", "testing");
        ledger.fail_memo_lookups(1);

        assert!(ledger.load_memo(&operation).await.is_err());
        let memo = ledger.load_memo(&operation).await.unwrap().unwrap();
        assert_eq!(memo.value, "testing");
    }
}
