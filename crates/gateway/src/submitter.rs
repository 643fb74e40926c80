//! Transaction submission with per-account sequence tracking
//!
//! Every managed account owns a lock guarding its last known sequence number.
//! A submission holds that lock across build, sign, submit and the single
//! retry on a sequence conflict, so no two transactions for one account are
//! ever built against the same sequence number. Different accounts never
//! share a lock, neither for submissions nor for initialization.
//!
//! Sources supplied per request are not managed: their sequence number is
//! loaded for the one transaction and nothing about them is retained.

use gateway_common::{BuildError, Error, Keypair, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::builder::{build_envelope, TransactionRequest};
use crate::ledger::{Ledger, LedgerError, SubmitResponse};

/// A ledger account this gateway signs for
struct ManagedAccount {
    keypair: Keypair,
    /// Last sequence number known to be consumed on the ledger
    sequence: u64,
}

enum AttemptError {
    Build(BuildError),
    Ledger(LedgerError),
}

/// Serializes outbound transactions per managed account
pub struct TransactionSubmitter {
    ledger: Arc<dyn Ledger>,
    accounts: RwLock<HashMap<String, Arc<Mutex<ManagedAccount>>>>,
    init_guards: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TransactionSubmitter {
    /// Create a submitter with no managed accounts
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            accounts: RwLock::new(HashMap::new()),
            init_guards: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn init_guard(&self, address: &str) -> Arc<Mutex<()>> {
        let mut guards = self
            .init_guards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guards.entry(address.to_string()).or_default().clone()
    }

    /// Start managing the account for `seed`, loading its sequence number
    ///
    /// Returns the account address. Calling it again for a managed account
    /// refreshes the sequence number without ever moving it backwards.
    pub async fn init_account(&self, seed: &str) -> Result<String> {
        let keypair = Keypair::from_secret(seed).map_err(|_| Error::AccountInit {
            account: "<seed>".to_string(),
            reason: "invalid secret seed".to_string(),
        })?;
        let address = keypair.address().to_string();

        let guard = self.init_guard(&address);
        let _guard = guard.lock().await;

        let record = self
            .ledger
            .load_account(&address)
            .await
            .map_err(|e| Error::AccountInit {
                account: address.clone(),
                reason: e.to_string(),
            })?;

        let existing = self.accounts.read().await.get(&address).cloned();
        match existing {
            Some(account) => {
                let mut account = account.lock().await;
                account.sequence = account.sequence.max(record.sequence);
                info!(
                    "Refreshed managed account {} at sequence {}",
                    address, account.sequence
                );
            }
            None => {
                self.accounts.write().await.insert(
                    address.clone(),
                    Arc::new(Mutex::new(ManagedAccount {
                        keypair,
                        sequence: record.sequence,
                    })),
                );
                info!(
                    "Initialized managed account {} at sequence {}",
                    address, record.sequence
                );
            }
        }

        Ok(address)
    }

    /// Whether `account_id` has been initialized
    pub async fn is_managed(&self, account_id: &str) -> bool {
        self.accounts.read().await.contains_key(account_id)
    }

    /// Last known sequence number of a managed account
    pub async fn sequence(&self, account_id: &str) -> Option<u64> {
        let account = self.accounts.read().await.get(account_id).cloned()?;
        let sequence = account.lock().await.sequence;
        Some(sequence)
    }

    /// Build, sign and submit a transaction for a managed source account
    pub async fn submit_transaction(&self, request: TransactionRequest) -> Result<SubmitResponse> {
        let account = self
            .accounts
            .read()
            .await
            .get(&request.source)
            .cloned()
            .ok_or_else(|| Error::AccountNotManaged(request.source.clone()))?;

        let mut account = account.lock().await;
        self.submit_with(&mut account, &request).await
    }

    /// Build, sign and submit a transaction for a source this gateway does
    /// not manage, against its current ledger sequence
    pub async fn submit_unmanaged(
        &self,
        keypair: Keypair,
        request: TransactionRequest,
    ) -> Result<SubmitResponse> {
        if keypair.address() != request.source {
            return Err(Error::InvalidSeed);
        }

        let record = self
            .ledger
            .load_account(&request.source)
            .await
            .map_err(|e| Error::AccountInit {
                account: request.source.clone(),
                reason: e.to_string(),
            })?;

        debug!(
            "Submitting for unmanaged account {} at sequence {}",
            request.source, record.sequence
        );

        let mut account = ManagedAccount {
            keypair,
            sequence: record.sequence,
        };
        self.submit_with(&mut account, &request).await
    }

    /// Submit at the next sequence, retrying once on a sequence conflict
    async fn submit_with(
        &self,
        account: &mut ManagedAccount,
        request: &TransactionRequest,
    ) -> Result<SubmitResponse> {
        let sequence = account.sequence + 1;

        let first = self.attempt(&account.keypair, request, sequence).await;
        let err = match first {
            Ok(response) => {
                account.sequence = sequence;
                return Ok(response);
            }
            Err(AttemptError::Build(e)) => return Err(e.into()),
            Err(AttemptError::Ledger(e)) if e.is_bad_sequence() => e,
            Err(AttemptError::Ledger(e)) => {
                error!("Submission from {} failed: {}", request.source, e);
                return Err(Error::Submission(e.to_string()));
            }
        };

        warn!(
            "Sequence conflict for {} at {} ({}), reloading from ledger",
            request.source, sequence, err
        );

        let live = self
            .ledger
            .load_account(&request.source)
            .await
            .map_err(|e| Error::Submission(e.to_string()))?;
        account.sequence = account.sequence.max(live.sequence);
        let retry_sequence = account.sequence + 1;

        match self.attempt(&account.keypair, request, retry_sequence).await {
            Ok(response) => {
                account.sequence = retry_sequence;
                Ok(response)
            }
            Err(AttemptError::Build(e)) => Err(e.into()),
            Err(AttemptError::Ledger(e)) if e.is_bad_sequence() => {
                error!(
                    "Second sequence conflict for {} at {}",
                    request.source, retry_sequence
                );
                Err(Error::SequenceConflict {
                    account: request.source.clone(),
                    sequence: retry_sequence,
                })
            }
            Err(AttemptError::Ledger(e)) => {
                error!("Submission from {} failed on retry: {}", request.source, e);
                Err(Error::Submission(e.to_string()))
            }
        }
    }

    async fn attempt(
        &self,
        keypair: &Keypair,
        request: &TransactionRequest,
        sequence: u64,
    ) -> std::result::Result<SubmitResponse, AttemptError> {
        let signed = build_envelope(request, sequence, keypair).map_err(AttemptError::Build)?;

        debug!(
            "Submitting transaction {} from {} at sequence {}",
            signed.hash, request.source, sequence
        );

        self.ledger
            .submit_transaction(&signed.envelope_xdr)
            .await
            .map_err(AttemptError::Ledger)
    }
}
