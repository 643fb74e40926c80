//! Payment listener
//!
//! Consumes the payment stream of the receiving account one operation at a
//! time, in stream order. Every settled outcome is persisted together with its
//! paging token, which is where the stream resumes after any restart.
//! Operations whose outcome is not settled (memo lookup or webhook failed)
//! leave no record, so they are picked up again on the next start.
//!
//! A stream started "now" pins its start position in storage before the
//! first page is read, so every later start resumes from that same point.

use anyhow::Result;
use gateway_common::{PaymentStatus, ReceivedPayment};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::classifier::{Classification, Classifier};
use crate::ledger::{Ledger, LedgerError, PaymentOperation};
use crate::storage::PaymentStore;
use crate::webhook::{PaymentNotification, WebhookDispatcher, WebhookError};

/// Paging token preceding every operation
const EARLIEST_CURSOR: &str = "0";

/// Where to begin when no cursor has been persisted yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStart {
    /// Only operations after the newest one at the very first start
    Now,
    /// The whole history of the account
    Earliest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Starting,
    Streaming,
    Stopped,
    Crashed,
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Memo lookup failed: {0}")]
    MemoLookup(LedgerError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error("Stream fetch failed: {0}")]
    Stream(LedgerError),

    #[error("Storage failure: {0:#}")]
    Storage(anyhow::Error),
}

impl ListenerError {
    /// Transient errors leave no record and are retried; storage errors are not
    pub fn is_transient(&self) -> bool {
        !matches!(self, ListenerError::Storage(_))
    }
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub receive_hook: String,
    pub page_limit: u32,
    pub polling_interval: Duration,
    pub retry_interval: Duration,
    pub start: StreamStart,
}

pub struct PaymentListener {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn PaymentStore>,
    webhook: WebhookDispatcher,
    classifier: Classifier,
    config: ListenerConfig,
    state: watch::Sender<ListenerState>,
}

impl PaymentListener {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn PaymentStore>,
        webhook: WebhookDispatcher,
        classifier: Classifier,
        config: ListenerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Starting);
        Self {
            ledger,
            store,
            webhook,
            classifier,
            config,
            state,
        }
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    fn account(&self) -> &str {
        self.classifier.receiving_account()
    }

    fn set_state(&self, state: ListenerState) {
        debug!("Listener for {} is {:?}", self.account(), state);
        self.state.send_replace(state);
    }

    /// Classify one operation, notify the receiver if it qualifies, and
    /// persist the settled outcome
    ///
    /// Returns an error without persisting anything when the outcome is not
    /// settled.
    pub async fn on_payment(
        &self,
        operation: &PaymentOperation,
    ) -> std::result::Result<PaymentStatus, ListenerError> {
        let status = match self.classifier.classify(operation) {
            Classification::Settled(status) => status,
            Classification::Forward => {
                let memo = self
                    .ledger
                    .load_memo(operation)
                    .await
                    .map_err(ListenerError::MemoLookup)?;

                match memo {
                    None => PaymentStatus::NoMemo,
                    Some(memo) => {
                        let notification = PaymentNotification::new(operation, &memo);
                        self.webhook
                            .notify(&self.config.receive_hook, &notification)
                            .await?;
                        PaymentStatus::Success
                    }
                }
            }
        };

        let record = ReceivedPayment::new(
            operation.id.clone(),
            operation.paging_token.clone(),
            status,
        );

        let inserted = self
            .store
            .persist(self.account(), &record)
            .await
            .map_err(ListenerError::Storage)?;

        if inserted {
            info!("Operation {}: {}", operation.id, status);
        } else {
            warn!(
                "Operation {} was already recorded, treating as settled",
                operation.id
            );
        }

        Ok(status)
    }

    /// Run until `shutdown` turns true or storage fails
    ///
    /// Transient failures restart the stream from the persisted cursor after
    /// the retry interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            "Starting payment listener for {} (page limit {}, polling every {:?})",
            self.account(),
            self.config.page_limit,
            self.config.polling_interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ListenerState::Starting);

            let result = match self.resume_cursor().await {
                Ok(cursor) => {
                    self.set_state(ListenerState::Streaming);
                    self.stream(cursor, &mut shutdown).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => break,
                Err(e) if e.is_transient() => {
                    warn!(
                        "Listener for {} interrupted: {}; restarting in {:?}",
                        self.account(),
                        e,
                        self.config.retry_interval
                    );
                    if wait(self.config.retry_interval, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("Listener for {} crashed: {}", self.account(), e);
                    self.set_state(ListenerState::Crashed);
                    return Err(e.into());
                }
            }
        }

        info!("Payment listener for {} stopped", self.account());
        self.set_state(ListenerState::Stopped);
        Ok(())
    }

    /// Persisted cursor, or the configured start position when there is none
    async fn resume_cursor(&self) -> std::result::Result<Option<String>, ListenerError> {
        let persisted = self
            .store
            .latest_paging_token(self.account())
            .await
            .map_err(ListenerError::Storage)?;

        if let Some(cursor) = persisted {
            info!("Resuming {} after paging token {}", self.account(), cursor);
            return Ok(Some(cursor));
        }

        match self.config.start {
            StreamStart::Earliest => {
                info!("No cursor for {}, starting from the earliest operation", self.account());
                Ok(None)
            }
            StreamStart::Now => {
                let head = self
                    .ledger
                    .head_paging_token(self.account())
                    .await
                    .map_err(ListenerError::Stream)?;
                let origin = head.unwrap_or_else(|| EARLIEST_CURSOR.to_string());

                let cursor = self
                    .store
                    .init_cursor(self.account(), &origin)
                    .await
                    .map_err(ListenerError::Storage)?;
                info!("No cursor for {}, starting after {}", self.account(), cursor);
                Ok(Some(cursor))
            }
        }
    }

    /// Returns Ok only on shutdown
    async fn stream(
        &self,
        mut cursor: Option<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> std::result::Result<(), ListenerError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let page = self
                .ledger
                .payments(self.account(), cursor.as_deref(), self.config.page_limit)
                .await
                .map_err(ListenerError::Stream)?;

            if page.is_empty() {
                if wait(self.config.polling_interval, shutdown).await {
                    return Ok(());
                }
                continue;
            }

            debug!("Fetched {} operation(s) for {}", page.len(), self.account());

            for operation in page {
                // Shutdown is only honoured between operations
                if *shutdown.borrow() {
                    return Ok(());
                }
                self.on_payment(&operation).await?;
                cursor = Some(operation.paging_token);
            }
        }
    }
}

/// Sleep for `duration`; true if shutdown was requested meanwhile
async fn wait(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
