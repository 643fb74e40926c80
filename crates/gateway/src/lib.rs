//! Stellar Gateway
//!
//! Bridges the Stellar network and a conventional backend: it submits
//! transactions on behalf of managed accounts and forwards payments received
//! by a monitored account to a webhook.
//!
//! ## Architecture
//!
//! **Components:**
//! - `submitter`: per-account sequence tracking, build/sign/submit with one retry on `tx_bad_seq`
//! - `builder`: tagged operation/memo descriptors to signed XDR envelopes
//! - `listener`: payment stream consumer with durable cursor
//! - `classifier`: decides the outcome of each streamed operation
//! - `webhook`: receive-hook delivery
//! - `storage`: Redis (or in-memory) persistence of settled outcomes
//! - `ledger` / `horizon` / `mock_ledger`: ledger client contract and implementations
//! - `federation`: destination address resolution
//! - `api`: REST API for outbound payments
//! - `config`: Configuration management
//!
//! **Inbound flow:**
//! 1. Listener fetches the next page of operations after the persisted cursor
//! 2. Classifier settles the operation or forwards it
//! 3. Forwarded payments get their memo loaded and are posted to the receive hook
//! 4. The outcome is persisted together with the new cursor
//!
//! **Outbound flow:** API request → address resolution → submitter → ledger

pub mod api;
pub mod builder;
pub mod classifier;
pub mod config;
pub mod federation;
pub mod horizon;
pub mod ledger;
pub mod listener;
pub mod mock_ledger;
pub mod storage;
pub mod submitter;
pub mod webhook;

// Re-export commonly used types
pub use config::Config;
pub use listener::{ListenerState, PaymentListener};
pub use storage::{MemoryStore, PaymentStore, RedisStore};
pub use submitter::TransactionSubmitter;
