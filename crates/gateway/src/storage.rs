//! Persistence of settled payment outcomes
//!
//! Redis data model:
//! - received_payment:{operation_id} → JSON `ReceivedPayment` (written once, SET NX)
//! - cursor:{account_id} → paging token of the latest persisted record, or the
//!   start position pinned before the first one
//! - received_payments:{account_id} → List of operation ids in processing order
//!
//! The record insert and the cursor update run in one Lua script, so a
//! record is never visible without its cursor or the reverse.

use anyhow::{Context, Result};
use async_trait::async_trait;
use gateway_common::ReceivedPayment;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Insert the record if absent; only then advance the cursor and the index
const PERSIST_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX') then
    redis.call('SET', KEYS[2], ARGV[2])
    redis.call('RPUSH', KEYS[3], ARGV[3])
    return 1
end
return 0
"#;

/// Insert-only store for `ReceivedPayment` records
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Persist a settled outcome and make its paging token the account's
    /// resumption point. Returns Ok(false) if the operation was already
    /// recorded, in which case nothing is written.
    async fn persist(&self, account_id: &str, payment: &ReceivedPayment) -> Result<bool>;

    /// Paging token the account's stream resumes after: the most recently
    /// persisted record, or the pinned start position before any record
    async fn latest_paging_token(&self, account_id: &str) -> Result<Option<String>>;

    /// Pin `paging_token` as the account's resumption point unless one is
    /// already set. Returns the resumption point in effect afterwards.
    async fn init_cursor(&self, account_id: &str, paging_token: &str) -> Result<String>;

    /// Look up the record for an operation
    async fn get_payment(&self, operation_id: &str) -> Result<Option<ReceivedPayment>>;

    /// Verify the backend is reachable
    async fn health_check(&self) -> Result<()>;
}

fn payment_key(operation_id: &str) -> String {
    format!("received_payment:{}", operation_id)
}

fn cursor_key(account_id: &str) -> String {
    format!("cursor:{}", account_id)
}

fn index_key(account_id: &str) -> String {
    format!("received_payments:{}", account_id)
}

/// Redis storage client
pub struct RedisStore {
    conn: ConnectionManager,
    persist_script: Script,
}

impl RedisStore {
    /// Create a new storage client
    pub async fn new(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis at {}", redis_url);

        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Successfully connected to Redis");

        Ok(Self {
            conn,
            persist_script: Script::new(PERSIST_SCRIPT),
        })
    }
}

#[async_trait]
impl PaymentStore for RedisStore {
    async fn persist(&self, account_id: &str, payment: &ReceivedPayment) -> Result<bool> {
        let json = serde_json::to_string(payment).context("Failed to serialize payment")?;
        let mut conn = self.conn.clone();

        let inserted: i32 = self
            .persist_script
            .key(payment_key(&payment.operation_id))
            .key(cursor_key(account_id))
            .key(index_key(account_id))
            .arg(json)
            .arg(&payment.paging_token)
            .arg(&payment.operation_id)
            .invoke_async(&mut conn)
            .await
            .context("Failed to persist payment")?;

        if inserted == 1 {
            debug!(
                "Persisted operation {} ({}) cursor={}",
                payment.operation_id, payment.status, payment.paging_token
            );
        }

        Ok(inserted == 1)
    }

    async fn latest_paging_token(&self, account_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let token: Option<String> = conn
            .get(cursor_key(account_id))
            .await
            .context("Failed to read cursor")?;
        Ok(token)
    }

    async fn init_cursor(&self, account_id: &str, paging_token: &str) -> Result<String> {
        let mut conn = self.conn.clone();
        let key = cursor_key(account_id);

        let pinned: bool = conn
            .set_nx(&key, paging_token)
            .await
            .context("Failed to pin cursor")?;
        if pinned {
            debug!("Pinned cursor for {} at {}", account_id, paging_token);
        }

        let cursor: Option<String> = conn.get(&key).await.context("Failed to read cursor")?;
        cursor.context("Cursor vanished after being pinned")
    }

    async fn get_payment(&self, operation_id: &str) -> Result<Option<ReceivedPayment>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(payment_key(operation_id)).await?;

        match json {
            Some(data) => {
                let payment =
                    serde_json::from_str(&data).context("Failed to deserialize payment")?;
                Ok(Some(payment))
            }
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    payments: HashMap<String, ReceivedPayment>,
    cursors: HashMap<String, String>,
    order: Vec<String>,
}

/// In-process store for mock mode and tests
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (simulates a storage outage)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All records in persistence order
    pub async fn records(&self) -> Vec<ReceivedPayment> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.payments.get(id).cloned())
            .collect()
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("storage unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn persist(&self, account_id: &str, payment: &ReceivedPayment) -> Result<bool> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if state.payments.contains_key(&payment.operation_id) {
            return Ok(false);
        }

        state
            .payments
            .insert(payment.operation_id.clone(), payment.clone());
        state
            .cursors
            .insert(account_id.to_string(), payment.paging_token.clone());
        state.order.push(payment.operation_id.clone());

        Ok(true)
    }

    async fn latest_paging_token(&self, account_id: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.state.lock().await.cursors.get(account_id).cloned())
    }

    async fn init_cursor(&self, account_id: &str, paging_token: &str) -> Result<String> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let cursor = state
            .cursors
            .entry(account_id.to_string())
            .or_insert_with(|| paging_token.to_string());
        Ok(cursor.clone())
    }

    async fn get_payment(&self, operation_id: &str) -> Result<Option<ReceivedPayment>> {
        self.check_available()?;
        Ok(self.state.lock().await.payments.get(operation_id).cloned())
    }

    async fn health_check(&self) -> Result<()> {
        self.check_available()
    }
}
