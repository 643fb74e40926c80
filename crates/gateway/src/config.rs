//! Configuration management for the Stellar gateway
//!
//! Loads configuration from environment variables (and `.env`) with sensible defaults.

use anyhow::{Context, Result};
use gateway_common::{is_valid_account_id, Keypair};
use std::env;
use std::time::Duration;

use crate::listener::StreamStart;

pub const TESTNET_PASSPHRASE: &str = "Test SDF Network ; September 2015";

const MIN_API_KEY_LEN: usize = 15;

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    /// Redis connection URL
    pub redis_url: String,

    /// Horizon server URL
    pub horizon_url: String,

    pub network_passphrase: String,

    /// Shared secret every POST must carry as `apiKey`
    pub api_key: Option<String>,

    pub authorizing_seed: Option<String>,

    pub issuing_seed: Option<String>,

    /// Monitored account
    pub receiving_account_id: Option<String>,

    /// Webhook notified about received payments
    pub receive_hook_url: Option<String>,

    /// Asset allow-list entries (`native`, `CODE` or `CODE:ISSUER`)
    pub assets: Vec<String>,

    pub stream_start: StreamStart,

    /// Wait after an empty page, in seconds
    pub polling_interval_secs: u64,

    /// Wait before restarting the listener after a transient failure, in seconds
    pub retry_interval_secs: u64,

    pub page_limit: u32,

    /// Whether to use the in-memory ledger and store (for development/testing)
    pub mock_mode: bool,
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_stream_start(value: &str) -> Result<StreamStart> {
    match value.to_ascii_lowercase().as_str() {
        "now" => Ok(StreamStart::Now),
        "earliest" => Ok(StreamStart::Earliest),
        other => anyhow::bail!("Invalid STREAM_START: {} (expected now/earliest)", other),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenv::dotenv().ok();

        let config = Config {
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),

            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "8006".to_string())
                .parse()
                .context("Invalid API_PORT")?,

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            horizon_url: env::var("HORIZON_URL")
                .unwrap_or_else(|_| "https://horizon-testnet.stellar.org".to_string()),

            network_passphrase: optional("NETWORK_PASSPHRASE")
                .unwrap_or_else(|| TESTNET_PASSPHRASE.to_string()),

            api_key: optional("API_KEY"),
            authorizing_seed: optional("AUTHORIZING_SEED"),
            issuing_seed: optional("ISSUING_SEED"),
            receiving_account_id: optional("RECEIVING_ACCOUNT_ID"),
            receive_hook_url: optional("RECEIVE_HOOK_URL"),

            assets: env::var("ASSETS")
                .unwrap_or_default()
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),

            stream_start: parse_stream_start(
                &env::var("STREAM_START").unwrap_or_else(|_| "now".to_string()),
            )?,

            polling_interval_secs: env::var("POLLING_INTERVAL_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("Invalid POLLING_INTERVAL_SECS")?,

            retry_interval_secs: env::var("RETRY_INTERVAL_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid RETRY_INTERVAL_SECS")?,

            page_limit: env::var("PAGE_LIMIT")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("Invalid PAGE_LIMIT")?,

            mock_mode: env::var("MOCK_MODE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .context("Invalid MOCK_MODE (expected true/false)")?,
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.polling_interval_secs == 0 {
            anyhow::bail!("POLLING_INTERVAL_SECS must be greater than 0");
        }

        if self.retry_interval_secs == 0 {
            anyhow::bail!("RETRY_INTERVAL_SECS must be greater than 0");
        }

        if !(1..=200).contains(&self.page_limit) {
            anyhow::bail!("PAGE_LIMIT must be between 1 and 200");
        }

        if let Some(key) = &self.api_key {
            if key.len() < MIN_API_KEY_LEN {
                anyhow::bail!("API_KEY must be at least {} chars long", MIN_API_KEY_LEN);
            }
        }

        if let Some(seed) = &self.authorizing_seed {
            Keypair::from_secret(seed).context("Invalid AUTHORIZING_SEED")?;
        }

        if let Some(seed) = &self.issuing_seed {
            Keypair::from_secret(seed).context("Invalid ISSUING_SEED")?;
        }

        if let Some(account) = &self.receiving_account_id {
            if !is_valid_account_id(account) {
                anyhow::bail!("Invalid RECEIVING_ACCOUNT_ID: {}", account);
            }
        }

        if let Some(url) = &self.receive_hook_url {
            reqwest::Url::parse(url).context("Invalid RECEIVE_HOOK_URL")?;
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    /// Issuing account address, when an issuing seed is configured
    pub fn issuing_account(&self) -> Option<String> {
        let seed = self.issuing_seed.as_ref()?;
        Keypair::from_secret(seed)
            .ok()
            .map(|k| k.address().to_string())
    }

    /// Whether the payment listener has what it needs to run
    pub fn listener_enabled(&self) -> bool {
        self.receiving_account_id.is_some() && self.receive_hook_url.is_some()
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Config")
            .field("api_host", &self.api_host)
            .field("api_port", &self.api_port)
            .field("redis_url", &self.redis_url)
            .field("horizon_url", &self.horizon_url)
            .field("network_passphrase", &self.network_passphrase)
            .field("api_key", &redact(&self.api_key))
            .field("authorizing_seed", &redact(&self.authorizing_seed))
            .field("issuing_seed", &redact(&self.issuing_seed))
            .field("receiving_account_id", &self.receiving_account_id)
            .field("receive_hook_url", &self.receive_hook_url)
            .field("assets", &self.assets)
            .field("stream_start", &self.stream_start)
            .field("polling_interval_secs", &self.polling_interval_secs)
            .field("retry_interval_secs", &self.retry_interval_secs)
            .field("page_limit", &self.page_limit)
            .field("mock_mode", &self.mock_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_common::encode_account_id;
    use std::sync::Mutex;

    // Environment variables are process-wide
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "API_HOST",
        "API_PORT",
        "REDIS_URL",
        "HORIZON_URL",
        "NETWORK_PASSPHRASE",
        "API_KEY",
        "AUTHORIZING_SEED",
        "ISSUING_SEED",
        "RECEIVING_ACCOUNT_ID",
        "RECEIVE_HOOK_URL",
        "ASSETS",
        "STREAM_START",
        "POLLING_INTERVAL_SECS",
        "RETRY_INTERVAL_SECS",
        "PAGE_LIMIT",
        "MOCK_MODE",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_config_defaults() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let config = Config::from_env().expect("Failed to load config");

        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.api_host, "0.0.0.0");
        assert_eq!(config.api_port, 8006);
        assert_eq!(config.horizon_url, "https://horizon-testnet.stellar.org");
        assert_eq!(config.network_passphrase, TESTNET_PASSPHRASE);
        assert_eq!(config.stream_start, StreamStart::Now);
        assert_eq!(config.polling_interval_secs, 5);
        assert_eq!(config.retry_interval_secs, 10);
        assert_eq!(config.page_limit, 50);
        assert!(config.assets.is_empty());
        assert!(!config.mock_mode);
        assert!(!config.listener_enabled());
        assert!(config.issuing_account().is_none());
    }

    #[test]
    fn test_api_address_and_listener() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let seed = stellar_strkey::ed25519::PrivateKey([4; 32]).to_string();
        env::set_var("API_HOST", "127.0.0.1");
        env::set_var("API_PORT", "9000");
        env::set_var("ISSUING_SEED", &seed);
        env::set_var("RECEIVING_ACCOUNT_ID", encode_account_id([1; 32]));
        env::set_var("RECEIVE_HOOK_URL", "http://localhost:8000/receive");
        env::set_var("ASSETS", "USD, EUR ,native");
        env::set_var("STREAM_START", "earliest");

        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.api_address(), "127.0.0.1:9000");
        assert_eq!(config.assets, vec!["USD", "EUR", "native"]);
        assert_eq!(config.stream_start, StreamStart::Earliest);
        assert!(config.listener_enabled());
        assert_eq!(
            config.issuing_account(),
            Some(Keypair::from_secret(&seed).unwrap().address().to_string())
        );
        assert!(!format!("{:?}", config).contains(&seed));
    }

    /// Removes the file when dropped
    struct TempDotenv(std::path::PathBuf);

    impl Drop for TempDotenv {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn test_dotenv_file_is_loaded() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let path = env::current_dir().unwrap().join(".env");
        assert!(!path.exists(), "refusing to overwrite {}", path.display());
        std::fs::write(&path, "PAGE_LIMIT=77\nSTREAM_START=earliest\n").unwrap();
        let _file = TempDotenv(path);

        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.page_limit, 77);
        assert_eq!(config.stream_start, StreamStart::Earliest);
    }

    #[test]
    fn test_invalid_values() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        for (var, value) in [
            ("API_KEY", "short"),
            ("PAGE_LIMIT", "500"),
            ("STREAM_START", "tomorrow"),
            ("RECEIVING_ACCOUNT_ID", "GNOTANACCOUNT"),
            ("ISSUING_SEED", "SNOTASEED"),
            ("POLLING_INTERVAL_SECS", "0"),
        ] {
            clear_env();
            env::set_var(var, value);
            assert!(Config::from_env().is_err(), "{}={} should be rejected", var, value);
        }

        clear_env();
    }
}
