//! Destination address resolution
//!
//! A destination is either a plain account id or a federation address
//! `name*domain`. Federation addresses are looked up through the
//! `FEDERATION_SERVER` advertised in the domain's `stellar.toml`.

use async_trait::async_trait;
use gateway_common::{is_valid_account_id, Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Account to pay, plus the memo the receiver requires (if any)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDestination {
    pub account_id: String,
    pub memo_type: Option<String>,
    pub memo: Option<String>,
}

#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, address: &str) -> Result<ResolvedDestination>;
}

#[derive(Deserialize)]
struct StellarToml {
    #[serde(rename = "FEDERATION_SERVER")]
    federation_server: Option<String>,
}

#[derive(Deserialize)]
struct FederationRecord {
    account_id: String,
    memo_type: Option<String>,
    memo: Option<serde_json::Value>,
}

pub struct FederationResolver {
    client: reqwest::Client,
    scheme: &'static str,
}

fn resolution_error(address: &str, reason: impl ToString) -> Error {
    Error::Resolution {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

impl FederationResolver {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| resolution_error("<client>", e))?;

        Ok(Self {
            client,
            scheme: "https",
        })
    }

    /// Fetch `stellar.toml` over plain HTTP (local development)
    pub fn allow_http(mut self) -> Self {
        self.scheme = "http";
        self
    }

    async fn federation_server(&self, address: &str, domain: &str) -> Result<String> {
        let url = format!("{}://{}/.well-known/stellar.toml", self.scheme, domain);
        debug!("Fetching {}", url);

        let body = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| resolution_error(address, e))?
            .text()
            .await
            .map_err(|e| resolution_error(address, e))?;

        let parsed: StellarToml =
            toml::from_str(&body).map_err(|e| resolution_error(address, e))?;

        parsed
            .federation_server
            .ok_or_else(|| resolution_error(address, "stellar.toml has no FEDERATION_SERVER"))
    }
}

#[async_trait]
impl AddressResolver for FederationResolver {
    async fn resolve(&self, address: &str) -> Result<ResolvedDestination> {
        let Some((name, domain)) = address.rsplit_once('*') else {
            if is_valid_account_id(address) {
                return Ok(ResolvedDestination {
                    account_id: address.to_string(),
                    ..Default::default()
                });
            }
            return Err(resolution_error(address, "not an account id or federation address"));
        };

        if name.is_empty() || domain.is_empty() {
            return Err(resolution_error(address, "malformed federation address"));
        }

        let server = self.federation_server(address, domain).await?;
        debug!("Resolving {} via {}", address, server);

        let record: FederationRecord = self
            .client
            .get(&server)
            .query(&[("q", address), ("type", "name")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| resolution_error(address, e))?
            .json()
            .await
            .map_err(|e| resolution_error(address, e))?;

        let memo = record.memo.map(|value| match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });

        Ok(ResolvedDestination {
            account_id: record.account_id,
            memo_type: record.memo_type.filter(|t| !t.is_empty() && t != "none"),
            memo,
        })
    }
}
