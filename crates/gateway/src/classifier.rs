//! Payment classification
//!
//! Decides, without side effects, what happens to one operation from the
//! monitored account's stream. The checks run in a fixed order and the first
//! one that matches settles the operation.

use anyhow::{bail, Result};
use gateway_common::{is_valid_account_id, PaymentStatus};

use crate::ledger::PaymentOperation;

/// An allowed credit asset, matched on code and issuer together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedAsset {
    pub code: String,
    pub issuer: String,
}

/// Assets the receiving account accepts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetPolicy {
    pub allow_native: bool,
    pub assets: Vec<AllowedAsset>,
}

impl AssetPolicy {
    /// Parse allow-list entries of the form `native`, `CODE` or `CODE:ISSUER`
    ///
    /// A bare `CODE` is paired with `default_issuer` (the issuing account).
    pub fn parse(entries: &[String], default_issuer: Option<&str>) -> Result<Self> {
        let mut policy = AssetPolicy::default();

        for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
            if entry.eq_ignore_ascii_case("native") {
                policy.allow_native = true;
                continue;
            }

            let (code, issuer) = match entry.split_once(':') {
                Some((code, issuer)) => (code, issuer),
                None => match default_issuer {
                    Some(issuer) => (entry, issuer),
                    None => bail!(
                        "Asset {} has no issuer and no issuing account is configured",
                        entry
                    ),
                },
            };

            if code.is_empty() || code.len() > 12 || !code.bytes().all(|b| b.is_ascii_alphanumeric())
            {
                bail!("Invalid asset code in ASSETS: {}", code);
            }
            if !is_valid_account_id(issuer) {
                bail!("Invalid asset issuer in ASSETS: {}", issuer);
            }

            policy.assets.push(AllowedAsset {
                code: code.to_string(),
                issuer: issuer.to_string(),
            });
        }

        Ok(policy)
    }

    /// Whether the operation's asset is accepted
    pub fn allows(&self, operation: &PaymentOperation) -> bool {
        if operation.is_native() {
            return self.allow_native;
        }

        match (&operation.asset_code, &operation.asset_issuer) {
            (Some(code), Some(issuer)) => self
                .assets
                .iter()
                .any(|asset| &asset.code == code && &asset.issuer == issuer),
            _ => false,
        }
    }
}

/// Result of classifying an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Settled without contacting the receiver
    Settled(PaymentStatus),
    /// Qualifying payment: load the memo and notify the receiver
    Forward,
}

/// Stateless classifier for one monitored account
#[derive(Debug, Clone)]
pub struct Classifier {
    receiving_account: String,
    policy: AssetPolicy,
}

impl Classifier {
    pub fn new(receiving_account: String, policy: AssetPolicy) -> Self {
        Self {
            receiving_account,
            policy,
        }
    }

    pub fn receiving_account(&self) -> &str {
        &self.receiving_account
    }

    pub fn classify(&self, operation: &PaymentOperation) -> Classification {
        if !operation.is_payment() {
            return Classification::Settled(PaymentStatus::NotPayment);
        }

        if operation.to.as_deref() != Some(self.receiving_account.as_str()) {
            return Classification::Settled(PaymentStatus::SentNotReceived);
        }

        if !self.policy.allows(operation) {
            return Classification::Settled(PaymentStatus::AssetNotAllowed);
        }

        Classification::Forward
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_common::encode_account_id;

    fn account(byte: u8) -> String {
        encode_account_id([byte; 32])
    }

    fn classifier() -> Classifier {
        let policy = AssetPolicy::parse(
            &["USD".to_string(), "EUR".to_string()],
            Some(&account(10)),
        )
        .unwrap();
        Classifier::new(account(1), policy)
    }

    fn payment(to: &str, code: &str, issuer: &str) -> PaymentOperation {
        PaymentOperation {
            id: "1".to_string(),
            paging_token: "2".to_string(),
            operation_type: "payment".to_string(),
            from: Some(account(5)),
            to: Some(to.to_string()),
            amount: Some("200".to_string()),
            asset_type: Some("credit_alphanum4".to_string()),
            asset_code: Some(code.to_string()),
            asset_issuer: Some(issuer.to_string()),
            transaction_hash: "tx".to_string(),
        }
    }

    #[test]
    fn test_not_a_payment() {
        let op = PaymentOperation {
            operation_type: "create_account".to_string(),
            ..Default::default()
        };
        assert_eq!(
            classifier().classify(&op),
            Classification::Settled(PaymentStatus::NotPayment)
        );
    }

    #[test]
    fn test_sent_not_received() {
        let op = payment(&account(2), "USD", &account(10));
        assert_eq!(
            classifier().classify(&op),
            Classification::Settled(PaymentStatus::SentNotReceived)
        );
    }

    #[test]
    fn test_outbound_wins_over_disallowed_asset() {
        let op = payment(&account(2), "GBP", &account(11));
        assert_eq!(
            classifier().classify(&op),
            Classification::Settled(PaymentStatus::SentNotReceived)
        );
    }

    #[test]
    fn test_asset_not_allowed_issuer() {
        let op = payment(&account(1), "USD", &account(11));
        assert_eq!(
            classifier().classify(&op),
            Classification::Settled(PaymentStatus::AssetNotAllowed)
        );
    }

    #[test]
    fn test_asset_not_allowed_code() {
        let op = payment(&account(1), "GBP", &account(10));
        assert_eq!(
            classifier().classify(&op),
            Classification::Settled(PaymentStatus::AssetNotAllowed)
        );
    }

    #[test]
    fn test_allowed_asset_is_forwarded() {
        let op = payment(&account(1), "EUR", &account(10));
        assert_eq!(classifier().classify(&op), Classification::Forward);
    }

    #[test]
    fn test_native_requires_explicit_allowance() {
        let mut op = payment(&account(1), "", "");
        op.asset_type = Some("native".to_string());
        op.asset_code = None;
        op.asset_issuer = None;

        assert_eq!(
            classifier().classify(&op),
            Classification::Settled(PaymentStatus::AssetNotAllowed)
        );

        let policy = AssetPolicy::parse(&["native".to_string()], None).unwrap();
        let classifier = Classifier::new(account(1), policy);
        assert_eq!(classifier.classify(&op), Classification::Forward);
    }

    #[test]
    fn test_policy_parse_explicit_issuer() {
        let entry = format!("BTC:{}", account(20));
        let policy = AssetPolicy::parse(&[entry], None).unwrap();
        assert_eq!(policy.assets[0].code, "BTC");
        assert_eq!(policy.assets[0].issuer, account(20));
        assert!(!policy.allow_native);
    }

    #[test]
    fn test_policy_parse_errors() {
        assert!(AssetPolicy::parse(&["USD".to_string()], None).is_err());
        assert!(AssetPolicy::parse(&["USD:GBAD".to_string()], None).is_err());
        assert!(AssetPolicy::parse(&["WAYTOOLONGCODE1".to_string()], Some(&account(1))).is_err());
    }
}
