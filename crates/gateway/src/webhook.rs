//! Receive-hook delivery
//!
//! One form-encoded POST per call. Anything but a 2xx answer is a failure;
//! there is no retry here, the listener re-runs the operation instead.

use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::ledger::{PaymentOperation, TransactionMemo};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Webhook returned status {0}")]
    Status(StatusCode),
}

/// Fields posted to the receive hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentNotification {
    pub id: String,
    pub from: String,
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_issuer: Option<String>,
    pub memo_type: String,
    pub memo: String,
}

impl PaymentNotification {
    pub fn new(operation: &PaymentOperation, memo: &TransactionMemo) -> Self {
        Self {
            id: operation.id.clone(),
            from: operation.from.clone().unwrap_or_default(),
            amount: operation.amount.clone().unwrap_or_default(),
            asset_code: operation.asset_code.clone(),
            asset_issuer: operation.asset_issuer.clone(),
            memo_type: memo.memo_type.clone(),
            memo: memo.value.clone(),
        }
    }
}

/// Stateless webhook client
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
}

impl WebhookDispatcher {
    /// Create a dispatcher with the given request timeout
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("stellar-gateway/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// POST `notification` to `url`
    pub async fn notify(
        &self,
        url: &str,
        notification: &PaymentNotification,
    ) -> Result<(), WebhookError> {
        debug!("Notifying {} of operation {}", url, notification.id);

        let response = self
            .client
            .post(url)
            .form(notification)
            .send()
            .await
            .map_err(|e| {
                warn!("Webhook request to {} failed: {}", url, e);
                WebhookError::Transport(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                "Webhook {} returned {} for operation {}",
                url, status, notification.id
            );
            return Err(WebhookError::Status(status));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode as AxumStatus, routing::post, Form, Router};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Received = Arc<Mutex<Vec<HashMap<String, String>>>>;

    /// Spawn a local receiver answering with `status`
    async fn spawn_receiver(status: u16) -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));

        let app = Router::new()
            .route(
                "/receive",
                post(
                    move |State(received): State<Received>,
                          Form(fields): Form<HashMap<String, String>>| async move {
                        received.lock().unwrap().push(fields);
                        AxumStatus::from_u16(status).unwrap()
                    },
                ),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/receive", addr), received)
    }

    fn notification() -> PaymentNotification {
        PaymentNotification {
            id: "1".to_string(),
            from: "GFROM".to_string(),
            amount: "200".to_string(),
            asset_code: Some("USD".to_string()),
            asset_issuer: None,
            memo_type: "text".to_string(),
            memo: "testing".to_string(),
        }
    }

    #[tokio::test]
    async fn test_notify_posts_form_fields() {
        let (url, received) = spawn_receiver(200).await;
        let dispatcher = WebhookDispatcher::new(Duration::from_secs(5)).unwrap();

        dispatcher.notify(&url, &notification()).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let fields = &received[0];
        assert_eq!(fields["id"], "1");
        assert_eq!(fields["from"], "GFROM");
        assert_eq!(fields["amount"], "200");
        assert_eq!(fields["asset_code"], "USD");
        assert_eq!(fields["memo_type"], "text");
        assert_eq!(fields["memo"], "testing");
        assert!(!fields.contains_key("asset_issuer"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let (url, received) = spawn_receiver(503).await;
        let dispatcher = WebhookDispatcher::new(Duration::from_secs(5)).unwrap();

        let result = dispatcher.notify(&url, &notification()).await;

        assert!(matches!(result, Err(WebhookError::Status(s)) if s.as_u16() == 503));
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_receiver_is_failure() {
        let dispatcher = WebhookDispatcher::new(Duration::from_secs(1)).unwrap();
        let result = dispatcher
            .notify("http://127.0.0.1:1/receive", &notification())
            .await;
        assert!(matches!(result, Err(WebhookError::Transport(_))));
    }
}
