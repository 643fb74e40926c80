//! REST API for outbound payments
//!
//! Form-encoded endpoints:
//! - `POST /payment`: payment signed by the `source` seed given in the request
//! - `POST /send`: credit payment from the issuing account (only when configured)
//! - `GET /health`: storage reachability

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use gateway_common::{is_valid_account_id, Error, Keypair};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::builder::{AssetDescriptor, MemoDescriptor, OperationDescriptor, TransactionRequest};
use crate::federation::{AddressResolver, ResolvedDestination};
use crate::ledger::{Ledger, LedgerError, SubmitResponse};
use crate::storage::PaymentStore;
use crate::submitter::TransactionSubmitter;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub submitter: Arc<TransactionSubmitter>,
    pub ledger: Arc<dyn Ledger>,
    pub resolver: Arc<dyn AddressResolver>,
    pub store: Arc<dyn PaymentStore>,
    pub network_passphrase: String,
    pub api_key: Option<String>,
    /// Set only when the issuing account was initialized
    pub issuing_account: Option<String>,
}

/// `POST /payment` form
#[derive(Default, Deserialize)]
#[serde(default)]
pub struct PaymentForm {
    pub source: String,
    pub destination: String,
    pub amount: String,
    pub asset_code: String,
    pub asset_issuer: String,
    pub memo_type: String,
    pub memo: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

/// `POST /send` form
#[derive(Default, Deserialize)]
#[serde(default)]
pub struct SendForm {
    pub destination: String,
    pub amount: String,
    pub asset_code: String,
    pub memo_type: String,
    pub memo: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

/// API error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    fn forbidden() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            code: "forbidden",
            message: "Access denied.".to_string(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "server_error",
            message: "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match &err {
            Error::TransactionBuild(build) if build.is_client_error() => {
                let message = match build.code() {
                    "asset_code_invalid" => "asset_code param is invalid".to_string(),
                    "invalid_amount" => "amount is invalid".to_string(),
                    _ => build.to_string(),
                };
                ApiError::bad_request(build.code(), message)
            }
            Error::AccountInit { .. } => {
                ApiError::bad_request(err.code(), "source account does not exist")
            }
            Error::Resolution { .. } => {
                ApiError::bad_request(err.code(), "Cannot resolve destination")
            }
            Error::InvalidSeed => ApiError::bad_request(err.code(), "source parameter is invalid"),
            _ => {
                error!("Request failed: {}", err);
                ApiError::internal()
            }
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/payment", post(payment_handler));

    if state.issuing_account.is_some() {
        router = router.route("/send", post(send_handler));
    } else {
        warn!("Issuing account not initialized. /send endpoint will not be available.");
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

impl AppState {
    fn check_api_key(&self, given: &str) -> Result<(), ApiError> {
        match &self.api_key {
            Some(key) if key != given => Err(ApiError::forbidden()),
            _ => Ok(()),
        }
    }

    async fn resolve_destination(&self, destination: &str) -> Result<ResolvedDestination, ApiError> {
        let resolved = self.resolver.resolve(destination).await.map_err(|e| {
            info!("Cannot resolve destination {}: {}", destination, e);
            ApiError::bad_request("invalid_destination", "Cannot resolve destination")
        })?;

        if !is_valid_account_id(&resolved.account_id) {
            return Err(ApiError::bad_request(
                "invalid_destination",
                "destination parameter is invalid",
            ));
        }

        Ok(resolved)
    }
}

/// Combine request memo fields with the memo required by the destination
fn memo_from_request(
    memo_type: &str,
    memo: &str,
    destination: &ResolvedDestination,
) -> Result<MemoDescriptor, ApiError> {
    if memo_type.is_empty() != memo.is_empty() {
        return Err(ApiError::bad_request(
            "memo_missing_param",
            "When passing memo both params: `memo_type`, `memo` are required",
        ));
    }

    let (memo_type, memo) = match &destination.memo_type {
        Some(_) if !memo_type.is_empty() => {
            return Err(ApiError::bad_request(
                "cannot_use_memo",
                "Memo given in request but federation returned memo fields",
            ))
        }
        Some(required) => (
            required.as_str(),
            destination.memo.as_deref().unwrap_or_default(),
        ),
        None => (memo_type, memo),
    };

    match memo_type {
        "" => Ok(MemoDescriptor::None),
        "id" => memo.parse().map(MemoDescriptor::Id).map_err(|_| {
            ApiError::bad_request("cannot_convert_memo_id", "Cannot convert memo_id value")
        }),
        "text" => Ok(MemoDescriptor::Text(memo.to_string())),
        "hash" => hex::decode(memo)
            .ok()
            .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
            .map(MemoDescriptor::Hash)
            .ok_or_else(|| {
                ApiError::bad_request("cannot_convert_memo_hash", "Cannot convert memo_hash value")
            }),
        _ => Err(ApiError::bad_request(
            "memo_not_supported",
            "Not supported memo type",
        )),
    }
}

/// Health check endpoint
async fn health_handler(State(state): State<AppState>) -> Response {
    match state.store.health_check().await {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Storage unavailable: {}", e),
        )
            .into_response(),
    }
}

/// Submit a payment signed by the given source seed
///
/// POST /payment
async fn payment_handler(
    State(state): State<AppState>,
    Form(form): Form<PaymentForm>,
) -> Result<Json<SubmitResponse>, ApiError> {
    state.check_api_key(&form.api_key)?;

    let keypair = Keypair::from_secret(&form.source)
        .map_err(|_| ApiError::bad_request("invalid_source", "source parameter is invalid"))?;
    let source = keypair.address().to_string();

    let destination = state.resolve_destination(&form.destination).await?;

    let operation = match (form.asset_code.is_empty(), form.asset_issuer.is_empty()) {
        (false, false) => {
            if !is_valid_account_id(&form.asset_issuer) {
                return Err(ApiError::bad_request(
                    "invalid_issuer",
                    "asset_issuer parameter is invalid",
                ));
            }
            OperationDescriptor::Payment {
                destination: destination.account_id.clone(),
                asset: AssetDescriptor::Credit {
                    code: form.asset_code.clone(),
                    issuer: form.asset_issuer.clone(),
                },
                amount: form.amount.clone(),
            }
        }
        (true, true) => match state.ledger.load_account(&destination.account_id).await {
            Ok(_) => OperationDescriptor::Payment {
                destination: destination.account_id.clone(),
                asset: AssetDescriptor::Native,
                amount: form.amount.clone(),
            },
            Err(LedgerError::NotFound(_)) => {
                info!(
                    "Destination {} does not exist, creating it",
                    destination.account_id
                );
                OperationDescriptor::CreateAccount {
                    destination: destination.account_id.clone(),
                    starting_balance: form.amount.clone(),
                }
            }
            Err(e) => {
                error!("Cannot load destination {}: {}", destination.account_id, e);
                return Err(ApiError::internal());
            }
        },
        _ => {
            return Err(ApiError::bad_request(
                "asset_missing_param",
                "When passing asset both params: `asset_code`, `asset_issuer` are required",
            ))
        }
    };

    let memo = memo_from_request(&form.memo_type, &form.memo, &destination)?;

    let request = TransactionRequest {
        source: source.clone(),
        operations: vec![operation],
        memo,
        network_passphrase: state.network_passphrase.clone(),
    };

    // Only configured accounts are managed; any other source is used once
    let response = if state.submitter.is_managed(&source).await {
        state.submitter.submit_transaction(request).await?
    } else {
        state.submitter.submit_unmanaged(keypair, request).await?
    };

    info!(
        "Payment from {} submitted: tx {} in ledger {}",
        source, response.hash, response.ledger
    );

    Ok(Json(response))
}

/// Send an asset issued by the issuing account
///
/// POST /send
async fn send_handler(
    State(state): State<AppState>,
    Form(form): Form<SendForm>,
) -> Result<Json<SubmitResponse>, ApiError> {
    state.check_api_key(&form.api_key)?;

    let issuer = state.issuing_account.clone().ok_or_else(ApiError::internal)?;

    let destination = state.resolve_destination(&form.destination).await?;

    if form.asset_code.is_empty() {
        return Err(ApiError::bad_request(
            "asset_missing_param",
            "asset_code param is required",
        ));
    }

    let memo = memo_from_request(&form.memo_type, &form.memo, &destination)?;

    let response = state
        .submitter
        .submit_transaction(TransactionRequest {
            source: issuer.clone(),
            operations: vec![OperationDescriptor::Payment {
                destination: destination.account_id,
                asset: AssetDescriptor::Credit {
                    code: form.asset_code,
                    issuer: issuer.clone(),
                },
                amount: form.amount,
            }],
            memo,
            network_passphrase: state.network_passphrase.clone(),
        })
        .await?;

    info!(
        "Sent from issuing account {}: tx {} in ledger {}",
        issuer, response.hash, response.ledger
    );

    Ok(Json(response))
}
