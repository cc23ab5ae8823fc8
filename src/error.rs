//! Error taxonomy.
//!
//! Two layers: [`DispatchError`] covers the state machine in
//! [`crate::dispatch`] (§7's kind → disposition table), and [`AppError`]
//! covers the synchronous REST boundary (§6, flat `400`/`500`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::crypto::CryptoError;
use crate::wire::WireError;

/// Store-level failure, opaque beyond its message (§4.4-4.6: "StoreError").
#[derive(Debug, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError(e.to_string())
    }
}

/// No row in `gateway_countries` joins to a healthy gateway for the country.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no healthy gateway for country {0}")]
pub struct NoHealthyGateway(pub i64);

/// `config_for` (C7) was asked for a gateway name outside {A,B,C}.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("unsupported gateway: {0}")]
pub struct UnsupportedGateway(pub String);

/// A single C8 send attempt failed (transport/protocol).
#[derive(Debug, Error)]
#[error("gateway transport error: {0}")]
pub struct GatewayError(pub String);

/// The taxonomy the dispatch handler (C9) switches on, per §7.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed queue message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    NoHealthyGateway(#[from] NoHealthyGateway),
    #[error("routing store error: {0}")]
    RoutingStore(StoreError),
    #[error(transparent)]
    UnsupportedGateway(#[from] UnsupportedGateway),
    #[error(transparent)]
    UnsupportedFormat(#[from] WireError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("gateway exhausted retries: {0}")]
    GatewayExhausted(GatewayError),
    #[error("health update store error: {0}")]
    HealthUpdateStore(StoreError),
    #[error("bind gateway store error: {0}")]
    BindGatewayStore(StoreError),
}

impl DispatchError {
    /// Branches of the taxonomy that mark the transaction `retry` (§7):
    /// routing/config/format/crypto errors are all terminal this way,
    /// distinct from `GatewayExhausted`'s republish path.
    pub fn is_terminal_retry(&self) -> bool {
        matches!(
            self,
            DispatchError::NoHealthyGateway(_)
                | DispatchError::RoutingStore(_)
                | DispatchError::UnsupportedGateway(_)
                | DispatchError::UnsupportedFormat(_)
                | DispatchError::Crypto(_)
        )
    }
}

/// The REST boundary's uniform error envelope (§6: `400` on bind/read
/// failure, `500` on service failure).
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::BadRequest(m) | AppError::Internal(m) => m,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
        }
        let body = json!({
            "status_code": status.as_u16(),
            "message": self.message(),
        });
        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Internal(e.0)
    }
}
