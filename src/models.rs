//! Shared data types for transactions, gateways, and routing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A deposit or withdrawal moving through the system.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: i64,
    pub reference_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub country_id: i64,
    pub user_id: i64,
    pub gateway_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

/// `Retry` is a terminal marker meaning dispatch exhausted its options for
/// this transaction — it is not re-queued automatically. See DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Retry,
}

impl TransactionStatus {
    /// True once a transaction can no longer be mutated by the dispatch handler.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Json,
    Soap,
}

/// An external payment processor.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Gateway {
    pub id: i64,
    pub name: String,
    pub data_format_supported: DataFormat,
    pub health_status: HealthStatus,
    pub last_checked_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of joining `gateway_countries` with `gateways` and `countries`:
/// the single routing candidate C4 hands back for a country.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GatewayDetail {
    pub gateway_id: i64,
    pub name: String,
    pub data_format_supported: DataFormat,
    pub health_status: HealthStatus,
    pub priority: i32,
    pub country_id: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Country {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory, process-wide gateway credentials (C7). Never persisted.
#[derive(Debug, Clone)]
pub struct GatewayCredentials {
    pub url: String,
    pub api_key: String,
    /// Exactly 32 bytes — enforced by the crypto codec, not here.
    pub private_key: Vec<u8>,
}

/// The JSON payload encrypted and sent to the gateway (§4.9 step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTransactionRequest {
    pub reference_id: Uuid,
    pub amount: Decimal,
    pub user_id: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    pub user_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub country_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawalRequest {
    pub user_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub country_id: i64,
}

/// Callback body from a gateway. Content-Type selects JSON vs XML decoding.
/// `gateway_response` is optional because real gateway callbacks vary in
/// what extra detail they carry beyond `{id, amount, currency, status}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionCallbackRequest {
    /// The transaction's `reference_id`.
    pub id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub gateway_response: Option<String>,
}

/// Uniform success/error envelope for the REST boundary (§6).
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status_code: u16, message: impl Into<String>, data: T) -> Self {
        Self {
            status_code,
            message: message.into(),
            data: Some(data),
        }
    }
}
