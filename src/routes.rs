//! REST boundary (C12, ambient) — §4.12 / §6.
//!
//! `deposit`/`withdraw` insert a `pending` transaction and enqueue it for
//! dispatch; `callback` applies the gateway's final status report. All
//! three respond immediately; `callback`'s store write happens on a
//! detached task so the client never waits on it (§6: "processes
//! asynchronously after responding to the client").

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    ApiResponse, DepositRequest, Transaction, TransactionCallbackRequest, TransactionType,
    TransactionStatus, WithdrawalRequest,
};
use crate::queue::MessageProducer;
use crate::store::{CountryRepository, TransactionRepository};
use crate::tasks::BackgroundTasks;

pub struct AppState {
    pub transactions: Arc<dyn TransactionRepository>,
    pub countries: Arc<dyn CountryRepository>,
    pub producer: Arc<dyn MessageProducer>,
    pub topic: String,
    pub tasks: BackgroundTasks,
}

async fn create_transaction(
    state: &AppState,
    kind: TransactionType,
    user_id: i64,
    amount: rust_decimal::Decimal,
    currency: String,
    country_id: i64,
) -> Result<Transaction, AppError> {
    if amount <= rust_decimal::Decimal::ZERO {
        return Err(AppError::BadRequest("amount must be > 0".to_string()));
    }

    // §11 supplement: country_id must resolve to a real country before the
    // request is accepted, rather than failing later inside dispatch.
    if state.countries.get(country_id).await?.is_none() {
        return Err(AppError::BadRequest(format!(
            "unknown country_id: {country_id}"
        )));
    }

    let now = Utc::now();
    let mut tx = Transaction {
        id: 0,
        reference_id: Uuid::new_v4(),
        amount,
        currency,
        kind,
        status: TransactionStatus::Pending,
        country_id,
        user_id,
        gateway_id: None,
        created_at: now,
        updated_at: now,
    };

    state.transactions.insert(&mut tx).await?;

    let payload = serde_json::to_vec(&tx)
        .map_err(|e| AppError::Internal(format!("failed to serialize transaction: {e}")))?;

    // Enqueue on a detached task: the synchronous work the 60s deadline in
    // §5 covers is insert + enqueue-kickoff, not delivery confirmation.
    let producer = state.producer.clone();
    let topic = state.topic.clone();
    state
        .tasks
        .spawn(async move {
            if let Err(e) = producer.publish(&topic, payload).await {
                error!(topic, error = %e, "failed to publish transaction for dispatch");
            }
        })
        .await;

    Ok(tx)
}

pub async fn deposit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DepositRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tx = create_transaction(
        &state,
        TransactionType::Deposit,
        req.user_id,
        req.amount,
        req.currency,
        req.country_id,
    )
    .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::new(202, "deposit accepted", tx)),
    ))
}

pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WithdrawalRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tx = create_transaction(
        &state,
        TransactionType::Withdrawal,
        req.user_id,
        req.amount,
        req.currency,
        req.country_id,
    )
    .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::new(202, "withdrawal accepted", tx)),
    ))
}

/// Decodes the callback body per its `Content-Type` header: JSON, `text/xml`,
/// or `application/xml`.
fn decode_callback(
    headers: &HeaderMap,
    body: &[u8],
) -> Result<TransactionCallbackRequest, AppError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match content_type {
        "application/json" => serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("invalid JSON callback body: {e}"))),
        "text/xml" | "application/xml" => quick_xml::de::from_reader(body)
            .map_err(|e| AppError::BadRequest(format!("invalid XML callback body: {e}"))),
        other => Err(AppError::BadRequest(format!(
            "unsupported content type: {other}"
        ))),
    }
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, AppError> {
    let request = decode_callback(&headers, &body)?;

    // §11 supplement: the idempotent lookup lets an unknown reference 404
    // cleanly instead of issuing a blind UPDATE that silently matches zero
    // rows. This lookup is the only synchronous store access on this path;
    // the status write itself still happens asynchronously below.
    if state.transactions.find_by_reference(request.id).await?.is_none() {
        return Err(AppError::BadRequest(format!(
            "unknown reference_id: {}",
            request.id
        )));
    }

    // Respond immediately; apply the status update asynchronously (§6).
    let transactions = state.transactions.clone();
    state
        .tasks
        .spawn(async move {
            if let Err(e) = transactions
                .update_status_by_reference(request.id, request.status)
                .await
            {
                warn!(reference_id = %request.id, error = %e, "failed to apply callback status update");
            }
        })
        .await;

    Ok((
        StatusCode::OK,
        Json(ApiResponse::new(200, "callback accepted", ())),
    ))
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
