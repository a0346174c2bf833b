use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::transaction::{PaymentMethod, Transaction};
use crate::routes::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success, success};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateTransactionRequest {
    pub buyer_id: Uuid,
    pub ticket_id: Uuid,
    pub payment_method: PaymentMethod,
}

/// Composite initiate response: the persisted transaction plus the
/// gateway's client handle, which appears here and nowhere else.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiatedPayload {
    transaction: Transaction,
    transaction_id: Uuid,
    client_secret: String,
}

pub async fn initiate(
    State(state): State<AppState>,
    Json(request): Json<InitiateTransactionRequest>,
) -> Result<Response, AppError> {
    let purchase = state
        .coordinator
        .initiate(request.buyer_id, request.ticket_id, request.payment_method)
        .await?;

    let payload = InitiatedPayload {
        transaction_id: purchase.transaction.id,
        client_secret: purchase.client_secret,
        transaction: purchase.transaction,
    };
    Ok(created(payload, "Transaction initiated").into_response())
}

pub async fn confirm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let tx = state.coordinator.complete(id).await?;
    Ok(success(tx, "Transaction completed").into_response())
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.coordinator.cancel(id).await?;
    Ok(empty_success("Transaction canceled").into_response())
}

pub async fn fail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.coordinator.fail(id).await?;
    Ok(empty_success("Transaction failed").into_response())
}

pub async fn refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.coordinator.refund(id).await?;
    Ok(empty_success("Transaction refunded").into_response())
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let tx = state.coordinator.get(id).await?;
    Ok(success(tx, "Transaction found").into_response())
}

pub async fn buyer_history(
    State(state): State<AppState>,
    Path(buyer_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let history = state.coordinator.history_for_buyer(buyer_id).await?;
    Ok(success(history, "Buyer history").into_response())
}

pub async fn vendor_sales(
    State(state): State<AppState>,
    Path(vendor_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let sales = state.coordinator.sales_for_vendor(vendor_id).await?;
    Ok(success(sales, "Vendor sales").into_response())
}

pub async fn list_all(State(state): State<AppState>) -> Result<Response, AppError> {
    let all = state.coordinator.list_all().await?;
    Ok(success(all, "All transactions").into_response())
}

#[derive(Serialize)]
struct BackfillPayload {
    patched: u64,
}

pub async fn backfill_vendors(State(state): State<AppState>) -> Result<Response, AppError> {
    let patched = state.coordinator.backfill_vendor_ids().await?;
    Ok(success(BackfillPayload { patched }, "Vendor backfill finished").into_response())
}
