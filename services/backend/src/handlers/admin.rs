use axum::{
    extract::{Path, Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::{CashbackRateOverride, OperationStatus, RetryableOperation},
    errors::{AppError, Result},
    extractors::{AuthenticatedUser, ValidatedJson},
    state::AppState,
};

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct ListOperationsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListOperationsResponse {
    pub operations: Vec<RetryableOperation>,
    pub count: usize,
}

pub async fn list_operations(
    State(state): State<AppState>,
    Query(query): Query<ListOperationsQuery>,
) -> Result<Json<ListOperationsResponse>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OperationStatus>)
        .transpose()
        .map_err(AppError::InvalidInput)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let operations = state.services.retry.list(status, limit).await?;

    Ok(Json(ListOperationsResponse {
        count: operations.len(),
        operations,
    }))
}

/// Put a dead or failed operation back on the queue
pub async fn replay_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<Uuid>,
) -> Result<Json<RetryableOperation>> {
    let operation = state
        .services
        .retry
        .replay(operation_id)
        .await?
        .ok_or(AppError::OperationNotFound(operation_id))?;

    Ok(Json(operation))
}

#[derive(Debug, Deserialize)]
pub struct RateOverrideRequest {
    pub is_enabled: bool,
    pub override_percentage: Decimal,
}

pub async fn get_rate_override(State(state): State<AppState>) -> Result<Json<CashbackRateOverride>> {
    let value = state.services.accrual.rate_override().await?;
    Ok(Json(value))
}

/// Enable or disable the global cashback rate; the caller is recorded as the admin
pub async fn update_rate_override(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    ValidatedJson(req): ValidatedJson<RateOverrideRequest>,
) -> Result<Json<CashbackRateOverride>> {
    let value = state
        .services
        .accrual
        .set_rate_override(admin, req.is_enabled, req.override_percentage)
        .await?;
    Ok(Json(value))
}
