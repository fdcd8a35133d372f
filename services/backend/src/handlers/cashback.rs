use axum::{
    extract::{Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::Amount;
use uuid::Uuid;

use crate::{
    domain::{CashbackEarning, CashbackSummary},
    errors::Result,
    extractors::{AuthenticatedUser, ValidatedJson},
    state::AppState,
};

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub amount: Amount,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub claim_id: Uuid,
    pub claimed_amount: Decimal,
    pub status: &'static str,
    pub balance: Decimal,
    pub earnings_consumed: usize,
}

#[derive(Debug, Deserialize)]
pub struct EarningsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EarningsResponse {
    pub earnings: Vec<CashbackEarning>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn claim(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    ValidatedJson(req): ValidatedJson<ClaimRequest>,
) -> Result<Json<ClaimResponse>> {
    let currency = req
        .currency
        .unwrap_or_else(|| state.config.ledger.default_currency.clone());

    let outcome = state
        .services
        .accrual
        .claim(user_id, req.amount.value(), &currency)
        .await?;

    Ok(Json(ClaimResponse {
        claim_id: outcome.claim.id,
        claimed_amount: outcome.claim.amount,
        status: "claimed",
        balance: outcome.balance_after,
        earnings_consumed: outcome.claim.consumed.len(),
    }))
}

pub async fn summary(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
) -> Result<Json<CashbackSummary>> {
    let summary = state.services.accrual.summary(user_id).await?;
    Ok(Json(summary))
}

pub async fn earnings(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Query(query): Query<EarningsQuery>,
) -> Result<Json<EarningsResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let earnings = state
        .services
        .accrual
        .earnings(user_id, limit, offset)
        .await?;

    Ok(Json(EarningsResponse {
        earnings,
        limit,
        offset,
    }))
}
