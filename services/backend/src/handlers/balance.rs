use axum::{
    extract::{Query, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{errors::Result, extractors::AuthenticatedUser, state::AppState};

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub currency: String,
    pub balance: Decimal,
}

/// Balance store view of the caller's funds
pub async fn get_balance(
    State(state): State<AppState>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>> {
    let currency = query
        .currency
        .unwrap_or_else(|| state.config.ledger.default_currency.clone());
    let balance = state.services.processor.balance(user_id, &currency).await?;

    Ok(Json(BalanceResponse {
        user_id,
        currency,
        balance,
    }))
}
