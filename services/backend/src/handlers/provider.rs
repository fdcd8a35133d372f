//! Aggregator-facing endpoints
//!
//! Ledger rejections are answered with HTTP 200 and the aggregator code in
//! the body; only malformed requests get a 4xx.

use axum::{
    extract::{Path, State},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{ProviderCode, MAX_WAGER_BATCH_SIZE, PROVIDER_API_VERSION};
use uuid::Uuid;

use crate::{
    domain::{ApplyOutcome, BatchOutcome, ProviderAccount, ProviderEvent, WagerBatch},
    errors::{AppError, LedgerError, Result},
    extractors::ValidatedJson,
    state::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub code: u16,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Our id of the stored transaction row
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_transaction_id: Option<Uuid>,
    pub balance: Decimal,
    pub real_balance: Decimal,
    pub bonus_balance: Decimal,
    pub api_version: String,
}

impl ProviderResponse {
    fn new(code: ProviderCode, balance: Decimal) -> Self {
        Self {
            code: code.code(),
            status: code.status().to_string(),
            transaction_id: None,
            account_transaction_id: None,
            balance,
            real_balance: balance,
            bonus_balance: Decimal::ZERO,
            api_version: PROVIDER_API_VERSION.to_string(),
        }
    }

    fn accepted(outcome: &ApplyOutcome) -> Self {
        let code = if outcome.is_duplicate() {
            ProviderCode::Duplicate
        } else {
            ProviderCode::Success
        };
        Self {
            transaction_id: Some(outcome.transaction.transaction_id.clone()),
            account_transaction_id: Some(outcome.transaction.id),
            ..Self::new(code, outcome.balance_after())
        }
    }

    fn rejected(error: &LedgerError, transaction_id: &str, balance: Decimal) -> Self {
        Self {
            transaction_id: Some(transaction_id.to_string()),
            ..Self::new(error.provider_code(), balance)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchBetResponse {
    pub transaction_id: String,
    pub account_transaction_id: Uuid,
    pub real_money_bet: Decimal,
    pub bonus_money_bet: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub code: u16,
    pub status: String,
    /// Empty when the batch was rejected
    pub bets: Vec<BatchBetResponse>,
    pub balance: Decimal,
    pub real_balance: Decimal,
    pub bonus_balance: Decimal,
    pub api_version: String,
}

impl BatchResponse {
    fn new(code: ProviderCode, balance: Decimal, bets: Vec<BatchBetResponse>) -> Self {
        Self {
            code: code.code(),
            status: code.status().to_string(),
            bets,
            balance,
            real_balance: balance,
            bonus_balance: Decimal::ZERO,
            api_version: PROVIDER_API_VERSION.to_string(),
        }
    }

    fn accepted(outcome: &BatchOutcome) -> Self {
        // A batch made only of replays answers like a single duplicate
        let code = if outcome.applied_count() == 0 {
            ProviderCode::Duplicate
        } else {
            ProviderCode::Success
        };
        let bets = outcome
            .bets
            .iter()
            .map(|bet| BatchBetResponse {
                transaction_id: bet.transaction.transaction_id.clone(),
                account_transaction_id: bet.transaction.id,
                real_money_bet: bet.transaction.amount,
                bonus_money_bet: Decimal::ZERO,
            })
            .collect();
        Self::new(code, outcome.balance_after, bets)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub currency: Option<String>,
}

pub async fn process_transaction(
    State(state): State<AppState>,
    ValidatedJson(event): ValidatedJson<ProviderEvent>,
) -> Result<Json<ProviderResponse>> {
    if event.transaction_id.trim().is_empty() {
        return Err(AppError::InvalidInput("transaction_id must not be empty".to_string()));
    }
    if event.account_id.trim().is_empty() {
        return Err(AppError::InvalidInput("account_id must not be empty".to_string()));
    }
    if event.round_id.trim().is_empty() {
        return Err(AppError::InvalidInput("round_id must not be empty".to_string()));
    }

    let processor = state.services.processor.clone();
    match processor.apply(&event).await {
        Ok(applied) => {
            let response = ProviderResponse::accepted(&applied.outcome);
            if !applied.followups.is_empty() {
                // Accrual, voids and win notices never delay the aggregator
                tokio::spawn(async move {
                    processor.dispatch(applied.followups).await;
                });
            }
            Ok(Json(response))
        }
        Err(error) => {
            let balance = current_balance(&state, &event.account_id).await;
            Ok(Json(ProviderResponse::rejected(
                &error,
                &event.transaction_id,
                balance,
            )))
        }
    }
}

pub async fn process_wager_batch(
    State(state): State<AppState>,
    ValidatedJson(batch): ValidatedJson<WagerBatch>,
) -> Result<Json<BatchResponse>> {
    if batch.account_id.trim().is_empty() {
        return Err(AppError::InvalidInput("account_id must not be empty".to_string()));
    }
    if batch.bets.is_empty() {
        return Err(AppError::InvalidInput("bets must not be empty".to_string()));
    }
    if batch.bets.len() > MAX_WAGER_BATCH_SIZE {
        return Err(AppError::InvalidInput(format!(
            "at most {} bets per batch",
            MAX_WAGER_BATCH_SIZE
        )));
    }
    if batch
        .bets
        .iter()
        .any(|b| b.transaction_id.trim().is_empty() || b.round_id.trim().is_empty())
    {
        return Err(AppError::InvalidInput(
            "every bet needs a transaction_id and a round_id".to_string(),
        ));
    }

    match state.services.processor.apply_batch(&batch).await {
        Ok(outcome) => Ok(Json(BatchResponse::accepted(&outcome))),
        Err(error) => {
            let balance = current_balance(&state, &batch.account_id).await;
            Ok(Json(BatchResponse::new(error.provider_code(), balance, Vec::new())))
        }
    }
}

/// Mirror balance for a rejection body, zero when the account is unknown
async fn current_balance(state: &AppState, account_id: &str) -> Decimal {
    match state.services.processor.account(account_id).await {
        Ok(account) => account.balance,
        Err(e) => {
            tracing::debug!(account_id, error = %e, "No balance to echo on rejection");
            Decimal::ZERO
        }
    }
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<ProviderResponse>> {
    match state.services.processor.account(&account_id).await {
        Ok(account) => Ok(Json(ProviderResponse::new(ProviderCode::Success, account.balance))),
        Err(error @ LedgerError::AccountNotFound(_)) => Ok(Json(ProviderResponse::new(
            error.provider_code(),
            Decimal::ZERO,
        ))),
        Err(error) => Err(error.into()),
    }
}

pub async fn create_account(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateAccountRequest>,
) -> Result<Json<ProviderAccount>> {
    let currency = req
        .currency
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| state.config.ledger.default_currency.clone());

    let account = state
        .services
        .processor
        .create_account(req.user_id, &currency)
        .await?;

    Ok(Json(account))
}
