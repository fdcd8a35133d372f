/// Cashback claim, summary and rollback handling through the HTTP surface
mod common;

use axum::http::StatusCode;
use backend::repository::memory::default_tiers;
use common::{decimal, eventually, parse_error, provider_event, TestContext, CURRENCY};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

/// Loses 1_000 in one round, leaving 1_000 on the balance and 2.5 cashback
async fn losing_round(ctx: &TestContext, user: Uuid) -> String {
    let account = ctx.funded_account(user, dec!(2000)).await;
    ctx.provider(provider_event("w-1", "wager", &account, "round-1", "1000"))
        .await;
    ctx.provider(provider_event("res-1", "result", &account, "round-1", "0"))
        .await;
    assert_eq!(ctx.wait_for_cashback(user).await, dec!(2.5));
    account
}

#[tokio::test]
async fn test_claim_credits_balance_and_consumes_earning() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = losing_round(&ctx, user).await;

    let response = ctx
        .post_as(user, "/api/cashback/claim", json!({ "amount": "1" }))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(decimal(&body["claimed_amount"]), dec!(1));
    assert_eq!(body["status"], "claimed");
    assert_eq!(decimal(&body["balance"]), dec!(1001));
    assert_eq!(body["earnings_consumed"], 1);

    // The mirror is credited in the same unit as the balance store
    let mirror = ctx.services.processor.account(&account).await.unwrap();
    assert_eq!(mirror.balance, dec!(1001));

    let summary = ctx.get_as(user, "/api/cashback/summary").await.json::<Value>();
    assert_eq!(decimal(&summary["available_cashback"]), dec!(1.5));
    assert_eq!(decimal(&summary["total_claimed"]), dec!(1));
    assert_eq!(decimal(&summary["total_earned"]), dec!(2.5));
}

#[tokio::test]
async fn test_claim_above_available_is_rejected() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    losing_round(&ctx, user).await;

    let response = ctx
        .post_as(user, "/api/cashback/claim", json!({ "amount": "5" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let (code, category) = parse_error(&response.json::<Value>());
    assert_eq!(code, "LEDGER_CLAIM_EXCEEDS_AVAILABLE");
    assert_eq!(category, "Ledger");

    let balance = ctx.services.processor.balance(user, CURRENCY).await.unwrap();
    assert_eq!(balance, dec!(1000));
}

#[tokio::test]
async fn test_claim_respects_daily_limit() {
    let ctx = TestContext::new();
    let mut tiers = default_tiers();
    if let Some(bronze) = tiers.iter_mut().find(|t| t.level == 1) {
        bronze.daily_limit = Some(dec!(1));
    }
    ctx.store.set_tiers(tiers);

    let user = Uuid::new_v4();
    losing_round(&ctx, user).await;

    ctx.post_as(user, "/api/cashback/claim", json!({ "amount": "0.75" }))
        .await
        .assert_status_ok();

    let response = ctx
        .post_as(user, "/api/cashback/claim", json!({ "amount": "0.5" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let (code, _) = parse_error(&response.json::<Value>());
    assert_eq!(code, "LEDGER_CLAIM_LIMIT_EXCEEDED");

    // Remaining headroom can still be claimed
    ctx.post_as(user, "/api/cashback/claim", json!({ "amount": "0.25" }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_zero_claim_is_invalid() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    losing_round(&ctx, user).await;

    let response = ctx
        .post_as(user, "/api/cashback/claim", json!({ "amount": "0" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_user_endpoints_require_identity() {
    let ctx = TestContext::new();

    let response = ctx.server.get("/api/cashback/summary").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let (code, _) = parse_error(&response.json::<Value>());
    assert_eq!(code, "UNAUTHORIZED_MISSING_IDENTITY");

    let response = ctx
        .server
        .post("/api/cashback/claim")
        .json(&json!({ "amount": "1" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_new_user_summary_starts_at_lowest_tier() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();

    let summary = ctx.get_as(user, "/api/cashback/summary").await.json::<Value>();
    assert_eq!(summary["tier"]["name"], "Bronze");
    assert_eq!(summary["tier"]["level"], 1);
    assert_eq!(decimal(&summary["total_ggr"]), Decimal::ZERO);
    assert_eq!(decimal(&summary["level_progress"]), Decimal::ZERO);
    assert_eq!(decimal(&summary["available_cashback"]), Decimal::ZERO);
}

#[tokio::test]
async fn test_earnings_history_is_newest_first() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(1000)).await;

    for (wager, result, round) in [("w-a", "r-a", "round-a"), ("w-b", "r-b", "round-b")] {
        ctx.provider(provider_event(wager, "wager", &account, round, "100"))
            .await;
        ctx.provider(provider_event(result, "result", &account, round, "0"))
            .await;
    }

    let services = ctx.services.clone();
    let earnings = eventually(|| {
        let services = services.clone();
        async move {
            let earnings = services.accrual.earnings(user, 10, 0).await.ok()?;
            (earnings.len() == 2).then_some(earnings)
        }
    })
    .await
    .expect("both rounds accrued");
    assert!(earnings[0].created_at >= earnings[1].created_at);

    let body = ctx
        .get_as_with_query(user, "/api/cashback/earnings", &[("limit", "1"), ("offset", "0")])
        .await
        .json::<Value>();
    assert_eq!(body["earnings"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["earnings"][0]["id"], json!(earnings[0].id));
    assert_eq!(body["limit"], 1);
}

#[tokio::test]
async fn test_rollback_on_result_voids_unclaimed_cashback() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = losing_round(&ctx, user).await;

    let body = ctx
        .provider(provider_event("res-1", "rollback_on_result", &account, "round-1", "0"))
        .await;
    assert_eq!(body["code"], 200);

    let services = ctx.services.clone();
    let summary = eventually(|| {
        let services = services.clone();
        async move {
            let summary = services.accrual.summary(user).await.ok()?;
            summary.available_cashback.is_zero().then_some(summary)
        }
    })
    .await
    .expect("earning voided");
    assert_eq!(summary.total_ggr, Decimal::ZERO);
    assert_eq!(summary.tier.name, "Bronze");
}

#[tokio::test]
async fn test_rollback_of_settled_wager_voids_cashback() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = losing_round(&ctx, user).await;

    ctx.provider(provider_event("w-1", "rollback", &account, "round-1", "1000"))
        .await;

    let services = ctx.services.clone();
    let voided = eventually(|| {
        let services = services.clone();
        async move {
            let summary = services.accrual.summary(user).await.ok()?;
            summary.available_cashback.is_zero().then_some(())
        }
    })
    .await;
    assert!(voided.is_some());

    let balance = ctx.services.processor.balance(user, CURRENCY).await.unwrap();
    assert_eq!(balance, dec!(2000));
}
