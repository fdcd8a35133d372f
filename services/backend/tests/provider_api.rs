/// Aggregator endpoint behavior over the in-memory ledger
mod common;

use axum::http::StatusCode;
use common::{decimal, parse_error, provider_event, TestContext, CURRENCY};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn test_wager_debits_balance_and_mirror() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(100)).await;

    let body = ctx
        .provider(provider_event("tx-1", "wager", &account, "round-1", "25.50"))
        .await;

    assert_eq!(body["code"], 200);
    assert_eq!(body["status"], "Success");
    assert_eq!(body["transaction_id"], "tx-1");
    assert_eq!(decimal(&body["balance"]), dec!(74.50));
    assert_eq!(decimal(&body["real_balance"]), dec!(74.50));
    assert_eq!(decimal(&body["bonus_balance"]), Decimal::ZERO);
    assert_eq!(body["api_version"], "1.2");
    assert!(body["account_transaction_id"].is_string());

    let mirror = ctx
        .server
        .get(&format!("/api/provider/accounts/{}/balance", account))
        .await
        .json::<Value>();
    assert_eq!(decimal(&mirror["balance"]), dec!(74.50));

    let store = ctx.get_as(user, "/api/balance").await.json::<Value>();
    assert_eq!(decimal(&store["balance"]), dec!(74.50));
    assert_eq!(store["currency"], CURRENCY);
}

#[tokio::test]
async fn test_duplicate_wager_returns_stored_result() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(100)).await;
    let event = provider_event("tx-dup", "wager", &account, "round-1", "10");

    let first = ctx.provider(event.clone()).await;
    let count = ctx.store.transaction_count();
    let second = ctx.provider(event).await;

    assert_eq!(second["code"], 200);
    assert_eq!(second["status"], "Success - duplicate request");
    assert_eq!(decimal(&second["balance"]), dec!(90));
    assert_eq!(second["account_transaction_id"], first["account_transaction_id"]);
    assert_eq!(ctx.store.transaction_count(), count);

    let balance = ctx.services.processor.balance(user, CURRENCY).await.unwrap();
    assert_eq!(balance, dec!(90));
}

#[tokio::test]
async fn test_insufficient_funds_is_rejected_without_mutation() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(5)).await;

    let body = ctx
        .provider(provider_event("tx-big", "wager", &account, "round-1", "50"))
        .await;

    assert_eq!(body["code"], 1006);
    assert_eq!(body["status"], "Out of money");
    assert_eq!(decimal(&body["balance"]), dec!(5));
    assert_eq!(ctx.store.transaction_count(), 0);
}

#[tokio::test]
async fn test_rollback_without_original_is_wager_not_found() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(20)).await;

    let body = ctx
        .provider(provider_event("tx-missing", "rollback", &account, "round-1", "10"))
        .await;

    assert_eq!(body["code"], 102);
    assert_eq!(body["status"], "Wager not found");
    assert_eq!(decimal(&body["balance"]), dec!(20));
}

#[tokio::test]
async fn test_unknown_account_is_not_allowed() {
    let ctx = TestContext::new();

    let body = ctx
        .provider(provider_event("tx-1", "wager", "no-such-account", "round-1", "1"))
        .await;

    assert_eq!(body["code"], 110);
    assert_eq!(decimal(&body["balance"]), Decimal::ZERO);
}

#[tokio::test]
async fn test_rollback_restores_wager_and_blocks_replay() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(100)).await;

    ctx.provider(provider_event("tx-r", "wager", &account, "round-1", "40"))
        .await;
    let rollback = ctx
        .provider(provider_event("tx-r", "rollback", &account, "round-1", "40"))
        .await;
    assert_eq!(rollback["code"], 200);
    assert_eq!(decimal(&rollback["balance"]), dec!(100));

    // The reversed wager can no longer be replayed
    let replay = ctx
        .provider(provider_event("tx-r", "wager", &account, "round-1", "40"))
        .await;
    assert_eq!(replay["code"], 110);

    // A second rollback is a duplicate of the first
    let again = ctx
        .provider(provider_event("tx-r", "rollback", &account, "round-1", "40"))
        .await;
    assert_eq!(again["status"], "Success - duplicate request");
    assert_eq!(decimal(&again["balance"]), dec!(100));
}

#[tokio::test]
async fn test_rollback_on_rollback_debits_again() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(100)).await;

    ctx.provider(provider_event("tx-rr", "wager", &account, "round-1", "30"))
        .await;
    ctx.provider(provider_event("tx-rr", "rollback", &account, "round-1", "30"))
        .await;
    let body = ctx
        .provider(provider_event("tx-rr", "rollback_on_rollback", &account, "round-1", "30"))
        .await;

    assert_eq!(body["code"], 200);
    assert_eq!(decimal(&body["balance"]), dec!(70));

    // Rolling back the rollback twice is not allowed
    let again = ctx
        .provider(provider_event("tx-rr", "rollback", &account, "round-1", "30"))
        .await;
    assert_eq!(again["code"], 110);
}

#[tokio::test]
async fn test_winning_round_credits_without_cashback() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(100)).await;

    ctx.provider(provider_event("tx-w", "wager", &account, "round-7", "10"))
        .await;
    let result = ctx
        .provider(provider_event("tx-res", "result", &account, "round-7", "35"))
        .await;
    assert_eq!(decimal(&result["balance"]), dec!(125));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let summary = ctx.get_as(user, "/api/cashback/summary").await.json::<Value>();
    assert_eq!(decimal(&summary["available_cashback"]), Decimal::ZERO);
    assert_eq!(decimal(&summary["total_ggr"]), Decimal::ZERO);
}

#[tokio::test]
async fn test_losing_round_accrues_cashback() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(2000)).await;

    ctx.provider(provider_event("tx-l", "wager", &account, "round-9", "1000"))
        .await;
    ctx.provider(provider_event("tx-l-res", "result", &account, "round-9", "0"))
        .await;

    // 1000 * 0.5 edge = 500 GGR, Bronze pays 0.5%
    let available = ctx.wait_for_cashback(user).await;
    assert_eq!(available, dec!(2.5));

    let summary = ctx.get_as(user, "/api/cashback/summary").await.json::<Value>();
    assert_eq!(decimal(&summary["total_ggr"]), dec!(500));
    assert_eq!(summary["tier"]["name"], "Bronze");
}

#[tokio::test]
async fn test_wager_and_result_settles_in_one_event() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(500)).await;

    let mut event = provider_event("tx-wr", "wager_and_result", &account, "round-3", "200");
    event["win_amount"] = json!("40");
    let body = ctx.provider(event).await;

    assert_eq!(body["code"], 200);
    assert_eq!(decimal(&body["balance"]), dec!(340));

    // Net loss of 160 on a 200 stake: GGR is on the stake
    let available = ctx.wait_for_cashback(user).await;
    assert_eq!(available, dec!(0.5));
}

#[tokio::test]
async fn test_balance_store_and_mirror_stay_equal() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(1000)).await;

    let events = [
        provider_event("a", "wager", &account, "r1", "100"),
        provider_event("b", "result", &account, "r1", "250"),
        provider_event("c", "wager", &account, "r2", "75.25"),
        provider_event("c", "rollback", &account, "r2", "75.25"),
        provider_event("d", "jackpot", &account, "r3", "10"),
        provider_event("b", "rollback_on_result", &account, "r1", "250"),
    ];
    for event in events {
        let body = ctx.provider(event).await;
        assert_eq!(body["code"], 200);
    }

    let mirror = ctx.services.processor.account(&account).await.unwrap();
    let store = ctx.services.processor.balance(user, CURRENCY).await.unwrap();
    assert_eq!(store, dec!(910));
    assert_eq!(mirror.balance, store);
}

#[tokio::test]
async fn test_malformed_requests_are_bad_request() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(10)).await;

    let negative = ctx
        .server
        .post("/api/provider/transactions")
        .json(&provider_event("tx-neg", "wager", &account, "round-1", "-5"))
        .await;
    assert_eq!(negative.status_code(), StatusCode::BAD_REQUEST);
    let (_, category) = parse_error(&negative.json::<Value>());
    assert_eq!(category, "Validation");

    let empty_id = ctx
        .server
        .post("/api/provider/transactions")
        .json(&provider_event("  ", "wager", &account, "round-1", "5"))
        .await;
    assert_eq!(empty_id.status_code(), StatusCode::BAD_REQUEST);

    let unknown_kind = provider_event("tx-k", "bonus", &account, "round-1", "5");
    let response = ctx
        .server
        .post("/api/provider/transactions")
        .json(&unknown_kind)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    assert_eq!(ctx.store.transaction_count(), 0);
}

#[tokio::test]
async fn test_account_creation_is_idempotent() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();

    let first = ctx.funded_account(user, Decimal::ZERO).await;
    let second = ctx.funded_account(user, Decimal::ZERO).await;
    assert_eq!(first, second);

    let missing = ctx
        .server
        .get("/api/provider/accounts/nope/balance")
        .await
        .json::<Value>();
    assert_eq!(missing["code"], 110);
}

#[tokio::test]
async fn test_concurrent_wagers_serialize_per_account() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(100)).await;

    // 15 distinct keys, each sent twice, against funds for 10
    let events: Vec<Value> = (0..30)
        .map(|i| provider_event(&format!("cw-{}", i % 15), "wager", &account, &format!("r-{}", i % 15), "10"))
        .collect();
    let bodies = futures::future::join_all(events.into_iter().map(|e| ctx.provider(e))).await;

    let accepted: std::collections::HashSet<String> = bodies
        .iter()
        .filter(|b| b["code"] == 200)
        .map(|b| b["transaction_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(accepted.len(), 10);
    assert!(bodies.iter().all(|b| b["code"] == 200 || b["code"] == 1006));
    assert!(bodies.iter().all(|b| decimal(&b["balance"]) >= Decimal::ZERO));

    let store = ctx.services.processor.balance(user, CURRENCY).await.unwrap();
    let mirror = ctx.services.processor.account(&account).await.unwrap();
    assert_eq!(store, Decimal::ZERO);
    assert_eq!(mirror.balance, store);
    assert_eq!(ctx.store.transaction_count(), accepted.len());
}

#[tokio::test]
async fn test_wager_batch_debits_once() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(100)).await;
    let batch = json!({
        "account_id": account,
        "game_id": "slot-1",
        "bets": [
            { "transaction_id": "bb-1", "round_id": "r-1", "amount": "30" },
            { "transaction_id": "bb-2", "round_id": "r-2", "amount": "45.5" },
        ],
    });

    let response = ctx.server.post("/api/provider/transactions/batch").json(&batch).await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["code"], 200);
    assert_eq!(body["status"], "Success");
    assert_eq!(decimal(&body["balance"]), dec!(24.5));
    assert_eq!(body["bets"].as_array().unwrap().len(), 2);
    assert_eq!(body["bets"][1]["transaction_id"], "bb-2");
    assert_eq!(decimal(&body["bets"][1]["real_money_bet"]), dec!(45.5));
    assert_eq!(decimal(&body["bets"][1]["bonus_money_bet"]), Decimal::ZERO);

    // the whole batch again is a replay
    let replay = ctx
        .server
        .post("/api/provider/transactions/batch")
        .json(&batch)
        .await
        .json::<Value>();
    assert_eq!(replay["status"], "Success - duplicate request");
    assert_eq!(replay["bets"][0]["account_transaction_id"], body["bets"][0]["account_transaction_id"]);
    assert_eq!(decimal(&replay["balance"]), dec!(24.5));
    assert_eq!(ctx.store.transaction_count(), 2);

    let mirror = ctx.services.processor.account(&account).await.unwrap();
    assert_eq!(mirror.balance, dec!(24.5));
}

#[tokio::test]
async fn test_wager_batch_over_balance_posts_nothing() {
    let ctx = TestContext::new();
    let user = Uuid::new_v4();
    let account = ctx.funded_account(user, dec!(50)).await;

    let body = ctx
        .server
        .post("/api/provider/transactions/batch")
        .json(&json!({
            "account_id": account,
            "bets": [
                { "transaction_id": "bo-1", "round_id": "r-1", "amount": "30" },
                { "transaction_id": "bo-2", "round_id": "r-2", "amount": "30" },
            ],
        }))
        .await
        .json::<Value>();
    assert_eq!(body["code"], 1006);
    assert_eq!(decimal(&body["balance"]), dec!(50));
    assert!(body["bets"].as_array().unwrap().is_empty());
    assert_eq!(ctx.store.transaction_count(), 0);

    let empty = ctx
        .server
        .post("/api/provider/transactions/batch")
        .json(&json!({ "account_id": account, "bets": [] }))
        .await;
    assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);
}
