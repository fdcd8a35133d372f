//! Common test utilities and fixtures for integration tests
#![allow(dead_code)]

use axum::http::{HeaderName, HeaderValue};
use axum_test::{TestResponse, TestServer};
use backend::{
    build_router,
    config::Config,
    fanout::{FanoutHub, StaticSessionAuthenticator},
    repository::MemoryStore,
    services::{LedgerServices, RetryPolicy, Stores},
    state::AppState,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use shared::DEFAULT_PROVIDER_OPERATOR;
use std::{future::Future, sync::Arc, time::Duration};
use uuid::Uuid;

pub const CURRENCY: &str = "USD";

/// House edge used by every context; 1_000 staked yields 500 GGR
pub const HOUSE_EDGE: Decimal = dec!(0.5);

/// In-memory backend wired exactly like production, minus Postgres and Redis
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub services: LedgerServices,
    pub hub: Arc<FanoutHub>,
    pub sessions: Arc<StaticSessionAuthenticator>,
    pub state: AppState,
    pub server: TestServer,
}

impl TestContext {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::with_default_tiers());
        store.set_house_edge(DEFAULT_PROVIDER_OPERATOR, None, HOUSE_EDGE);

        let config = Config::default();
        let hub = Arc::new(FanoutHub::new(16));
        let services = LedgerServices::build(
            Stores::memory(store.clone()),
            hub.clone(),
            config.accrual_settings(),
            RetryPolicy::default(),
        );
        let sessions = Arc::new(StaticSessionAuthenticator::new());
        let state = AppState::new(config, services.clone(), hub.clone(), sessions.clone());
        let server = TestServer::new(build_router(state.clone())).expect("Failed to start test server");

        Self {
            store,
            services,
            hub,
            sessions,
            state,
            server,
        }
    }

    /// Create the provider account and fund it outside the aggregator flow
    pub async fn funded_account(&self, user_id: Uuid, amount: Decimal) -> String {
        let response = self
            .server
            .post("/api/provider/accounts")
            .json(&json!({ "user_id": user_id, "currency": CURRENCY }))
            .await;
        response.assert_status_ok();
        let account_id = response.json::<Value>()["account_id"]
            .as_str()
            .expect("account_id missing")
            .to_string();

        if amount > Decimal::ZERO {
            self.store.deposit(user_id, CURRENCY, amount);
        }
        account_id
    }

    pub async fn provider(&self, body: Value) -> Value {
        let response = self.server.post("/api/provider/transactions").json(&body).await;
        response.assert_status_ok();
        response.json::<Value>()
    }

    pub async fn get_as(&self, user_id: Uuid, path: &str) -> TestResponse {
        self.get_as_with_query(user_id, path, &[]).await
    }

    pub async fn get_as_with_query(&self, user_id: Uuid, path: &str, query: &[(&str, &str)]) -> TestResponse {
        let mut request = self.server.get(path).add_header(user_header(), user_value(user_id));
        for (key, value) in query {
            request = request.add_query_param(key, value);
        }
        request.await
    }

    pub async fn post_as(&self, user_id: Uuid, path: &str, body: Value) -> TestResponse {
        self.server
            .post(path)
            .add_header(user_header(), user_value(user_id))
            .json(&body)
            .await
    }

    pub async fn put_as(&self, user_id: Uuid, path: &str, body: Value) -> TestResponse {
        self.server
            .put(path)
            .add_header(user_header(), user_value(user_id))
            .json(&body)
            .await
    }

    /// Available cashback once deferred accrual has landed
    pub async fn wait_for_cashback(&self, user_id: Uuid) -> Decimal {
        let services = self.services.clone();
        eventually(|| {
            let services = services.clone();
            async move {
                let summary = services.accrual.summary(user_id).await.ok()?;
                (summary.available_cashback > Decimal::ZERO).then_some(summary.available_cashback)
            }
        })
        .await
        .expect("cashback never accrued")
    }
}

pub fn provider_event(
    transaction_id: &str,
    kind: &str,
    account_id: &str,
    round_id: &str,
    amount: &str,
) -> Value {
    json!({
        "transaction_id": transaction_id,
        "kind": kind,
        "account_id": account_id,
        "round_id": round_id,
        "game_id": "slot-1",
        "amount": amount,
    })
}

/// Decimals are serialized as strings
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("not a decimal string"),
        Value::Number(n) => n.to_string().parse().expect("not a decimal number"),
        other => panic!("expected decimal, got {}", other),
    }
}

/// Parse error response into components
pub fn parse_error(body: &Value) -> (String, String) {
    let error = &body["error"];
    (
        error["code"].as_str().unwrap_or_default().to_string(),
        error["category"].as_str().unwrap_or_default().to_string(),
    )
}

/// Poll until `check` yields a value, for work dispatched off the request path
pub async fn eventually<F, Fut, T>(mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..100 {
        if let Some(value) = check().await {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

fn user_header() -> HeaderName {
    HeaderName::from_static("x-user-id")
}

fn user_value(user_id: Uuid) -> HeaderValue {
    HeaderValue::from_str(&user_id.to_string()).expect("uuid is a valid header")
}
