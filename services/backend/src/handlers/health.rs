use axum::{extract::State, Json};
use redis::AsyncCommands;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Pings the configured stores; in-memory runs report them as `not_configured`
pub async fn detailed_health(State(state): State<AppState>) -> Json<Value> {
    let database = match &state.db {
        Some(pool) => Some(sqlx::query("SELECT 1").fetch_one(pool).await.is_ok()),
        None => None,
    };

    let redis = match &state.redis {
        Some(conn) => {
            let mut conn = conn.clone();
            Some(
                conn.get::<_, Option<String>>("_health_check")
                    .await
                    .is_ok(),
            )
        }
        None => None,
    };

    let component = |reachable: Option<bool>| match reachable {
        Some(true) => "healthy",
        Some(false) => "unhealthy",
        None => "not_configured",
    };
    let healthy = database != Some(false) && redis != Some(false);

    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "components": {
            "database": component(database),
            "redis": component(redis),
            "websocket": {
                "connections": state.hub.total_connections(),
            },
        }
    }))
}
