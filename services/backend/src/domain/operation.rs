use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shared::OPERATION_LEASE_MS;
use std::str::FromStr;
use uuid::Uuid;

use super::Settlement;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Succeeded,
    /// Permanent failure, frozen until replayed
    Failed,
    /// Retry budget exhausted, frozen until replayed
    Dead,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Succeeded => "succeeded",
            OperationStatus::Failed => "failed",
            OperationStatus::Dead => "dead",
        }
    }

    pub fn is_replayable(&self) -> bool {
        matches!(self, OperationStatus::Failed | OperationStatus::Dead)
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(OperationStatus::Pending),
            "succeeded" => Ok(OperationStatus::Succeeded),
            "failed" => Ok(OperationStatus::Failed),
            "dead" => Ok(OperationStatus::Dead),
            other => Err(format!("unknown operation status: {}", other)),
        }
    }
}

/// Post-commit side effects routed through the retry layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationPayload {
    AccrueCashback(Settlement),
    VoidCashback {
        user_id: Uuid,
        source_transaction_id: String,
    },
    ReconcileBalance {
        account_id: String,
    },
}

impl OperationPayload {
    pub fn operation_type(&self) -> &'static str {
        match self {
            OperationPayload::AccrueCashback(_) => "accrue_cashback",
            OperationPayload::VoidCashback { .. } => "void_cashback",
            OperationPayload::ReconcileBalance { .. } => "reconcile_balance",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryableOperation {
    pub id: Uuid,
    pub operation_type: String,
    pub payload: serde_json::Value,
    pub attempt_count: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: OperationStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetryableOperation {
    /// Outbox row committed with a posting
    ///
    /// Held for one lease so the inline attempt runs first; if that attempt
    /// never reports back the sweeper takes the row once the lease lapses.
    pub fn queued(payload: &OperationPayload, now: DateTime<Utc>) -> serde_json::Result<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            operation_type: payload.operation_type().to_string(),
            payload: serde_json::to_value(payload)?,
            attempt_count: 0,
            next_attempt_at: now + Duration::milliseconds(OPERATION_LEASE_MS),
            status: OperationStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn decode(&self) -> serde_json::Result<OperationPayload> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_payload_tagging() {
        let payload = OperationPayload::VoidCashback {
            user_id: Uuid::nil(),
            source_transaction_id: "tx-1".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "void_cashback");
        assert_eq!(json["source_transaction_id"], "tx-1");
        assert_eq!(payload.operation_type(), "void_cashback");
    }

    #[test]
    fn test_settlement_payload_decodes() {
        let settlement = Settlement {
            user_id: Uuid::new_v4(),
            account_id: "acc".to_string(),
            source_transaction_id: "w-1".to_string(),
            settling_transaction_id: "res-1".to_string(),
            round_id: "r-1".to_string(),
            game_id: Some("slots-1".to_string()),
            bet_amount: dec!(100),
            win_amount: dec!(0),
            currency: "USD".to_string(),
            settled_at: Utc::now(),
        };
        let payload = OperationPayload::AccrueCashback(settlement.clone());
        let op = RetryableOperation {
            id: Uuid::new_v4(),
            operation_type: payload.operation_type().to_string(),
            payload: serde_json::to_value(&payload).unwrap(),
            attempt_count: 1,
            next_attempt_at: Utc::now(),
            status: OperationStatus::Pending,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(op.decode().unwrap(), OperationPayload::AccrueCashback(settlement));
    }

    #[test]
    fn test_queued_row_waits_one_lease() {
        let now = Utc::now();
        let payload = OperationPayload::ReconcileBalance {
            account_id: "acc".to_string(),
        };
        let op = RetryableOperation::queued(&payload, now).unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempt_count, 0);
        assert_eq!(op.operation_type, "reconcile_balance");
        assert_eq!(op.next_attempt_at, now + Duration::milliseconds(OPERATION_LEASE_MS));
        assert_eq!(op.decode().unwrap(), payload);
    }

    #[test]
    fn test_only_frozen_statuses_replay() {
        assert!(OperationStatus::Dead.is_replayable());
        assert!(OperationStatus::Failed.is_replayable());
        assert!(!OperationStatus::Pending.is_replayable());
        assert!(!OperationStatus::Succeeded.is_replayable());
    }
}
