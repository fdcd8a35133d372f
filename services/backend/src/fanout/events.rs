use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Point-in-time snapshot pushed to a user's live connections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LedgerEvent {
    BalanceChanged {
        balance: Decimal,
        currency: String,
    },
    CashbackChanged {
        available_cashback: Decimal,
        tier: String,
    },
    WinNotification {
        bet_amount: Decimal,
        win_amount: Decimal,
        net_winnings: Decimal,
        game: Option<String>,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::BalanceChanged { .. } => "balance_changed",
            LedgerEvent::CashbackChanged { .. } => "cashback_changed",
            LedgerEvent::WinNotification { .. } => "win_notification",
        }
    }
}

/// Cross-process wrapper carried over the Redis channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub user_id: Uuid,
    pub event: LedgerEvent,
}
