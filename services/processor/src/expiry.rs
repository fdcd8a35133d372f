use async_trait::async_trait;
use backend::errors::LedgerError;
use backend::services::AccrualEngine;
use std::sync::Arc;

use crate::scheduler::PeriodicJob;

/// Flips available earnings past their TTL to expired
pub struct CashbackExpiry {
    accrual: Arc<AccrualEngine>,
}

impl CashbackExpiry {
    pub fn new(accrual: Arc<AccrualEngine>) -> Self {
        Self { accrual }
    }
}

#[async_trait]
impl PeriodicJob for CashbackExpiry {
    fn name(&self) -> &'static str {
        "cashback_expiry"
    }

    async fn run_once(&self) -> Result<u64, LedgerError> {
        let expired = self.accrual.expire().await?;
        metrics::counter!("cashback_earnings_expired_total").increment(expired);
        Ok(expired)
    }
}
