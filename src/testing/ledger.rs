use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    common::types::Amount,
    escrow::{LedgerAdapter, LedgerFailure, LedgerRef, PayoutRequest},
};

/// Accepts everything unless told to fail, and remembers what it was asked to do.
#[derive(Default)]
pub struct MemoryLedger {
    deposits: Mutex<Vec<(Uuid, Amount)>>,
    payouts: Mutex<Vec<PayoutRequest>>,
    deposit_failures: Mutex<VecDeque<LedgerFailure>>,
    payout_failures: Mutex<VecDeque<LedgerFailure>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` deposit attempts fail with `failure`.
    pub async fn fail_deposits(&self, failure: LedgerFailure, times: usize) {
        let mut failures = self.deposit_failures.lock().await;
        failures.extend(std::iter::repeat(failure).take(times));
    }

    /// The next `times` payout attempts fail with `failure`.
    pub async fn fail_payouts(&self, failure: LedgerFailure, times: usize) {
        let mut failures = self.payout_failures.lock().await;
        failures.extend(std::iter::repeat(failure).take(times));
    }

    pub async fn deposits(&self) -> Vec<(Uuid, Amount)> {
        self.deposits.lock().await.clone()
    }

    pub async fn payouts(&self) -> Vec<PayoutRequest> {
        self.payouts.lock().await.clone()
    }
}

#[async_trait]
impl LedgerAdapter for MemoryLedger {
    async fn publish_deposit(
        &self,
        trade_uuid: Uuid,
        amount: Amount,
    ) -> Result<LedgerRef, LedgerFailure> {
        if let Some(failure) = self.deposit_failures.lock().await.pop_front() {
            return Err(failure);
        }
        self.deposits.lock().await.push((trade_uuid, amount));
        Ok(format!("deposit-{}", trade_uuid))
    }

    async fn request_payout(&self, request: PayoutRequest) -> Result<LedgerRef, LedgerFailure> {
        if let Some(failure) = self.payout_failures.lock().await.pop_front() {
            return Err(failure);
        }
        let ledger_ref = format!("payout-{}-{}", request.trade_uuid, request.publisher);
        self.payouts.lock().await.push(request);
        Ok(ledger_ref)
    }
}
