use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    common::{
        error::EscrowError,
        types::{Amount, TradeSide},
    },
    config::RetryPolicy,
};

use super::payout::{validate_payout, Payout};

/// Reference to a transaction the ledger accepted (eg. a txid).
pub type LedgerRef = String;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub trade_uuid: Uuid,
    pub buyer_payout: Amount,
    pub seller_payout: Amount,
    pub publisher: TradeSide,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerFailure {
    InsufficientConfirmations,
    InsufficientFee,
    Rejected(String),
    Unavailable(String),
}

impl LedgerFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerFailure::InsufficientConfirmations | LedgerFailure::Unavailable(_)
        )
    }
}

impl fmt::Display for LedgerFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LedgerFailure::InsufficientConfirmations => write!(f, "Insufficient confirmations"),
            LedgerFailure::InsufficientFee => write!(f, "Insufficient fee"),
            LedgerFailure::Rejected(reason) => write!(f, "Transaction rejected - {}", reason),
            LedgerFailure::Unavailable(reason) => write!(f, "Ledger unavailable - {}", reason),
        }
    }
}

/// Wallet side of the escrow. Builds, signs and broadcasts the deposit and
/// payout transactions, and reports back once the ledger accepted them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    async fn publish_deposit(&self, trade_uuid: Uuid, amount: Amount)
        -> Result<LedgerRef, LedgerFailure>;

    async fn request_payout(&self, request: PayoutRequest) -> Result<LedgerRef, LedgerFailure>;
}

#[derive(Clone)]
pub(crate) struct RetryingLedger {
    adapter: Arc<dyn LedgerAdapter>,
    policy: RetryPolicy,
}

impl RetryingLedger {
    pub(crate) fn new(adapter: Arc<dyn LedgerAdapter>, policy: RetryPolicy) -> Self {
        Self { adapter, policy }
    }

    pub(crate) async fn publish_deposit(
        &self,
        trade_uuid: Uuid,
        amount: Amount,
    ) -> Result<LedgerRef, EscrowError> {
        self.with_retry("publish_deposit", trade_uuid, || {
            self.adapter.publish_deposit(trade_uuid, amount)
        })
        .await
    }

    pub(crate) async fn request_payout(
        &self,
        trade_uuid: Uuid,
        payout: Payout,
        total: Amount,
        publisher: TradeSide,
    ) -> Result<LedgerRef, EscrowError> {
        // Last line of defence. A payout breaking the sum invariant must never reach the adapter
        validate_payout(&payout, total)?;

        let request = PayoutRequest {
            trade_uuid,
            buyer_payout: payout.buyer,
            seller_payout: payout.seller,
            publisher,
        };
        self.with_retry("request_payout", trade_uuid, || {
            self.adapter.request_payout(request.clone())
        })
        .await
    }

    async fn with_retry<F, Fut>(
        &self,
        operation: &str,
        trade_uuid: Uuid,
        mut attempt_fn: F,
    ) -> Result<LedgerRef, EscrowError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<LedgerRef, LedgerFailure>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Ok(ledger_ref) => {
                    debug!(
                        "Trade w/ TradeUUID {} ledger {} accepted as {} on attempt {}",
                        trade_uuid, operation, ledger_ref, attempt
                    );
                    return Ok(ledger_ref);
                }
                Err(failure) if failure.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "Trade w/ TradeUUID {} ledger {} attempt {}/{} failed - {}. Retrying",
                        trade_uuid, operation, attempt, max_attempts, failure
                    );
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(self.policy.backoff_ms)).await;
                }
                Err(failure) => {
                    error!(
                        "Trade w/ TradeUUID {} ledger {} gave up after {} attempt(s) - {}",
                        trade_uuid, operation, attempt, failure
                    );
                    return Err(EscrowError::LedgerFailure(failure));
                }
            }
        }
    }
}
