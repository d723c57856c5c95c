use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{common::error::EscrowError, trade::TradeState};

/// Maximum time a trade may sit in a state before the protocol opens a
/// `NoReply` dispute on its own. `None` disables the deadline for that state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub initiated_ms: Option<u64>,
    pub deposit_published_ms: Option<u64>,
    pub payment_started_ms: Option<u64>,
    pub payment_received_ms: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            initiated_ms: Some(10 * 60 * 1000),
            deposit_published_ms: Some(2 * 24 * 60 * 60 * 1000),
            payment_started_ms: Some(6 * 24 * 60 * 60 * 1000),
            payment_received_ms: Some(24 * 60 * 60 * 1000),
        }
    }
}

impl TimeoutConfig {
    pub fn disabled() -> Self {
        Self {
            initiated_ms: None,
            deposit_published_ms: None,
            payment_started_ms: None,
            payment_received_ms: None,
        }
    }

    pub fn for_state(&self, state: TradeState) -> Option<Duration> {
        let millis = match state {
            TradeState::Initiated => self.initiated_ms,
            TradeState::DepositPublished => self.deposit_published_ms,
            TradeState::PaymentStarted => self.payment_started_ms,
            TradeState::PaymentReceived => self.payment_received_ms,
            // Waiting on the arbitrator has no deadline, terminal states have nothing to wait for
            TradeState::DisputeOpened
            | TradeState::Completed
            | TradeState::DisputeClosed
            | TradeState::Failed => None,
        };
        millis.map(Duration::from_millis)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 2000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeConfig {
    pub trader_id: u32,
    pub data_dir: PathBuf,
    pub request_channel_size: usize,
    pub timeouts: TimeoutConfig,
    pub ledger_retry: RetryPolicy,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            trader_id: 0,
            data_dir: PathBuf::from("escrow_data"),
            request_channel_size: 10,
            timeouts: TimeoutConfig::default(),
            ledger_retry: RetryPolicy::default(),
        }
    }
}

impl TradeConfig {
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EscrowError> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: TradeConfig = serde_json::from_str(&json)?;
        Ok(config)
    }
}
