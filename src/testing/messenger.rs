use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;

use crate::{comms::Messenger, common::error::EscrowError, protocol::TradeEnvelope};

/// Collects outbound envelopes instead of delivering them.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(Url, TradeEnvelope)>>,
    offline: AtomicBool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains everything sent so far, in send order.
    pub async fn take_sent(&self) -> Vec<(Url, TradeEnvelope)> {
        std::mem::take(&mut *self.sent.lock().await)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, to: Url, envelope: TradeEnvelope) -> Result<(), EscrowError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(EscrowError::Simple(format!(
                "Messenger offline, {} to {} not sent",
                envelope.kind(),
                to
            )));
        }
        self.sent.lock().await.push((to, envelope));
        Ok(())
    }
}
