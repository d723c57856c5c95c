use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use uuid::Uuid;

use crusty_escrow::{
    common::error::EscrowError,
    dispute::DisputeCase,
    store::{DurableStore, LoadedRecords, MemoryStore},
    trade::Trade,
};

/// Wraps a `MemoryStore` and fails the next trade saves, like a full disk
/// hit between writing the dispute case and writing the trade.
pub struct FailingTradeStore {
    inner: Arc<MemoryStore>,
    failing_trade_saves: AtomicUsize,
}

impl FailingTradeStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_trade_saves: AtomicUsize::new(0),
        }
    }

    pub fn fail_trade_saves(&self, times: usize) {
        self.failing_trade_saves.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl DurableStore for FailingTradeStore {
    async fn save_trade(&self, trade: &Trade) -> Result<(), EscrowError> {
        let remaining = self.failing_trade_saves.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_trade_saves
                .store(remaining - 1, Ordering::SeqCst);
            return Err(EscrowError::Simple("Disk full".to_string()));
        }
        self.inner.save_trade(trade).await
    }

    async fn save_dispute_case(&self, case: &DisputeCase) -> Result<(), EscrowError> {
        self.inner.save_dispute_case(case).await
    }

    async fn load_all(&self) -> Result<LoadedRecords, EscrowError> {
        self.inner.load_all().await
    }

    async fn archive(&self, trade_uuid: Uuid) -> Result<(), EscrowError> {
        self.inner.archive(trade_uuid).await
    }
}
