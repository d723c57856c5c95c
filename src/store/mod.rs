mod file;
mod memory;
mod record;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{common::error::EscrowError, dispute::DisputeCase, trade::Trade};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use record::{DisputeCaseRecord, TradeRecord, RECORD_VERSION};

/// Everything a store could read back, plus what it could not.
#[derive(Debug, Default)]
pub struct LoadedRecords {
    pub trades: Vec<Trade>,
    pub dispute_cases: HashMap<Uuid, DisputeCase>,
    pub failures: Vec<EscrowError>,
}

/// Persistence backend for trades and dispute cases. Each entity is written
/// independently and atomically; a failed write leaves the previous copy intact.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn save_trade(&self, trade: &Trade) -> Result<(), EscrowError>;

    async fn save_dispute_case(&self, case: &DisputeCase) -> Result<(), EscrowError>;

    /// Unreadable records are reported in `LoadedRecords::failures` and skipped.
    async fn load_all(&self) -> Result<LoadedRecords, EscrowError>;

    /// Moves the records of a settled trade out of the active set.
    async fn archive(&self, trade_uuid: Uuid) -> Result<(), EscrowError>;
}
