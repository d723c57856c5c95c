use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{common::error::EscrowError, dispute::DisputeCase, trade::Trade};

use super::{
    record::{decode, encode_dispute_case, encode_trade, DecodedRecord},
    DurableStore, LoadedRecords,
};

#[derive(Default)]
struct MemoryRecords {
    trades: HashMap<Uuid, String>,
    dispute_cases: HashMap<Uuid, String>,
    archived: HashMap<Uuid, (String, Option<String>)>,
}

/// Keeps the encoded records in memory. Records still go through the same
/// JSON encoding as `FileStore`, so a restore from it exercises the same path.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<MemoryRecords>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn trade_count(&self) -> usize {
        self.records.read().await.trades.len()
    }

    pub async fn is_archived(&self, trade_uuid: Uuid) -> bool {
        self.records.read().await.archived.contains_key(&trade_uuid)
    }

    /// Stores raw JSON as a trade record, eg. to simulate a damaged record.
    pub async fn insert_raw_trade(&self, trade_uuid: Uuid, json: impl Into<String>) {
        self.records
            .write()
            .await
            .trades
            .insert(trade_uuid, json.into());
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn save_trade(&self, trade: &Trade) -> Result<(), EscrowError> {
        let json = encode_trade(trade)?;
        self.records
            .write()
            .await
            .trades
            .insert(trade.trade_uuid(), json);
        Ok(())
    }

    async fn save_dispute_case(&self, case: &DisputeCase) -> Result<(), EscrowError> {
        let json = encode_dispute_case(case)?;
        self.records
            .write()
            .await
            .dispute_cases
            .insert(case.trade_uuid(), json);
        Ok(())
    }

    async fn load_all(&self) -> Result<LoadedRecords, EscrowError> {
        let records = self.records.read().await;
        let mut loaded = LoadedRecords::default();
        for json in records.trades.values().chain(records.dispute_cases.values()) {
            match decode(json) {
                Ok(DecodedRecord::Trade(trade)) => loaded.trades.push(trade),
                Ok(DecodedRecord::DisputeCase(case)) => {
                    loaded.dispute_cases.insert(case.trade_uuid(), case);
                }
                Err(error) => loaded.failures.push(error),
            }
        }
        Ok(loaded)
    }

    async fn archive(&self, trade_uuid: Uuid) -> Result<(), EscrowError> {
        let mut records = self.records.write().await;
        let Some(trade) = records.trades.remove(&trade_uuid) else {
            return Err(EscrowError::Simple(format!(
                "No record for TradeUUID {} to archive",
                trade_uuid
            )));
        };
        let case = records.dispute_cases.remove(&trade_uuid);
        records.archived.insert(trade_uuid, (trade, case));
        Ok(())
    }
}
