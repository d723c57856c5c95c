use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    common::{
        error::EscrowError,
        utils::{persist, restore},
    },
    dispute::DisputeCase,
    trade::Trade,
};

use super::{
    record::{decode, encode_dispute_case, encode_trade, DecodedRecord},
    DurableStore, LoadedRecords,
};

const TRADE_SUFFIX: &str = "-trade.json";
const DISPUTE_SUFFIX: &str = "-dispute.json";
const ARCHIVE_DIR: &str = "archive";

/// One JSON file per trade and per dispute case under a data directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir_path: PathBuf,
}

impl FileStore {
    pub async fn new(dir_path: impl AsRef<Path>) -> Result<Self, EscrowError> {
        let dir_path = dir_path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(dir_path.join(ARCHIVE_DIR)).await?;
        Ok(Self { dir_path })
    }

    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    pub fn trade_path(&self, trade_uuid: Uuid) -> PathBuf {
        self.dir_path.join(format!("{}{}", trade_uuid, TRADE_SUFFIX))
    }

    pub fn dispute_case_path(&self, trade_uuid: Uuid) -> PathBuf {
        self.dir_path.join(format!("{}{}", trade_uuid, DISPUTE_SUFFIX))
    }

    async fn archive_file(&self, path: PathBuf) -> Result<(), EscrowError> {
        if !tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        let Some(file_name) = path.file_name() else {
            return Ok(());
        };
        let archive_path = self.dir_path.join(ARCHIVE_DIR).join(file_name);
        tokio::fs::rename(&path, &archive_path).await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn save_trade(&self, trade: &Trade) -> Result<(), EscrowError> {
        let json = encode_trade(trade)?;
        persist(json, self.trade_path(trade.trade_uuid())).await
    }

    async fn save_dispute_case(&self, case: &DisputeCase) -> Result<(), EscrowError> {
        let json = encode_dispute_case(case)?;
        persist(json, self.dispute_case_path(case.trade_uuid())).await
    }

    async fn load_all(&self) -> Result<LoadedRecords, EscrowError> {
        let mut loaded = LoadedRecords::default();
        let mut entries = tokio::fs::read_dir(&self.dir_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !file_name.ends_with(TRADE_SUFFIX) && !file_name.ends_with(DISPUTE_SUFFIX) {
                continue;
            }

            let json = match restore(&path).await {
                Ok(json) => json,
                Err(error) => {
                    warn!("Skipping unreadable record {} - {}", path.display(), error);
                    loaded.failures.push(error);
                    continue;
                }
            };

            match decode(&json) {
                Ok(DecodedRecord::Trade(trade)) => {
                    debug!("Restored Trade w/ TradeUUID {}", trade.trade_uuid());
                    loaded.trades.push(trade);
                }
                Ok(DecodedRecord::DisputeCase(case)) => {
                    loaded.dispute_cases.insert(case.trade_uuid(), case);
                }
                Err(error) => {
                    warn!("Skipping corrupt record {} - {}", path.display(), error);
                    loaded.failures.push(EscrowError::DeserializationFailure(format!(
                        "{} - {}",
                        path.display(),
                        error
                    )));
                }
            }
        }
        Ok(loaded)
    }

    async fn archive(&self, trade_uuid: Uuid) -> Result<(), EscrowError> {
        self.archive_file(self.dispute_case_path(trade_uuid)).await?;
        self.archive_file(self.trade_path(trade_uuid)).await
    }
}
