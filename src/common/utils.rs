use std::path::Path;

use crate::common::error::EscrowError;

// Write to a sibling temp file first so a crash never leaves a half written record behind
pub(crate) async fn persist(json: String, path: impl AsRef<Path>) -> Result<(), EscrowError> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub(crate) async fn restore(path: impl AsRef<Path>) -> Result<String, EscrowError> {
    let json = tokio::fs::read_to_string(path.as_ref()).await?;
    Ok(json)
}
