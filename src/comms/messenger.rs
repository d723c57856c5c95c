use async_trait::async_trait;
use url::Url;

use crate::{common::error::EscrowError, protocol::TradeEnvelope};

/// Outbound half of the Messaging Layer. Transport, wire encoding and
/// delivery retries live behind this trait. Inbound envelopes are handed to
/// `TradeManager::route_message`.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, to: Url, envelope: TradeEnvelope) -> Result<(), EscrowError>;
}
