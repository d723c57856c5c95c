use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::{
    common::error::EscrowError,
    protocol::{TradeAccess, TradeProtocol},
};

/// Maps a TradeUUID to the actor that owns the trade.
pub(super) struct Router {
    protocols: HashMap<Uuid, TradeProtocol>,
}

impl Router {
    pub(super) fn new() -> Self {
        Router {
            protocols: HashMap::new(),
        }
    }

    pub(super) fn register(
        &mut self,
        trade_uuid: Uuid,
        protocol: TradeProtocol,
    ) -> Result<TradeAccess, EscrowError> {
        debug!("register() for TradeUUID {}", trade_uuid);
        if self.protocols.contains_key(&trade_uuid) {
            protocol.task_handle.abort();
            return Err(EscrowError::Simple(format!(
                "register() for TradeUUID {} already registered",
                trade_uuid
            )));
        }
        let access = protocol.new_accessor();
        self.protocols.insert(trade_uuid, protocol);
        Ok(access)
    }

    pub(super) fn unregister(&mut self, trade_uuid: Uuid) -> Option<TradeProtocol> {
        debug!("unregister() for TradeUUID {}", trade_uuid);
        self.protocols.remove(&trade_uuid)
    }

    pub(super) fn contains(&self, trade_uuid: &Uuid) -> bool {
        self.protocols.contains_key(trade_uuid)
    }

    pub(super) fn accessor(&self, trade_uuid: &Uuid) -> Option<TradeAccess> {
        self.protocols
            .get(trade_uuid)
            .map(|protocol| protocol.new_accessor())
    }

    pub(super) fn accessors(&self) -> HashMap<Uuid, TradeAccess> {
        self.protocols
            .iter()
            .map(|(trade_uuid, protocol)| (*trade_uuid, protocol.new_accessor()))
            .collect()
    }

    pub(super) fn drain(&mut self) -> Vec<(Uuid, TradeProtocol)> {
        self.protocols.drain().collect()
    }
}
