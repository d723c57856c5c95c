use std::sync::Arc;

use url::Url;

use crusty_escrow::{
    config::TradeConfig,
    manager::{RouteOutcome, TradeManager},
    protocol::TradeEnvelope,
    store::{DurableStore, MemoryStore},
    testing::{MemoryLedger, RecordingMessenger, SomeTestParams},
};

pub struct Node {
    pub address: Url,
    pub manager: TradeManager,
    pub messenger: Arc<RecordingMessenger>,
    pub ledger: Arc<MemoryLedger>,
    pub store: Arc<MemoryStore>,
}

impl Node {
    pub async fn start(config: TradeConfig, address: Url) -> Self {
        Self::start_with_store(config, address, Arc::new(MemoryStore::new())).await
    }

    pub async fn start_with_store(
        config: TradeConfig,
        address: Url,
        store: Arc<MemoryStore>,
    ) -> Self {
        let messenger = Arc::new(RecordingMessenger::new());
        let ledger = Arc::new(MemoryLedger::new());
        let manager = TradeManager::new(
            config,
            address.clone(),
            store.clone() as Arc<dyn DurableStore>,
            messenger.clone(),
            ledger.clone(),
            SomeTestParams::arbitrator_registry(),
        )
        .await
        .unwrap();
        Self {
            address,
            manager,
            messenger,
            ledger,
            store,
        }
    }
}

/// A maker node, a taker node and the mailbox of the arbitrator. Envelopes
/// only move when `pump` is called, so tests control the interleaving.
pub struct Harness {
    pub maker: Node,
    pub taker: Node,
    pub arbitrator_inbox: Vec<TradeEnvelope>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with_config(SomeTestParams::trade_config()).await
    }

    pub async fn start_with_config(config: TradeConfig) -> Self {
        let maker = Node::start(config.clone(), SomeTestParams::maker_address()).await;
        let taker = Node::start(config, SomeTestParams::taker_address()).await;
        Self {
            maker,
            taker,
            arbitrator_inbox: Vec::new(),
        }
    }

    /// Delivers envelopes between the nodes until both are quiet.
    pub async fn pump(&mut self) -> Vec<RouteOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let mut sent = self.maker.messenger.take_sent().await;
            sent.extend(self.taker.messenger.take_sent().await);
            if sent.is_empty() {
                break;
            }
            for (address, envelope) in sent {
                if let Some(outcome) = self.deliver(address, envelope).await {
                    outcomes.push(outcome);
                }
            }
        }
        outcomes
    }

    /// Drains what is in flight without delivering it.
    pub async fn drop_in_flight(&self) -> Vec<(Url, TradeEnvelope)> {
        let mut sent = self.maker.messenger.take_sent().await;
        sent.extend(self.taker.messenger.take_sent().await);
        sent
    }

    pub async fn deliver(&mut self, address: Url, envelope: TradeEnvelope) -> Option<RouteOutcome> {
        if address == self.maker.address {
            Some(self.maker.manager.route_message(envelope).await)
        } else if address == self.taker.address {
            Some(self.taker.manager.route_message(envelope).await)
        } else if address == SomeTestParams::arbitrator_address() {
            self.arbitrator_inbox.push(envelope);
            None
        } else {
            panic!("Envelope sent to unknown address {}", address);
        }
    }

    /// Both nodes receive the envelope, as the arbitrator would send it.
    pub async fn broadcast_from_arbitrator(
        &mut self,
        envelope: TradeEnvelope,
    ) -> (RouteOutcome, RouteOutcome) {
        let maker = self.maker.manager.route_message(envelope.clone()).await;
        let taker = self.taker.manager.route_message(envelope).await;
        (maker, taker)
    }
}
