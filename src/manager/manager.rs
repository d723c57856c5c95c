use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    comms::Messenger,
    common::{
        error::EscrowError,
        types::{Party, TradeRole},
    },
    config::TradeConfig,
    dispute::ArbitratorRegistry,
    escrow::{LedgerAdapter, RetryingLedger},
    offer::Offer,
    protocol::{Applied, ProtocolContext, TradeAccess, TradeEnvelope, TradeMessage, TradeProtocol},
    store::{DurableStore, LoadedRecords},
    trade::Trade,
};

use super::router::Router;

#[derive(Debug)]
pub enum RouteOutcome {
    /// A take request against an open offer created a new trade.
    Created(Uuid),
    Applied(Applied),
    Rejected(EscrowError),
    /// No trade and no open offer for the TradeUUID.
    Dropped,
}

/// Entry point of a node. Owns one actor per active trade and routes every
/// inbound envelope to the actor of its TradeUUID.
pub struct TradeManager {
    trader_id: u32,
    context: ProtocolContext,
    open_offers: RwLock<HashMap<Uuid, Offer>>,
    router: RwLock<Router>,
}

impl TradeManager {
    // Constructors

    /// Creates the manager and restores every trade the store still holds.
    pub async fn new(
        config: TradeConfig,
        local_address: Url,
        store: Arc<dyn DurableStore>,
        messenger: Arc<dyn Messenger>,
        ledger: Arc<dyn LedgerAdapter>,
        arbitrators: ArbitratorRegistry,
    ) -> Result<Self, EscrowError> {
        let ledger = RetryingLedger::new(ledger, config.ledger_retry.clone());
        let trader_id = config.trader_id;
        let context = ProtocolContext {
            store,
            messenger,
            ledger,
            arbitrators: Arc::new(arbitrators),
            config: Arc::new(config),
            local_address,
        };

        let manager = TradeManager {
            trader_id,
            context,
            open_offers: RwLock::new(HashMap::new()),
            router: RwLock::new(Router::new()),
        };
        manager.restore().await?;
        Ok(manager)
    }

    async fn restore(&self) -> Result<(), EscrowError> {
        let LoadedRecords {
            trades,
            mut dispute_cases,
            failures,
        } = self.context.store.load_all().await?;

        for failure in failures.iter() {
            warn!("Trade Manager skipped a record on restore - {}", failure);
        }

        let mut router = self.router.write().await;
        for trade in trades {
            let trade_uuid = trade.trade_uuid();
            let case = dispute_cases.remove(&trade_uuid);
            let trade = match Trade::rehydrate(trade, case) {
                Ok(trade) => trade,
                Err(error) => {
                    warn!(
                        "Trade w/ TradeUUID {} could not be restored - {}",
                        trade_uuid, error
                    );
                    continue;
                }
            };
            info!(
                "Trade w/ TradeUUID {} restored in state {}",
                trade_uuid,
                trade.state()
            );
            let protocol = TradeProtocol::new(trade, self.context.clone());
            router.register(trade_uuid, protocol)?;
        }
        Ok(())
    }

    pub fn local_address(&self) -> &Url {
        &self.context.local_address
    }

    // Offer Management

    /// Registers one of our own offers so a take request against it can create a trade.
    pub async fn add_offer(&self, offer: Offer) -> Result<(), EscrowError> {
        offer.validate()?;
        let mut open_offers = self.open_offers.write().await;
        let trade_uuid = offer.offer_uuid;
        if open_offers.contains_key(&trade_uuid) || self.router.read().await.contains(&trade_uuid)
        {
            return Err(EscrowError::Simple(format!(
                "Offer {} already known to the Trade Manager",
                trade_uuid
            )));
        }
        debug!("Trade Manager added open Offer {}", trade_uuid);
        open_offers.insert(trade_uuid, offer);
        Ok(())
    }

    pub async fn remove_offer(&self, offer_uuid: Uuid) -> Option<Offer> {
        self.open_offers.write().await.remove(&offer_uuid)
    }

    pub async fn open_offers(&self) -> Vec<Offer> {
        self.open_offers.read().await.values().cloned().collect()
    }

    // Trade Management

    /// Starts a trade as the taker of a counterparty's offer.
    pub async fn take_offer(&self, offer: Offer) -> Result<TradeAccess, EscrowError> {
        let role = TradeRole::taker(offer.taker_side());
        let counterparty_address = offer.maker_address.clone();
        let trade = Trade::new(self.trader_id, role, offer, counterparty_address)?;
        let access = self.spawn(trade).await?;
        access.begin().await?;
        Ok(access)
    }

    pub async fn get_trade(&self, trade_uuid: Uuid) -> Option<TradeAccess> {
        self.router.read().await.accessor(&trade_uuid)
    }

    pub async fn get_trades(&self) -> HashMap<Uuid, TradeAccess> {
        self.router.read().await.accessors()
    }

    /// Stops the actors of settled trades and archives their records.
    pub async fn archive_terminal_trades(&self) -> Result<Vec<Uuid>, EscrowError> {
        let accessors = self.router.read().await.accessors();
        let mut archived = Vec::new();

        for (trade_uuid, access) in accessors {
            // Whatever the actor reports has already been persisted
            let trade = access.query_trade().await?;
            if !trade.is_settled() {
                continue;
            }

            access.shutdown().await?;
            let protocol = self.router.write().await.unregister(trade_uuid);
            if let Some(protocol) = protocol {
                if let Err(error) = protocol.task_handle.await {
                    warn!(
                        "Trade w/ TradeUUID {} actor did not stop cleanly - {}",
                        trade_uuid, error
                    );
                }
            }

            self.context.store.archive(trade_uuid).await?;
            info!(
                "Trade w/ TradeUUID {} archived in state {}",
                trade_uuid,
                trade.state()
            );
            archived.push(trade_uuid);
        }
        Ok(archived)
    }

    pub async fn shutdown(&self) -> Result<(), EscrowError> {
        let protocols = self.router.write().await.drain();
        for (trade_uuid, protocol) in protocols {
            if let Err(error) = protocol.new_accessor().shutdown().await {
                debug!(
                    "Trade w/ TradeUUID {} was already shut down - {}",
                    trade_uuid, error
                );
            }
            if let Err(error) = protocol.task_handle.await {
                warn!(
                    "Trade w/ TradeUUID {} actor did not stop cleanly - {}",
                    trade_uuid, error
                );
            }
        }
        info!("Trade Manager shut down");
        Ok(())
    }

    // Message Routing

    pub async fn route_message(&self, envelope: TradeEnvelope) -> RouteOutcome {
        let access = self.router.read().await.accessor(&envelope.trade_uuid);
        if let Some(access) = access {
            return Self::apply(access, envelope).await;
        }

        if let TradeMessage::TakeOfferRequest { .. } = envelope.message {
            return self.accept_take_offer(envelope).await;
        }

        warn!(
            "Trade Manager dropped {} from {} for unknown TradeUUID {}",
            envelope.kind(),
            envelope.sender,
            envelope.trade_uuid
        );
        RouteOutcome::Dropped
    }

    async fn apply(access: TradeAccess, envelope: TradeEnvelope) -> RouteOutcome {
        match access.apply_incoming_message(envelope).await {
            Ok(applied) => RouteOutcome::Applied(applied),
            Err(error) => RouteOutcome::Rejected(error),
        }
    }

    async fn accept_take_offer(&self, envelope: TradeEnvelope) -> RouteOutcome {
        let trade_uuid = envelope.trade_uuid;
        let mut open_offers = self.open_offers.write().await;

        // Another take request may have created the trade while we waited for the lock
        let access = self.router.read().await.accessor(&trade_uuid);
        if let Some(access) = access {
            drop(open_offers);
            return Self::apply(access, envelope).await;
        }

        let TradeMessage::TakeOfferRequest { offer } = &envelope.message else {
            return RouteOutcome::Dropped;
        };

        let Some(open_offer) = open_offers.get(&trade_uuid) else {
            warn!(
                "Trade Manager dropped take request for unknown Offer {}",
                trade_uuid
            );
            return RouteOutcome::Dropped;
        };

        if open_offer != offer {
            return RouteOutcome::Rejected(Self::take_violation(format!(
                "Take request for Offer {} does not match the offered terms",
                trade_uuid
            )));
        }

        let taker = Party::from(open_offer.taker_side());
        if envelope.sender != taker {
            return RouteOutcome::Rejected(Self::take_violation(format!(
                "Take request for Offer {} sent by {}, expected the {}",
                trade_uuid, envelope.sender, taker
            )));
        }

        let role = TradeRole::offerer(open_offer.maker_side);
        let mut trade = match Trade::new(
            self.trader_id,
            role,
            open_offer.clone(),
            envelope.sender_address.clone(),
        ) {
            Ok(trade) => trade,
            Err(error) => return RouteOutcome::Rejected(error),
        };
        trade.mark_processed(envelope.message_id);

        let access = match self.spawn(trade).await {
            Ok(access) => access,
            Err(error) => return RouteOutcome::Rejected(error),
        };
        open_offers.remove(&trade_uuid);
        drop(open_offers);

        info!(
            "Trade w/ TradeUUID {} created from take request by {}",
            trade_uuid, envelope.sender_address
        );
        match access.begin().await {
            Ok(_) => RouteOutcome::Created(trade_uuid),
            Err(error) => RouteOutcome::Rejected(error),
        }
    }

    fn take_violation(detail: String) -> EscrowError {
        warn!("Trade Manager protocol violation - {}", detail);
        EscrowError::ProtocolViolation(detail)
    }

    async fn spawn(&self, trade: Trade) -> Result<TradeAccess, EscrowError> {
        let trade_uuid = trade.trade_uuid();
        let mut router = self.router.write().await;
        if router.contains(&trade_uuid) {
            return Err(EscrowError::Simple(format!(
                "Trade w/ TradeUUID {} already exists",
                trade_uuid
            )));
        }
        let protocol = TradeProtocol::new(trade, self.context.clone());
        router.register(trade_uuid, protocol)
    }
}
