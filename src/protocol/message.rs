use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumDiscriminants, IntoStaticStr};
use url::Url;
use uuid::Uuid;

use crate::{
    common::types::{Amount, Party},
    dispute::{CommunicationMessage, DisputeReason, DisputeResult},
    escrow::{LedgerRef, Payout},
    offer::Offer,
};

/// What the Messaging Layer hands over for every inbound message, and what
/// the core hands to `Messenger::send` for every outbound one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeEnvelope {
    pub message_id: Uuid,
    pub trade_uuid: Uuid,
    pub sender: Party,
    pub sender_address: Url,
    pub message: TradeMessage,
}

impl TradeEnvelope {
    pub fn new(trade_uuid: Uuid, sender: Party, sender_address: Url, message: TradeMessage) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            trade_uuid,
            sender,
            sender_address,
            message,
        }
    }

    pub fn kind(&self) -> TradeMessageKind {
        TradeMessageKind::from(&self.message)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, IntoStaticStr, EnumDiscriminants)]
#[strum_discriminants(name(TradeMessageKind), derive(Display, Hash, IntoStaticStr))]
pub enum TradeMessage {
    TakeOfferRequest { offer: Offer },
    PublishDepositRequest { total_escrow: Amount },
    DepositTxPublished { deposit_tx_ref: LedgerRef },
    FiatTransferStarted,
    FiatReceived,
    PayoutTxPublished { payout_tx_ref: LedgerRef, payout: Payout },
    TradeCancelled { reason: String },
    OpenDispute { reason: DisputeReason },
    DisputeCommunication(CommunicationMessage),
    DisputeResult(DisputeResult),
    Ack { acked: Uuid },
}
