use std::result::Result;

use chrono::{DateTime, Utc};
use secp256k1::{KeyPair, XOnlyPublicKey};
use uuid::Uuid;

use crate::common::{
    error::EscrowError,
    types::{Amount, TradeSide},
};

use super::{case::CommunicationMessage, result::DisputeReason, DisputeResult};

pub struct DisputeResultBuilder {
    trade_uuid: Option<Uuid>,
    trader_id: Option<u32>,
    winner: Option<TradeSide>,
    reason_ordinal: Option<u32>,
    tamper_proof_evidence: bool,
    id_verification: bool,
    screen_cast: bool,
    summary_notes: Option<String>,
    communication_message: Option<CommunicationMessage>,
    buyer_payout_amount: Option<Amount>,
    seller_payout_amount: Option<Amount>,
    arbitrator_pubkey: Option<XOnlyPublicKey>,
    close_date: Option<DateTime<Utc>>,
    is_loser_publisher: bool,
}

impl DisputeResultBuilder {
    pub fn new() -> Self {
        Self {
            trade_uuid: None,
            trader_id: None,
            winner: None,
            reason_ordinal: None,
            tamper_proof_evidence: false,
            id_verification: false,
            screen_cast: false,
            summary_notes: None,
            communication_message: None,
            buyer_payout_amount: None,
            seller_payout_amount: None,
            arbitrator_pubkey: None,
            close_date: None,
            is_loser_publisher: false,
        }
    }

    pub fn trade_uuid(&mut self, trade_uuid: impl Into<Uuid>) -> &mut Self {
        self.trade_uuid = Some(trade_uuid.into());
        self
    }

    pub fn trader_id(&mut self, trader_id: impl Into<u32>) -> &mut Self {
        self.trader_id = Some(trader_id.into());
        self
    }

    pub fn winner(&mut self, winner: TradeSide) -> &mut Self {
        self.winner = Some(winner);
        self
    }

    pub fn reason(&mut self, reason: DisputeReason) -> &mut Self {
        self.reason_ordinal = Some(reason.ordinal());
        self
    }

    // Raw ordinal, for results produced by arbitrator tooling newer than this build
    pub fn reason_ordinal(&mut self, ordinal: u32) -> &mut Self {
        self.reason_ordinal = Some(ordinal);
        self
    }

    pub fn tamper_proof_evidence(&mut self, flag: bool) -> &mut Self {
        self.tamper_proof_evidence = flag;
        self
    }

    pub fn id_verification(&mut self, flag: bool) -> &mut Self {
        self.id_verification = flag;
        self
    }

    pub fn screen_cast(&mut self, flag: bool) -> &mut Self {
        self.screen_cast = flag;
        self
    }

    pub fn summary_notes(&mut self, notes: impl Into<String>) -> &mut Self {
        self.summary_notes = Some(notes.into());
        self
    }

    pub fn communication_message(&mut self, message: CommunicationMessage) -> &mut Self {
        self.communication_message = Some(message);
        self
    }

    pub fn buyer_payout_amount(&mut self, amount: impl Into<Amount>) -> &mut Self {
        self.buyer_payout_amount = Some(amount.into());
        self
    }

    pub fn seller_payout_amount(&mut self, amount: impl Into<Amount>) -> &mut Self {
        self.seller_payout_amount = Some(amount.into());
        self
    }

    pub fn arbitrator_pubkey(&mut self, pubkey: XOnlyPublicKey) -> &mut Self {
        self.arbitrator_pubkey = Some(pubkey);
        self
    }

    pub fn close_date(&mut self, close_date: DateTime<Utc>) -> &mut Self {
        self.close_date = Some(close_date);
        self
    }

    pub fn loser_is_publisher(&mut self, flag: bool) -> &mut Self {
        self.is_loser_publisher = flag;
        self
    }

    /// Builds an unsigned result. The arbitrator public key must have been set.
    pub fn build(&self) -> Result<DisputeResult, EscrowError> {
        let Some(arbitrator_pubkey) = self.arbitrator_pubkey else {
            return Err(EscrowError::Simple(
                "DisputeResult build error - Arbitrator pubkey not defined".to_string(),
            ));
        };
        self.build_with_pubkey(arbitrator_pubkey)
    }

    /// Builds the result and signs it. The arbitrator public key is taken from `keypair`.
    pub fn build_signed(&self, keypair: &KeyPair) -> Result<DisputeResult, EscrowError> {
        let (pubkey, _) = keypair.x_only_public_key();
        let mut result = self.build_with_pubkey(pubkey)?;
        result.sign(keypair)?;
        Ok(result)
    }

    fn build_with_pubkey(
        &self,
        arbitrator_pubkey: XOnlyPublicKey,
    ) -> Result<DisputeResult, EscrowError> {
        let Some(trade_uuid) = self.trade_uuid else {
            return Err(EscrowError::Simple(
                "DisputeResult build error - TradeUUID not defined".to_string(),
            ));
        };

        let Some(winner) = self.winner else {
            return Err(EscrowError::Simple(
                "DisputeResult build error - Winner not defined".to_string(),
            ));
        };

        let Some(reason_ordinal) = self.reason_ordinal else {
            return Err(EscrowError::Simple(
                "DisputeResult build error - Reason not defined".to_string(),
            ));
        };

        let Some(buyer_payout_amount) = self.buyer_payout_amount else {
            return Err(EscrowError::Simple(
                "DisputeResult build error - Buyer payout amount not defined".to_string(),
            ));
        };

        let Some(seller_payout_amount) = self.seller_payout_amount else {
            return Err(EscrowError::Simple(
                "DisputeResult build error - Seller payout amount not defined".to_string(),
            ));
        };

        if let Some(message) = self.communication_message.as_ref() {
            if message.trade_uuid != trade_uuid {
                return Err(EscrowError::Simple(format!(
                    "DisputeResult build error - Communication message {} belongs to TradeUUID {}",
                    message.message_id, message.trade_uuid
                )));
            }
        }

        // Millisecond precision so the close date survives the canonical serialization intact
        let close_date = self.close_date.unwrap_or_else(Utc::now);
        let close_date = DateTime::<Utc>::from_timestamp(
            close_date.timestamp(),
            close_date.timestamp_subsec_millis() * 1_000_000,
        )
        .unwrap_or(close_date);

        Ok(DisputeResult {
            trade_uuid,
            trader_id: self.trader_id.unwrap_or_default(),
            winner,
            reason_ordinal,
            tamper_proof_evidence: self.tamper_proof_evidence,
            id_verification: self.id_verification,
            screen_cast: self.screen_cast,
            summary_notes: self.summary_notes.clone().unwrap_or_default(),
            communication_message: self.communication_message.clone(),
            buyer_payout_amount,
            seller_payout_amount,
            arbitrator_pubkey,
            arbitrator_signature: None,
            close_date,
            is_loser_publisher: self.is_loser_publisher,
        })
    }
}

impl Default for DisputeResultBuilder {
    fn default() -> Self {
        Self::new()
    }
}
