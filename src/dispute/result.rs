use chrono::{DateTime, Utc};
use secp256k1::{schnorr::Signature, KeyPair, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, FromRepr, IntoStaticStr};
use uuid::Uuid;

use crate::{
    common::{
        error::EscrowError,
        types::{Amount, TradeSide},
    },
    escrow::Payout,
};

use super::{
    case::CommunicationMessage,
    signing::{self, CanonicalBytes},
};

// Ordinals are part of the signed payload and of persisted records. Only ever append
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    IntoStaticStr,
    EnumIter,
    FromRepr,
)]
#[repr(u32)]
pub enum DisputeReason {
    Other = 0,
    Bug = 1,
    Usability = 2,
    Scam = 3,
    ProtocolViolation = 4,
    NoReply = 5,
    BankProblems = 6,
}

impl DisputeReason {
    pub fn ordinal(&self) -> u32 {
        *self as u32
    }

    /// Ordinals from newer peers that this build does not know yet read as `Other`.
    pub fn from_ordinal(ordinal: u32) -> DisputeReason {
        DisputeReason::from_repr(ordinal).unwrap_or(DisputeReason::Other)
    }
}

/// The arbitrator's binding decision for one trade.
///
/// Fields are only settable through `DisputeResultBuilder`; once signed the
/// result is immutable and is carried by value into the `DisputeCase` it closes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisputeResult {
    pub(super) trade_uuid: Uuid,
    pub(super) trader_id: u32,
    pub(super) winner: TradeSide,
    pub(super) reason_ordinal: u32,
    pub(super) tamper_proof_evidence: bool,
    pub(super) id_verification: bool,
    pub(super) screen_cast: bool,
    pub(super) summary_notes: String,
    pub(super) communication_message: Option<CommunicationMessage>,
    pub(super) buyer_payout_amount: Amount,
    pub(super) seller_payout_amount: Amount,
    pub(super) arbitrator_pubkey: XOnlyPublicKey,
    pub(super) arbitrator_signature: Option<Signature>,
    pub(super) close_date: DateTime<Utc>,
    pub(super) is_loser_publisher: bool,
}

#[derive(Serialize)]
struct SignedFields<'a> {
    trade_uuid: &'a Uuid,
    trader_id: u32,
    winner: TradeSide,
    reason_ordinal: u32,
    tamper_proof_evidence: bool,
    id_verification: bool,
    screen_cast: bool,
    summary_notes: &'a str,
    communication_message: &'a Option<CommunicationMessage>,
    buyer_payout_amount: Amount,
    seller_payout_amount: Amount,
    arbitrator_pubkey: &'a XOnlyPublicKey,
    close_date_millis: i64,
    is_loser_publisher: bool,
}

impl DisputeResult {
    pub fn trade_uuid(&self) -> Uuid {
        self.trade_uuid
    }

    pub fn trader_id(&self) -> u32 {
        self.trader_id
    }

    pub fn winner(&self) -> TradeSide {
        self.winner
    }

    pub fn loser(&self) -> TradeSide {
        self.winner.opposite()
    }

    pub fn reason(&self) -> DisputeReason {
        DisputeReason::from_ordinal(self.reason_ordinal)
    }

    pub fn reason_ordinal(&self) -> u32 {
        self.reason_ordinal
    }

    pub fn tamper_proof_evidence(&self) -> bool {
        self.tamper_proof_evidence
    }

    pub fn id_verification(&self) -> bool {
        self.id_verification
    }

    pub fn screen_cast(&self) -> bool {
        self.screen_cast
    }

    pub fn summary_notes(&self) -> &str {
        &self.summary_notes
    }

    pub fn communication_message(&self) -> Option<&CommunicationMessage> {
        self.communication_message.as_ref()
    }

    pub fn buyer_payout_amount(&self) -> Amount {
        self.buyer_payout_amount
    }

    pub fn seller_payout_amount(&self) -> Amount {
        self.seller_payout_amount
    }

    pub fn payout(&self) -> Payout {
        Payout {
            buyer: self.buyer_payout_amount,
            seller: self.seller_payout_amount,
        }
    }

    pub fn arbitrator_pubkey(&self) -> XOnlyPublicKey {
        self.arbitrator_pubkey
    }

    pub fn arbitrator_signature(&self) -> Option<&Signature> {
        self.arbitrator_signature.as_ref()
    }

    pub fn close_date(&self) -> DateTime<Utc> {
        self.close_date
    }

    pub fn is_loser_publisher(&self) -> bool {
        self.is_loser_publisher
    }

    /// The side that has to broadcast the payout transaction.
    pub fn publisher(&self) -> TradeSide {
        if self.is_loser_publisher {
            self.loser()
        } else {
            self.winner
        }
    }

    /// Everything except the signature itself, in a fixed field order.
    pub fn canonical_bytes(&self) -> Result<CanonicalBytes, EscrowError> {
        let fields = SignedFields {
            trade_uuid: &self.trade_uuid,
            trader_id: self.trader_id,
            winner: self.winner,
            reason_ordinal: self.reason_ordinal,
            tamper_proof_evidence: self.tamper_proof_evidence,
            id_verification: self.id_verification,
            screen_cast: self.screen_cast,
            summary_notes: &self.summary_notes,
            communication_message: &self.communication_message,
            buyer_payout_amount: self.buyer_payout_amount,
            seller_payout_amount: self.seller_payout_amount,
            arbitrator_pubkey: &self.arbitrator_pubkey,
            close_date_millis: self.close_date.timestamp_millis(),
            is_loser_publisher: self.is_loser_publisher,
        };
        CanonicalBytes::new(&fields)
    }

    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), EscrowError> {
        let (pubkey, _) = keypair.x_only_public_key();
        self.arbitrator_pubkey = pubkey;
        let signature = signing::sign(&self.canonical_bytes()?, keypair)?;
        self.arbitrator_signature = Some(signature);
        Ok(())
    }

    /// Checks the result was signed by `expected_pubkey` and was not altered since.
    pub fn verify(&self, expected_pubkey: &XOnlyPublicKey) -> Result<(), EscrowError> {
        if &self.arbitrator_pubkey != expected_pubkey {
            return Err(EscrowError::InvalidDisputeResult(format!(
                "Result for TradeUUID {} names arbitrator {}, expected {}",
                self.trade_uuid, self.arbitrator_pubkey, expected_pubkey
            )));
        }

        let Some(signature) = self.arbitrator_signature.as_ref() else {
            return Err(EscrowError::InvalidDisputeResult(format!(
                "Result for TradeUUID {} is not signed",
                self.trade_uuid
            )));
        };

        signing::verify(&self.canonical_bytes()?, signature, expected_pubkey)
    }
}
