use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::{
    common::{
        error::EscrowError,
        types::{Amount, Party, TradeRole},
    },
    dispute::DisputeCase,
    escrow::{validate_payout, EscrowAmounts, LedgerRef, Payout, PayoutKind},
    offer::Offer,
};

use super::TradeState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedPayout {
    pub payout: Payout,
    pub kind: PayoutKind,
}

/// One node's view of a single trade. Owned and mutated by exactly one trade actor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    trade_uuid: Uuid,
    trader_id: u32,
    role: TradeRole,
    offer: Offer,
    counterparty_address: Url,
    state: TradeState,
    state_entered_at: DateTime<Utc>,
    deposit_tx_ref: Option<LedgerRef>,
    payout_tx_ref: Option<LedgerRef>,
    finalized_payout: Option<FinalizedPayout>,
    outcome_reason: Option<String>,
    manual_intervention: Option<String>,
    processed_message_ids: HashSet<Uuid>,

    // Persisted as its own record, see `Trade::rehydrate`
    #[serde(skip)]
    dispute_case: Option<DisputeCase>,
}

impl Trade {
    pub fn new(
        trader_id: u32,
        role: TradeRole,
        offer: Offer,
        counterparty_address: Url,
    ) -> Result<Self, EscrowError> {
        offer.validate()?;

        let expected_side = if role.is_offerer() {
            offer.maker_side
        } else {
            offer.taker_side()
        };
        if role.side() != expected_side {
            return Err(EscrowError::Simple(format!(
                "Role {} does not fit Offer {} made by the {}",
                role, offer.offer_uuid, offer.maker_side
            )));
        }

        Ok(Self {
            trade_uuid: offer.offer_uuid,
            trader_id,
            role,
            offer,
            counterparty_address,
            state: TradeState::Initiated,
            state_entered_at: Utc::now(),
            deposit_tx_ref: None,
            payout_tx_ref: None,
            finalized_payout: None,
            outcome_reason: None,
            manual_intervention: None,
            processed_message_ids: HashSet::new(),
            dispute_case: None,
        })
    }

    /// Reassembles a trade from its persisted record and, if any, its dispute case.
    pub fn rehydrate(mut trade: Trade, case: Option<DisputeCase>) -> Result<Self, EscrowError> {
        let in_dispute = matches!(
            trade.state,
            TradeState::DisputeOpened | TradeState::DisputeClosed
        );

        match case {
            Some(case) if case.trade_uuid() != trade.trade_uuid => {
                return Err(EscrowError::DeserializationFailure(format!(
                    "Dispute case for TradeUUID {} attached to TradeUUID {}",
                    case.trade_uuid(),
                    trade.trade_uuid
                )));
            }
            Some(case) if in_dispute => {
                if trade.state == TradeState::DisputeClosed && !case.is_closed() {
                    return Err(EscrowError::DeserializationFailure(format!(
                        "Trade w/ TradeUUID {} is DisputeClosed but its dispute case is still open",
                        trade.trade_uuid
                    )));
                }
                trade.dispute_case = Some(case);
            }
            Some(_) => {
                // Case written but the trade record never caught up before a crash
                warn!(
                    "Trade w/ TradeUUID {} in state {} has a stray dispute case. Ignoring it",
                    trade.trade_uuid, trade.state
                );
            }
            None if in_dispute => {
                return Err(EscrowError::DeserializationFailure(format!(
                    "Trade w/ TradeUUID {} is {} but has no dispute case",
                    trade.trade_uuid, trade.state
                )));
            }
            None => {}
        }
        Ok(trade)
    }

    // Getter methods

    pub fn trade_uuid(&self) -> Uuid {
        self.trade_uuid
    }

    pub fn trader_id(&self) -> u32 {
        self.trader_id
    }

    pub fn role(&self) -> TradeRole {
        self.role
    }

    pub fn party(&self) -> Party {
        Party::from(self.role.side())
    }

    pub fn offer(&self) -> &Offer {
        &self.offer
    }

    pub fn counterparty_address(&self) -> &Url {
        &self.counterparty_address
    }

    pub fn state(&self) -> TradeState {
        self.state
    }

    pub fn state_entered_at(&self) -> DateTime<Utc> {
        self.state_entered_at
    }

    pub fn deposit_tx_ref(&self) -> Option<&LedgerRef> {
        self.deposit_tx_ref.as_ref()
    }

    pub fn payout_tx_ref(&self) -> Option<&LedgerRef> {
        self.payout_tx_ref.as_ref()
    }

    pub fn finalized_payout(&self) -> Option<&FinalizedPayout> {
        self.finalized_payout.as_ref()
    }

    pub fn outcome_reason(&self) -> Option<&str> {
        self.outcome_reason.as_deref()
    }

    pub fn manual_intervention(&self) -> Option<&str> {
        self.manual_intervention.as_deref()
    }

    pub fn dispute_case(&self) -> Option<&DisputeCase> {
        self.dispute_case.as_ref()
    }

    pub fn escrow_amounts(&self) -> EscrowAmounts {
        self.offer.escrow_amounts()
    }

    pub fn total_escrow(&self) -> Result<Amount, EscrowError> {
        self.offer.total_escrow()
    }

    pub fn has_processed(&self, message_id: &Uuid) -> bool {
        self.processed_message_ids.contains(message_id)
    }

    /// Nothing is left to do for this trade, its records can be archived.
    pub fn is_settled(&self) -> bool {
        match self.state {
            TradeState::Failed => true,
            TradeState::Completed | TradeState::DisputeClosed => {
                self.finalized_payout.is_some() && self.manual_intervention.is_none()
            }
            _ => false,
        }
    }

    // Setter methods

    pub(crate) fn transition(&mut self, next: TradeState) -> Result<(), EscrowError> {
        if !self.state.can_transition_to(next) {
            return Err(EscrowError::ProtocolViolation(format!(
                "Trade w/ TradeUUID {} cannot transition from {} to {}",
                self.trade_uuid, self.state, next
            )));
        }
        self.state = next;
        self.state_entered_at = Utc::now();
        Ok(())
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) -> Result<(), EscrowError> {
        self.transition(TradeState::Failed)?;
        self.outcome_reason = Some(reason.into());
        Ok(())
    }

    pub(crate) fn set_deposit_tx_ref(&mut self, deposit_tx_ref: LedgerRef) {
        self.deposit_tx_ref = Some(deposit_tx_ref);
    }

    pub(crate) fn set_outcome_reason(&mut self, reason: impl Into<String>) {
        self.outcome_reason = Some(reason.into());
    }

    pub(crate) fn set_manual_intervention(&mut self, note: Option<String>) {
        self.manual_intervention = note;
    }

    /// Records the one payout this trade will ever make.
    pub(crate) fn finalize_payout(
        &mut self,
        payout: Payout,
        kind: PayoutKind,
        payout_tx_ref: LedgerRef,
    ) -> Result<(), EscrowError> {
        if let Some(existing) = self.finalized_payout.as_ref() {
            return Err(EscrowError::PayoutInvariantViolation(format!(
                "Trade w/ TradeUUID {} already finalized a {} payout",
                self.trade_uuid, existing.kind
            )));
        }
        validate_payout(&payout, self.total_escrow()?)?;
        self.finalized_payout = Some(FinalizedPayout { payout, kind });
        self.payout_tx_ref = Some(payout_tx_ref);
        self.manual_intervention = None;
        Ok(())
    }

    pub(crate) fn mark_processed(&mut self, message_id: Uuid) -> bool {
        self.processed_message_ids.insert(message_id)
    }

    pub(crate) fn attach_dispute_case(&mut self, case: DisputeCase) {
        self.dispute_case = Some(case);
    }

    pub(crate) fn dispute_case_mut(&mut self) -> Option<&mut DisputeCase> {
        self.dispute_case.as_mut()
    }
}
