use strum_macros::{Display, IntoStaticStr};

use crate::{
    common::types::{TradeRole, TradeSide},
    trade::TradeState,
};

use super::TradeMessageKind;

/// A cooperative-path transition driven by one inbound message kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct InboundStep {
    pub(crate) kind: TradeMessageKind,
    pub(crate) from: TradeState,
    pub(crate) to: TradeState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum LocalAction {
    ConfirmPaymentStarted,
    ConfirmPaymentReceived,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LocalStep {
    pub(crate) action: LocalAction,
    pub(crate) from: TradeState,
    pub(crate) to: TradeState,
    pub(crate) sends: TradeMessageKind,
}

const OFFERER_STEPS: &[InboundStep] = &[InboundStep {
    kind: TradeMessageKind::DepositTxPublished,
    from: TradeState::Initiated,
    to: TradeState::DepositPublished,
}];

const TAKER_STEPS: &[InboundStep] = &[InboundStep {
    kind: TradeMessageKind::PublishDepositRequest,
    from: TradeState::Initiated,
    to: TradeState::DepositPublished,
}];

const BUYER_STEPS: &[InboundStep] = &[InboundStep {
    kind: TradeMessageKind::FiatReceived,
    from: TradeState::PaymentStarted,
    to: TradeState::PaymentReceived,
}];

const SELLER_STEPS: &[InboundStep] = &[
    InboundStep {
        kind: TradeMessageKind::FiatTransferStarted,
        from: TradeState::DepositPublished,
        to: TradeState::PaymentStarted,
    },
    InboundStep {
        kind: TradeMessageKind::PayoutTxPublished,
        from: TradeState::PaymentReceived,
        to: TradeState::Completed,
    },
];

const BUYER_ACTIONS: &[LocalStep] = &[LocalStep {
    action: LocalAction::ConfirmPaymentStarted,
    from: TradeState::DepositPublished,
    to: TradeState::PaymentStarted,
    sends: TradeMessageKind::FiatTransferStarted,
}];

const SELLER_ACTIONS: &[LocalStep] = &[LocalStep {
    action: LocalAction::ConfirmPaymentReceived,
    from: TradeState::PaymentStarted,
    to: TradeState::PaymentReceived,
    sends: TradeMessageKind::FiatReceived,
}];

/// What a role reacts to on the cooperative path. The four roles differ only
/// in these tables; the dispute and cancellation paths are shared by all.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RoleCapabilities {
    position_steps: &'static [InboundStep],
    side_steps: &'static [InboundStep],
    actions: &'static [LocalStep],
}

impl RoleCapabilities {
    pub(crate) fn for_role(role: TradeRole) -> Self {
        let position_steps = if role.is_offerer() {
            OFFERER_STEPS
        } else {
            TAKER_STEPS
        };
        let (side_steps, actions) = match role.side() {
            TradeSide::Buyer => (BUYER_STEPS, BUYER_ACTIONS),
            TradeSide::Seller => (SELLER_STEPS, SELLER_ACTIONS),
        };
        Self {
            position_steps,
            side_steps,
            actions,
        }
    }

    pub(crate) fn inbound_step(&self, kind: TradeMessageKind) -> Option<InboundStep> {
        self.position_steps
            .iter()
            .chain(self.side_steps.iter())
            .find(|step| step.kind == kind)
            .copied()
    }

    pub(crate) fn local_step(&self, action: LocalAction) -> Option<LocalStep> {
        self.actions
            .iter()
            .find(|step| step.action == action)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_cooperative_transition_has_exactly_one_receiver_per_trade() {
        // An offerer and a taker of opposite sides make up one trade
        for maker_side in [TradeSide::Buyer, TradeSide::Seller] {
            let maker = RoleCapabilities::for_role(TradeRole::offerer(maker_side));
            let taker = RoleCapabilities::for_role(TradeRole::taker(maker_side.opposite()));
            for kind in [
                TradeMessageKind::DepositTxPublished,
                TradeMessageKind::PublishDepositRequest,
                TradeMessageKind::FiatTransferStarted,
                TradeMessageKind::FiatReceived,
                TradeMessageKind::PayoutTxPublished,
            ] {
                let receivers = [maker.inbound_step(kind), taker.inbound_step(kind)]
                    .iter()
                    .filter(|step| step.is_some())
                    .count();
                assert_eq!(receivers, 1, "{} for maker side {}", kind, maker_side);
            }
        }
    }

    #[test]
    fn only_seller_confirms_fiat_received() {
        for role in TradeRole::iter() {
            let caps = RoleCapabilities::for_role(role);
            let step = caps.local_step(LocalAction::ConfirmPaymentReceived);
            assert_eq!(step.is_some(), role.side() == TradeSide::Seller);
            let step = caps.local_step(LocalAction::ConfirmPaymentStarted);
            assert_eq!(step.is_some(), role.side() == TradeSide::Buyer);
        }
    }

    #[test]
    fn steps_move_forward_along_the_cooperative_path() {
        for role in TradeRole::iter() {
            let caps = RoleCapabilities::for_role(role);
            for step in caps.position_steps.iter().chain(caps.side_steps.iter()) {
                assert!(step.from.phase_index() < step.to.phase_index());
            }
            for step in caps.actions {
                assert!(step.from.can_transition_to(step.to));
            }
        }
    }
}
