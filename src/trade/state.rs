use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, IntoStaticStr};

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
    EnumIter,
    IntoStaticStr,
)]
pub enum TradeState {
    Initiated,
    DepositPublished,
    PaymentStarted,
    PaymentReceived,
    Completed,
    DisputeOpened,
    DisputeClosed,
    Failed,
}

impl TradeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeState::Completed | TradeState::DisputeClosed | TradeState::Failed
        )
    }

    /// Position along the cooperative path. `None` for the dispute and failure branches.
    pub fn phase_index(&self) -> Option<u8> {
        match self {
            TradeState::Initiated => Some(0),
            TradeState::DepositPublished => Some(1),
            TradeState::PaymentStarted => Some(2),
            TradeState::PaymentReceived => Some(3),
            TradeState::Completed => Some(4),
            TradeState::DisputeOpened | TradeState::DisputeClosed | TradeState::Failed => None,
        }
    }

    /// Normal protocol messages are not accepted in these states.
    pub fn is_frozen(&self) -> bool {
        self.is_terminal() || *self == TradeState::DisputeOpened
    }

    pub fn can_transition_to(&self, next: TradeState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            TradeState::DisputeOpened => *self != TradeState::DisputeOpened,
            TradeState::DisputeClosed => *self == TradeState::DisputeOpened,
            // Once funds are locked and the fiat leg started only a dispute can unwind the trade
            TradeState::Failed => {
                matches!(self, TradeState::Initiated | TradeState::DepositPublished)
            }
            _ => match (self.phase_index(), next.phase_index()) {
                (Some(current), Some(next)) => next == current + 1,
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn cooperative_path_advances_one_step_at_a_time() {
        let path = [
            TradeState::Initiated,
            TradeState::DepositPublished,
            TradeState::PaymentStarted,
            TradeState::PaymentReceived,
            TradeState::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]));
            assert!(!pair[1].can_transition_to(pair[0]));
        }
        assert!(!TradeState::Initiated.can_transition_to(TradeState::PaymentStarted));
    }

    #[test]
    fn nothing_leaves_a_terminal_state() {
        for state in TradeState::iter().filter(|state| state.is_terminal()) {
            for next in TradeState::iter() {
                assert!(!state.can_transition_to(next));
            }
        }
    }

    #[test]
    fn every_non_terminal_state_can_open_a_dispute_once() {
        for state in TradeState::iter().filter(|state| !state.is_terminal()) {
            let expected = state != TradeState::DisputeOpened;
            assert_eq!(state.can_transition_to(TradeState::DisputeOpened), expected);
        }
        assert!(TradeState::DisputeOpened.can_transition_to(TradeState::DisputeClosed));
        assert!(!TradeState::PaymentReceived.can_transition_to(TradeState::DisputeClosed));
    }

    #[test]
    fn failure_only_before_fiat_leg() {
        assert!(TradeState::Initiated.can_transition_to(TradeState::Failed));
        assert!(TradeState::DepositPublished.can_transition_to(TradeState::Failed));
        assert!(!TradeState::PaymentStarted.can_transition_to(TradeState::Failed));
        assert!(!TradeState::DisputeOpened.can_transition_to(TradeState::Failed));
    }

    #[test]
    fn no_state_returns_to_initiated() {
        for state in TradeState::iter() {
            assert!(!state.can_transition_to(TradeState::Initiated));
        }
    }
}
