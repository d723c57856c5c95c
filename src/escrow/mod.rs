mod ledger;
mod payout;

pub use ledger::{LedgerAdapter, LedgerFailure, LedgerRef, PayoutRequest};
pub(crate) use ledger::RetryingLedger;
pub use payout::{
    arbitrated_payout, mutual_completion_payout, validate_payout, EscrowAmounts, Payout,
    PayoutKind,
};
