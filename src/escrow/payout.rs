use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

use crate::{
    common::{error::EscrowError, types::Amount},
    dispute::DisputeResult,
};

/// The three amounts locked into escrow when the deposit is published.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowAmounts {
    pub principal: Amount,
    pub buyer_security_deposit: Amount,
    pub seller_security_deposit: Amount,
}

impl EscrowAmounts {
    pub fn total(&self) -> Result<Amount, EscrowError> {
        self.principal
            .checked_add(self.buyer_security_deposit)
            .and_then(|sum| sum.checked_add(self.seller_security_deposit))
            .ok_or_else(|| {
                EscrowError::PayoutInvariantViolation(format!(
                    "Escrow total overflows - principal {}, buyer deposit {}, seller deposit {}",
                    self.principal, self.buyer_security_deposit, self.seller_security_deposit
                ))
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub buyer: Amount,
    pub seller: Amount,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr)]
pub enum PayoutKind {
    MutualCompletion,
    Arbitrated,
}

/// Rejects any payout whose components do not add up to the escrowed total.
pub fn validate_payout(payout: &Payout, total: Amount) -> Result<(), EscrowError> {
    match payout.buyer.checked_add(payout.seller) {
        Some(sum) if sum == total => Ok(()),
        Some(sum) => Err(EscrowError::PayoutInvariantViolation(format!(
            "Buyer payout {} + Seller payout {} = {}, expected escrow total {}",
            payout.buyer, payout.seller, sum, total
        ))),
        None => Err(EscrowError::PayoutInvariantViolation(format!(
            "Buyer payout {} + Seller payout {} overflows, expected escrow total {}",
            payout.buyer, payout.seller, total
        ))),
    }
}

/// Buyer receives the traded principal plus its own deposit back, Seller its deposit back.
pub fn mutual_completion_payout(amounts: &EscrowAmounts) -> Result<Payout, EscrowError> {
    let total = amounts.total()?;
    let payout = Payout {
        buyer: amounts.principal + amounts.buyer_security_deposit,
        seller: amounts.seller_security_deposit,
    };
    validate_payout(&payout, total)?;
    Ok(payout)
}

/// The arbitrator has full discretion over the split, bounded only by the escrowed total.
pub fn arbitrated_payout(
    amounts: &EscrowAmounts,
    result: &DisputeResult,
) -> Result<Payout, EscrowError> {
    let total = amounts.total()?;
    let payout = result.payout();
    validate_payout(&payout, total)?;
    Ok(payout)
}
