use iso_currency::Currency;
use secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::{
    common::{
        error::EscrowError,
        types::{Amount, FiatPaymentMethod, TradeSide},
    },
    escrow::EscrowAmounts,
};

// Terms both counterparties agreed to. Immutable once a Trade references it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_uuid: Uuid,
    pub maker_side: TradeSide,
    pub amount: Amount,
    pub price: u64, // Fiat minor units per whole coin
    pub currency: Currency,
    pub payment_method: FiatPaymentMethod,
    pub buyer_security_deposit: Amount,
    pub seller_security_deposit: Amount,
    pub arbitrator_pubkey: XOnlyPublicKey,
    pub maker_address: Url,
}

impl Offer {
    pub fn taker_side(&self) -> TradeSide {
        self.maker_side.opposite()
    }

    pub fn escrow_amounts(&self) -> EscrowAmounts {
        EscrowAmounts {
            principal: self.amount,
            buyer_security_deposit: self.buyer_security_deposit,
            seller_security_deposit: self.seller_security_deposit,
        }
    }

    pub fn total_escrow(&self) -> Result<Amount, EscrowError> {
        self.escrow_amounts().total()
    }

    pub(crate) fn validate(&self) -> Result<(), EscrowError> {
        if self.amount == 0 {
            return Err(EscrowError::Simple(format!(
                "Offer {} has zero trade amount",
                self.offer_uuid
            )));
        }
        if self.price == 0 {
            return Err(EscrowError::Simple(format!(
                "Offer {} has zero price",
                self.offer_uuid
            )));
        }
        self.total_escrow()?;
        Ok(())
    }
}
