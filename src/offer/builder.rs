use std::result::Result;

use iso_currency::Currency;
use secp256k1::XOnlyPublicKey;
use url::Url;
use uuid::Uuid;

use crate::common::{
    error::EscrowError,
    types::{Amount, FiatPaymentMethod, TradeSide},
};

use super::Offer;

pub struct OfferBuilder {
    offer_uuid: Option<Uuid>,
    maker_side: Option<TradeSide>,
    amount: Option<Amount>,
    price: Option<u64>,
    currency: Option<Currency>,
    payment_method: Option<FiatPaymentMethod>,
    buyer_security_deposit: Option<Amount>,
    seller_security_deposit: Option<Amount>,
    arbitrator_pubkey: Option<XOnlyPublicKey>,
    maker_address: Option<Url>,
}

impl OfferBuilder {
    pub fn new() -> Self {
        Self {
            offer_uuid: None,
            maker_side: None,
            amount: None,
            price: None,
            currency: None,
            payment_method: None,
            buyer_security_deposit: None,
            seller_security_deposit: None,
            arbitrator_pubkey: None,
            maker_address: None,
        }
    }

    pub fn offer_uuid(&mut self, offer_uuid: impl Into<Uuid>) -> &mut Self {
        self.offer_uuid = Some(offer_uuid.into());
        self
    }

    pub fn maker_side(&mut self, maker_side: TradeSide) -> &mut Self {
        self.maker_side = Some(maker_side);
        self
    }

    pub fn amount(&mut self, amount: impl Into<Amount>) -> &mut Self {
        self.amount = Some(amount.into());
        self
    }

    pub fn price(&mut self, price: impl Into<u64>) -> &mut Self {
        self.price = Some(price.into());
        self
    }

    pub fn currency(&mut self, currency: Currency) -> &mut Self {
        self.currency = Some(currency);
        self
    }

    pub fn payment_method(&mut self, payment_method: FiatPaymentMethod) -> &mut Self {
        self.payment_method = Some(payment_method);
        self
    }

    pub fn buyer_security_deposit(&mut self, deposit: impl Into<Amount>) -> &mut Self {
        self.buyer_security_deposit = Some(deposit.into());
        self
    }

    pub fn seller_security_deposit(&mut self, deposit: impl Into<Amount>) -> &mut Self {
        self.seller_security_deposit = Some(deposit.into());
        self
    }

    pub fn arbitrator_pubkey(&mut self, arbitrator_pubkey: XOnlyPublicKey) -> &mut Self {
        self.arbitrator_pubkey = Some(arbitrator_pubkey);
        self
    }

    pub fn maker_address(&mut self, maker_address: Url) -> &mut Self {
        self.maker_address = Some(maker_address);
        self
    }

    pub fn build(&mut self) -> Result<Offer, EscrowError> {
        let offer_uuid = self.offer_uuid.unwrap_or_else(Uuid::new_v4);

        let Some(maker_side) = self.maker_side else {
            return Err(EscrowError::Simple("No Maker Side defined".to_string()));
        };

        let Some(amount) = self.amount else {
            return Err(EscrowError::Simple("No Trade Amount defined".to_string()));
        };

        let Some(price) = self.price else {
            return Err(EscrowError::Simple("No Price defined".to_string()));
        };

        let Some(currency) = self.currency else {
            return Err(EscrowError::Simple("No Currency defined".to_string()));
        };

        let Some(payment_method) = self.payment_method.take() else {
            return Err(EscrowError::Simple("No Payment Method defined".to_string()));
        };

        let Some(arbitrator_pubkey) = self.arbitrator_pubkey else {
            return Err(EscrowError::Simple("No Arbitrator defined".to_string()));
        };

        let Some(maker_address) = self.maker_address.take() else {
            return Err(EscrowError::Simple("No Maker Address defined".to_string()));
        };

        let offer = Offer {
            offer_uuid,
            maker_side,
            amount,
            price,
            currency,
            payment_method,
            buyer_security_deposit: self.buyer_security_deposit.unwrap_or(0),
            seller_security_deposit: self.seller_security_deposit.unwrap_or(0),
            arbitrator_pubkey,
            maker_address,
        };
        offer.validate()?;

        Ok(offer)
    }
}

impl Default for OfferBuilder {
    fn default() -> Self {
        Self::new()
    }
}
