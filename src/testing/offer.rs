use iso_currency::Currency;

use crate::common::types::{FiatPaymentMethod, TradeSide};
use crate::offer::OfferBuilder;

use super::SomeTestParams;

pub struct SomeTestOfferParams {}

impl SomeTestOfferParams {
    pub fn amount() -> u64 {
        1_000_000 // 0.01 BTC in sats
    }

    pub fn security_deposit() -> u64 {
        100_000
    }

    // Seller makes the offer, taker buys. Escrow total is 1_200_000
    pub fn default_builder() -> OfferBuilder {
        let mut builder: OfferBuilder = OfferBuilder::new();
        builder
            .offer_uuid(SomeTestParams::some_uuid())
            .maker_side(TradeSide::Seller)
            .amount(Self::amount())
            .price(3_500_000u64)
            .currency(Currency::EUR)
            .payment_method(FiatPaymentMethod::Sepa)
            .buyer_security_deposit(Self::security_deposit())
            .seller_security_deposit(Self::security_deposit())
            .arbitrator_pubkey(SomeTestParams::arbitrator_pubkey())
            .maker_address(SomeTestParams::maker_address());
        builder
    }
}
