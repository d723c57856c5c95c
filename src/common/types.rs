use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use std::any::Any;
use std::fmt::Debug;

/// Indivisible base units of the escrowed asset (eg. satoshis).
pub type Amount = u64;

#[typetag::serde(tag = "type")]
pub trait SerdeGenericTrait: DynClone + Debug + Send {
    fn any_ref(&self) -> &dyn Any;
}

dyn_clone::clone_trait_object!(SerdeGenericTrait);

impl dyn SerdeGenericTrait {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.any_ref().downcast_ref()
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
pub enum TradeSide {
    Buyer,
    Seller,
}

impl TradeSide {
    pub fn opposite(&self) -> TradeSide {
        match self {
            TradeSide::Buyer => TradeSide::Seller,
            TradeSide::Seller => TradeSide::Buyer,
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    Display,
    IntoStaticStr,
)]
pub enum TradeRole {
    BuyerAsOfferer,
    BuyerAsTaker,
    SellerAsOfferer,
    SellerAsTaker,
}

impl TradeRole {
    pub fn offerer(side: TradeSide) -> TradeRole {
        match side {
            TradeSide::Buyer => TradeRole::BuyerAsOfferer,
            TradeSide::Seller => TradeRole::SellerAsOfferer,
        }
    }

    pub fn taker(side: TradeSide) -> TradeRole {
        match side {
            TradeSide::Buyer => TradeRole::BuyerAsTaker,
            TradeSide::Seller => TradeRole::SellerAsTaker,
        }
    }

    pub fn side(&self) -> TradeSide {
        match self {
            TradeRole::BuyerAsOfferer | TradeRole::BuyerAsTaker => TradeSide::Buyer,
            TradeRole::SellerAsOfferer | TradeRole::SellerAsTaker => TradeSide::Seller,
        }
    }

    pub fn is_offerer(&self) -> bool {
        matches!(self, TradeRole::BuyerAsOfferer | TradeRole::SellerAsOfferer)
    }

    pub fn counterparty(&self) -> Party {
        Party::from(self.side().opposite())
    }
}

// Who a message or dispute record is attributable to
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
pub enum Party {
    Buyer,
    Seller,
    Arbitrator,
}

impl From<TradeSide> for Party {
    fn from(side: TradeSide) -> Party {
        match side {
            TradeSide::Buyer => Party::Buyer,
            TradeSide::Seller => Party::Seller,
        }
    }
}

// Subset of the fiat payment methods from
// https://github.com/bisq-network/bisq/blob/release/v1.9.10/core/src/main/java/bisq/core/payment/payload/PaymentMethod.java
#[derive(
    PartialEq, Eq, Hash, Clone, Debug, Serialize, Deserialize, EnumString, Display, IntoStaticStr,
)]
pub enum FiatPaymentMethod {
    Sepa,
    SepaInstant,
    FasterPayments,
    NationalBank,
    Swish,
    AliPay,
    WeChatPay,
    Zelle,
    InteracETransfer,
    CashDeposit,
    MoneyGram,
    WesternUnion,
    FaceToFace,
    TransferWise,
    Pix,
    UPI,
    SWIFT,
    ACHTransfer,
    DomesticWireTransfer,
    Revolut,
}
