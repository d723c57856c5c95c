pub mod comms;
pub mod common;
pub mod config;
pub mod dispute;
pub mod escrow;
pub mod manager;
pub mod offer;
pub mod protocol;
pub mod store;
pub mod testing;
pub mod trade;

pub use common::error::EscrowError;
pub use common::types::{Amount, FiatPaymentMethod, Party, TradeRole, TradeSide};
