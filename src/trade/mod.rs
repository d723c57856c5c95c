mod state;
mod trade;

pub use state::TradeState;
pub use trade::{FinalizedPayout, Trade};
