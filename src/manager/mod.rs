mod manager;
mod router;

pub use manager::{RouteOutcome, TradeManager};
