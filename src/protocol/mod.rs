mod message;
mod protocol;
mod role;

pub use message::{TradeEnvelope, TradeMessage, TradeMessageKind};
pub(crate) use protocol::ProtocolContext;
pub use protocol::{Applied, TradeAccess, TradeNotif};
pub(crate) use protocol::TradeProtocol;
pub use role::LocalAction;
