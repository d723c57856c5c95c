mod arbitrator;
mod builder;
mod case;
mod result;
mod signing;

pub use arbitrator::{Arbitrator, ArbitratorRegistry};
pub use builder::DisputeResultBuilder;
pub use case::{Attachment, CommunicationMessage, DisputeCase, DisputeStatus};
pub use result::{DisputeReason, DisputeResult};
pub use signing::CanonicalBytes;
