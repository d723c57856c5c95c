mod ledger;
mod messenger;
mod offer;
mod testing;

pub use ledger::MemoryLedger;
pub use messenger::RecordingMessenger;
pub use offer::SomeTestOfferParams;
pub use testing::SomeTestParams;
