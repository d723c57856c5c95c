mod messenger;

pub use messenger::Messenger;
