pub mod channel;
pub mod reader;
pub mod scheduler;

pub use channel::MidiChannel;
pub use reader::SmfHeader;
pub use scheduler::Scheduler;
