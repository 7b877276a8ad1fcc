pub mod chip;
pub mod driver;
pub mod voice;

pub use chip::{OplChip, RecordingChip, SoftChip};
pub use driver::Opl3Driver;
pub use voice::{FourOpRole, Voice, VoiceState};
