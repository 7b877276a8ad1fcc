use thiserror::Error;

/// Crate-wide error type. Variants map 1:1 onto the exit codes the CLI
/// reports (see `main::exit_code_for`).
#[derive(Debug, Error)]
pub enum MidiPlayError {
    #[error("{path}: file not found or unreadable: {source}")]
    FileNotFound {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: Invalid format")]
    InvalidFormat { path: String },

    #[error("no default output device")]
    NoOutputDevice,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("bank {bank} out of range (0..{max})")]
    BankOutOfRange { bank: u32, max: u32 },

    #[error("numcards {numcards} out of range (1..=100)")]
    NumCardsOutOfRange { numcards: u32 },

    #[error("numfourops {numfourops} out of range (0..={max})")]
    NumFourOpsOutOfRange { numfourops: u32, max: u32 },

    #[error("bank {bank} is almost entirely four-op instruments; refusing to play with numfourops=0")]
    BankNeedsFourOps { bank: u32 },
}

/// Process exit codes, per spec: 0 normal/help/user-error, 1 audio open
/// failure, 2 MIDI file load failure.
impl MidiPlayError {
    pub fn exit_code(&self) -> i32 {
        match self {
            MidiPlayError::FileNotFound { .. } => 2,
            MidiPlayError::InvalidFormat { .. } => 2,
            MidiPlayError::NoOutputDevice => 1,
            MidiPlayError::AudioDevice(_) => 1,
            MidiPlayError::BankOutOfRange { .. } => 0,
            MidiPlayError::NumCardsOutOfRange { .. } => 0,
            MidiPlayError::NumFourOpsOutOfRange { .. } => 0,
            MidiPlayError::BankNeedsFourOps { .. } => 0,
        }
    }
}
