/// Audible state of a physical FM voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Off,
    On,
    /// Key released but held by a sustain pedal.
    Sustained,
}

/// Role this voice's chip channel plays in four-op mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FourOpRole {
    Regular,
    FourOpMaster,
    FourOpSlave,
}

/// One physical OPL3 two-op channel and its allocator/driver metadata.
///
/// Mirrors `spec.md` §3's `Voice` record. Indices into the voice table (not
/// owning references) are used everywhere else so the table can live as a
/// flat `Vec<Voice>` per `spec.md` §9's "no owning pointer cycles" note.
#[derive(Debug, Clone)]
pub struct Voice {
    pub midi_channel: Option<usize>,
    pub midi_note: Option<u8>,
    pub state: VoiceState,
    pub age_ms: f64,
    pub instrument_index: usize,
    pub instrument_meta: usize,
    pub program: u8,
    pub pitch_word: u8,
    pub four_op_role: FourOpRole,
}

impl Voice {
    pub fn new() -> Self {
        Voice {
            midi_channel: None,
            midi_note: None,
            state: VoiceState::Off,
            age_ms: 0.0,
            instrument_index: 0,
            instrument_meta: 0,
            program: 0,
            pitch_word: 0,
            four_op_role: FourOpRole::Regular,
        }
    }
}

impl Default for Voice {
    fn default() -> Self {
        Voice::new()
    }
}
