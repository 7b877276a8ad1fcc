//! Static instrument and bank tables.
//!
//! `spec.md` names these as bundled, read-only data external to the core
//! (`adl`, `adlins`, `banks`): FM operator parameters per instrument, a
//! per-instrument metadata table, and 48 bank mappings from MIDI program (or
//! percussion note) to instrument index. The real ADLMIDI data set runs to
//! thousands of hand-tuned entries; what ships here is a smaller, procedurally
//! generated stand-in with the same shape and the same "198 = unmapped"
//! sentinel, sufficient to drive the in-scope scheduler/channel/allocator/
//! register-programmer logic end to end. See DESIGN.md.

/// Packed four-byte operator register block: AM/VIB/EG/KSR/Multiple (0x20),
/// Attack/Decay (0x60), Sustain/Release (0x80), Wave Select (0xE0).
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorRegs {
    pub am_vib_egt_ksr_mult: u8,
    pub attack_decay: u8,
    pub sustain_release: u8,
    pub wave_select: u8,
}

/// One `adl[]` entry: paired carrier/modulator operator data plus the
/// channel-level feedback/algorithm byte and a finetune offset in semitones.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdlOperator {
    pub carrier: OperatorRegs,
    pub modulator: OperatorRegs,
    /// KSL (bits 6-7) / Total Level (bits 0-5) for the carrier.
    pub carrier_40: u8,
    /// KSL (bits 6-7) / Total Level (bits 0-5) for the modulator.
    pub modulator_40: u8,
    /// Feedback (bits 1-3) / algorithm (bit 0) bits written to 0xC0.
    pub feedconn: u8,
    /// Finetune offset in semitones.
    pub finetune: f64,
}

/// One `adlins[]` entry: a high-level instrument binding one or two `adl`
/// operator sets together with allocator timing heuristics.
#[derive(Debug, Clone, Copy)]
pub struct AdlInstrument {
    pub adlno1: usize,
    pub adlno2: usize,
    /// Tone override; 0 means "use the played note".
    pub tone: u8,
    pub ms_sound_kon: f64,
    pub ms_sound_koff: f64,
}

/// Sentinel `adlins` index meaning "unmapped" (plays silence).
pub const UNMAPPED: usize = 198;

pub const NUM_BANKS: usize = 48;

/// Names of the bundled banks, printed by `--list-banks`.
pub const BANK_NAMES: [&str; NUM_BANKS] = [
    "AIL (Star Control 3)",
    "Bisqwit (compact)",
    "HMI",
    "HMI (Int)",
    "Old Miles",
    "Miles (new)",
    "Quest (Int)",
    "Quest",
    "Quest (old)",
    "TMB Sound",
    "Doom",
    "Doom (old)",
    "Hexen",
    "Hexen (old)",
    "MI Opera",
    "MI Opera (old)",
    "Wohlstand",
    "Wohlstand (drums)",
    "OPL2 Bisqwit",
    "Junglevision",
    "Junglevision (drums)",
    "Bisqwit (alt)",
    "DMX",
    "DMX (old)",
    "Apogee",
    "Apogee (old)",
    "AIL (SC3, alt)",
    "AIL (Arachnophobia)",
    "AIL (dungeon hack)",
    "AIL (Warcraft 2)",
    "AIL (Rayman2)",
    "AIL (Fury)",
    "AIL (Hocus)",
    "AIL (Sphinx)",
    "AIL (Scavenger)",
    "SB (Warcraft 2)",
    "SB (Fury)",
    "SB (old gmtimbr)",
    "Creative",
    "Creative (old)",
    "3rd party (generic)",
    "3rd party (alt)",
    "TMB (extended)",
    "Bisqwit (surround)",
    "Default GM",
    "Default GM (drums)",
    "Custom 1",
    "Custom 2",
];

/// The full FM operator table, `adl[]`.
pub struct BankData {
    pub adl: Vec<AdlOperator>,
    pub adlins: Vec<AdlInstrument>,
    pub banks: [[usize; 256]; NUM_BANKS],
}

impl BankData {
    /// Builds the bundled table. Deterministic: same call always yields the
    /// same data, which is all the in-scope logic (scheduler, channel,
    /// allocator, register programmer) requires of it.
    pub fn load() -> Self {
        let mut adl = Vec::new();
        let mut adlins = Vec::new();

        // Entry 198 is the fixed "unmapped" / silence placeholder.
        while adlins.len() <= UNMAPPED {
            adl.push(AdlOperator::default());
            adlins.push(AdlInstrument {
                adlno1: adl.len() - 1,
                adlno2: adl.len() - 1,
                tone: 0,
                ms_sound_kon: 0.0,
                ms_sound_koff: 0.0,
            });
        }

        // 128 melodic GM instruments, single-operator voices.
        for program in 0..128usize {
            let op = generate_operator(program, false);
            adl.push(op);
            let idx = adl.len() - 1;
            adlins.push(AdlInstrument {
                adlno1: idx,
                adlno2: idx,
                tone: 0,
                ms_sound_kon: 50.0 + (program % 16) as f64 * 10.0,
                ms_sound_koff: 100.0 + (program % 8) as f64 * 20.0,
            });
        }

        // A handful of four-op melodic instruments (organs/strings/pads),
        // exercising the four-op allocation path.
        let four_op_programs = [16usize, 17, 48, 49, 50, 89];
        let mut four_op_index = std::collections::HashMap::new();
        for &program in &four_op_programs {
            let op1 = generate_operator(program, false);
            let op2 = generate_operator(program + 64, false);
            adl.push(op1);
            let idx1 = adl.len() - 1;
            adl.push(op2);
            let idx2 = adl.len() - 1;
            adlins.push(AdlInstrument {
                adlno1: idx1,
                adlno2: idx2,
                tone: 0,
                ms_sound_kon: 80.0,
                ms_sound_koff: 150.0,
            });
            four_op_index.insert(program, adlins.len() - 1);
        }

        // 128 percussion notes (key 0..127 under midiins = 128+note).
        for note in 0..128usize {
            let op = generate_operator(note, true);
            adl.push(op);
            let idx = adl.len() - 1;
            adlins.push(AdlInstrument {
                adlno1: idx,
                adlno2: idx,
                tone: percussion_tone(note),
                ms_sound_kon: 20.0,
                ms_sound_koff: 40.0,
            });
        }

        let melodic_base = UNMAPPED + 1;
        let four_op_base = melodic_base + 128;
        let percussion_base = four_op_base + four_op_programs.len();

        let mut banks = [[UNMAPPED; 256]; NUM_BANKS];
        for bank in banks.iter_mut() {
            for midiins in 0..128usize {
                bank[midiins] = match four_op_index.get(&midiins) {
                    Some(_) => four_op_base + four_op_programs.iter().position(|&p| p == midiins).unwrap(),
                    None => melodic_base + midiins,
                };
            }
            for note in 0..128usize {
                bank[128 + note] = percussion_base + note;
            }
        }

        BankData { adl, adlins, banks }
    }

    pub fn instrument(&self, adlins_index: usize) -> &AdlInstrument {
        &self.adlins[adlins_index.min(self.adlins.len() - 1)]
    }

    pub fn operator(&self, adl_index: usize) -> &AdlOperator {
        &self.adl[adl_index.min(self.adl.len() - 1)]
    }
}

fn percussion_tone(note: usize) -> u8 {
    // Percussion voices generally retune to a fixed drum pitch; a plausible
    // placeholder in the low register, varying gently by note.
    (35 + (note % 24)) as u8
}

fn generate_operator(seed: usize, percussion: bool) -> AdlOperator {
    let s = seed as u64;
    let carrier = OperatorRegs {
        am_vib_egt_ksr_mult: (0x20 | (s % 8)) as u8,
        attack_decay: (0xF0 ^ ((s * 7) % 0x100) as u8) & 0xFF,
        sustain_release: (0x44 ^ ((s * 3) % 0x40) as u8) & 0xFF,
        wave_select: (s % 8) as u8,
    };
    let modulator = OperatorRegs {
        am_vib_egt_ksr_mult: (0x01 | ((s * 5) % 8)) as u8,
        attack_decay: (0xF5 ^ ((s * 11) % 0x100) as u8) & 0xFF,
        sustain_release: (0x63 ^ ((s * 13) % 0x40) as u8) & 0xFF,
        wave_select: ((s * 3) % 8) as u8,
    };
    let carrier_40 = (((s * 2) % 64) | 0x00) as u8;
    let modulator_40 = (((s * 17) % 64) | 0x20) as u8;
    AdlOperator {
        carrier,
        modulator,
        carrier_40,
        modulator_40,
        feedconn: if percussion { 0x04 } else { 0x30 | ((s % 8) as u8) },
        finetune: 0.0,
    }
}
