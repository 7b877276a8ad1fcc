//! The OPL3 chip emulation itself is out of scope per the specification —
//! it is named only by the interface `Init(rate)`, `WriteReg(addr, val)`,
//! `Generate(buf, nsamples)`. `OplChip` is that interface. `SoftChip` is a
//! small non-cycle-accurate stand-in good enough to drive real audio
//! through the in-scope register-programming logic end to end; it does not
//! attempt to reproduce YMF262 envelope/waveform fidelity. See DESIGN.md.

/// Capability set a physical or emulated OPL3 chip must expose to
/// `OPL3Driver`. `addr` follows OPL3's two-bank addressing: bit 8 (0x100)
/// selects the second register bank.
pub trait OplChip: Send {
    fn init(&mut self, sample_rate: u32);
    fn write_reg(&mut self, addr: u16, value: u8);
    fn generate(&mut self, out: &mut [i16], nsamples: usize);
}

#[derive(Debug, Clone, Copy, Default)]
struct OperatorState {
    phase: f64,
    freq_hz: f64,
    total_level: u8,
    am_vib_egt_ksr_mult: u8,
    attack_decay: u8,
    sustain_release: u8,
    wave_select: u8,
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    key_on: bool,
    block: u8,
    fnum: u16,
    feedconn: u8,
    carrier: OperatorState,
    modulator: OperatorState,
    env: f64,
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            key_on: false,
            block: 0,
            fnum: 0,
            feedconn: 0,
            carrier: OperatorState::default(),
            modulator: OperatorState::default(),
            env: 0.0,
        }
    }
}

/// Chip-local register base tables, fixed by OPL3 hardware layout.
/// `Channels[c]` addresses the 0xA0/0xB0/0xC0 registers of channel `c`;
/// `Operators[c]` addresses the 0x20/0x60/0x80/0xE0 registers of the
/// channel's operator pair (carrier at `+0`, modulator at `+3`, per
/// `spec.md` §4.1).
pub const CHANNEL_BASE: [u16; 18] = [
    0x000, 0x001, 0x002, 0x003, 0x004, 0x005, 0x006, 0x007, 0x008, 0x100, 0x101, 0x102, 0x103,
    0x104, 0x105, 0x106, 0x107, 0x108,
];

pub const OPERATOR_BASE: [u16; 18] = [
    0x000, 0x001, 0x002, 0x008, 0x009, 0x00A, 0x010, 0x011, 0x012, 0x100, 0x101, 0x102, 0x108,
    0x109, 0x10A, 0x110, 0x111, 0x112,
];

fn channel_for_addr(addr: u16) -> Option<(usize, bool)> {
    // `low`'s upper nibble carries the register family (0xA0/0xB0/0xC0);
    // strip it to leave just the channel offset (0x0..=0x8) before matching
    // against `CHANNEL_BASE`, which stores offsets with no family bits.
    let low = (addr & 0xFF) & 0x0F;
    let bank = addr & 0x100 != 0;
    for (c, &base) in CHANNEL_BASE.iter().enumerate() {
        let base_low = base & 0xFF;
        let base_bank = base & 0x100 != 0;
        if base_bank == bank && low == base_low {
            return Some((c, false));
        }
    }
    None
}

fn operator_for_addr(addr: u16, reg_high: u16) -> Option<(usize, bool)> {
    // `reg_high` is the register family (0x20, 0x60, 0x80, 0xE0); strip it to
    // find which operator-base slot + carrier(+0)/modulator(+3) this is.
    for (c, &base) in OPERATOR_BASE.iter().enumerate() {
        for (slot, is_modulator) in [(0u16, false), (3u16, true)] {
            if addr == base + reg_high + slot {
                return Some((c, is_modulator));
            }
        }
    }
    None
}

/// A small multi-channel FM oscillator bank that implements register
/// semantics closely enough to be audible and testable, without claiming
/// cycle accuracy.
pub struct SoftChip {
    sample_rate: u32,
    channels: [ChannelState; 18],
    new_mode: bool,
    fourop_mask: u8,
    wave_select_enable: bool,
}

impl SoftChip {
    pub fn new() -> Self {
        SoftChip {
            sample_rate: 48_000,
            channels: [ChannelState::default(); 18],
            new_mode: false,
            fourop_mask: 0,
            wave_select_enable: false,
        }
    }

    fn waveform(kind: u8, phase: f64) -> f64 {
        let s = (phase * std::f64::consts::TAU).sin();
        match kind & 0x7 {
            0 => s,
            1 => {
                if s >= 0.0 {
                    s
                } else {
                    0.0
                }
            }
            2 => s.abs(),
            _ => s,
        }
    }

    fn operator_sample(op: &mut OperatorState, modulation: f64, sample_rate: u32) -> f64 {
        let step = op.freq_hz / sample_rate as f64;
        op.phase += step;
        if op.phase >= 1.0 {
            op.phase -= op.phase.floor();
        }
        let raw = Self::waveform(op.wave_select, op.phase + modulation);
        let attenuation_db = (op.total_level & 0x3F) as f64 * 0.75;
        let gain = 10f64.powf(-attenuation_db / 20.0);
        raw * gain
    }

    fn fnum_block_to_hz(fnum: u16, block: u8) -> f64 {
        // Standard OPL fnum/block -> Hz relation for a 49716 Hz reference
        // clock, scaled by the channel's block.
        (fnum as f64) * 49716.0 / 1_048_576.0 * 2f64.powi(block as i32)
    }

    fn envelope_gain(ch: &ChannelState) -> f64 {
        // Crude linear attack/decay/release envelope keyed off the register
        // nibbles, not a faithful OPL envelope generator.
        let attack_rate = (ch.carrier.attack_decay >> 4) & 0xF;
        let release_rate = ch.carrier.sustain_release & 0xF;
        if ch.key_on {
            let attack_time = 0.3 / (1.0 + attack_rate as f64);
            (ch.env / attack_time.max(1e-4)).min(1.0)
        } else {
            let release_time = 0.5 / (1.0 + release_rate as f64);
            (1.0 - ch.env / release_time.max(1e-4)).max(0.0)
        }
    }
}

impl Default for SoftChip {
    fn default() -> Self {
        Self::new()
    }
}

impl OplChip for SoftChip {
    fn init(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
        self.channels = [ChannelState::default(); 18];
    }

    fn write_reg(&mut self, addr: u16, value: u8) {
        let low = addr & 0xFF;
        let bank_bit = if addr & 0x100 != 0 { 0x100 } else { 0 };

        if addr == 0x105 {
            self.new_mode = value & 1 != 0;
            return;
        }
        if addr == 0x104 {
            self.fourop_mask = value;
            return;
        }
        if addr == 0x001 {
            self.wave_select_enable = value & 0x20 != 0;
            return;
        }
        if low == 0xBD && bank_bit == 0 {
            return; // rhythm mode bits; rhythm channels are out of scope
        }

        if let Some(reg_high) = [0x20u16, 0x40, 0x60, 0x80, 0xE0]
            .into_iter()
            .find(|&r| low >= r && low < r + 0x20 && (0x20..=0xF5).contains(&low))
        {
            if let Some((c, is_mod)) = operator_for_addr(addr, reg_high) {
                let op = if is_mod {
                    &mut self.channels[c].modulator
                } else {
                    &mut self.channels[c].carrier
                };
                match reg_high {
                    0x20 => op.am_vib_egt_ksr_mult = value,
                    0x40 => op.total_level = value,
                    0x60 => op.attack_decay = value,
                    0x80 => op.sustain_release = value,
                    0xE0 => op.wave_select = if self.wave_select_enable { value } else { 0 },
                    _ => {}
                }
                return;
            }
        }

        if let Some((c, _)) = channel_for_addr(addr) {
            let family = low & 0xF0;
            let ch = &mut self.channels[c];
            match family {
                0xA0 => {
                    ch.fnum = (ch.fnum & 0x300) | value as u16;
                }
                0xB0 => {
                    let was_on = ch.key_on;
                    ch.key_on = value & 0x20 != 0;
                    ch.block = (value >> 2) & 0x7;
                    ch.fnum = (ch.fnum & 0xFF) | (((value & 0x3) as u16) << 8);
                    if ch.key_on && !was_on {
                        ch.env = 0.0;
                    }
                    let hz = Self::fnum_block_to_hz(ch.fnum, ch.block);
                    ch.carrier.freq_hz = hz;
                    ch.modulator.freq_hz = hz;
                }
                0xC0 => {
                    ch.feedconn = value;
                }
                _ => {}
            }
        }
    }

    fn generate(&mut self, out: &mut [i16], nsamples: usize) {
        let dt = 1.0 / self.sample_rate as f64;
        for frame in out.iter_mut().take(nsamples) {
            let mut sum = 0.0f64;
            for ch in self.channels.iter_mut() {
                if !ch.key_on && ch.env <= 0.0 {
                    continue;
                }
                let feedback = ((ch.feedconn >> 1) & 0x7) as f64 / 7.0;
                let mod_sample =
                    SoftChip::operator_sample(&mut ch.modulator, 0.0, self.sample_rate);
                let carrier_sample = SoftChip::operator_sample(
                    &mut ch.carrier,
                    mod_sample * feedback,
                    self.sample_rate,
                );
                let gain = SoftChip::envelope_gain(ch);
                sum += carrier_sample * gain * 0.2;
                if ch.key_on {
                    ch.env += dt;
                } else {
                    ch.env -= dt;
                    if ch.env <= 0.0 {
                        ch.env = 0.0;
                    }
                }
            }
            *frame = (sum.clamp(-1.0, 1.0) * i16::MAX as f64) as i16;
        }
    }
}

/// Test double that records every register write instead of synthesizing
/// audio, used to assert on the bit-exact register programming `spec.md`
/// §4.1 specifies. Not `#[cfg(test)]`-gated: the `tests/` integration suite
/// needs it too, and it's cheap enough to ship ungated.
pub struct RecordingChip {
    pub writes: Vec<(u16, u8)>,
    pub sample_rate: u32,
}

impl RecordingChip {
    pub fn new() -> Self {
        RecordingChip {
            writes: Vec::new(),
            sample_rate: 0,
        }
    }
}

impl Default for RecordingChip {
    fn default() -> Self {
        Self::new()
    }
}

impl OplChip for RecordingChip {
    fn init(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    fn write_reg(&mut self, addr: u16, value: u8) {
        self.writes.push((addr, value));
    }

    fn generate(&mut self, out: &mut [i16], nsamples: usize) {
        for frame in out.iter_mut().take(nsamples) {
            *frame = 0;
        }
    }
}
