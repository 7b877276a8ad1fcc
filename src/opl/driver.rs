use std::sync::Arc;

use crate::banks::BankData;
use crate::opl::chip::{OplChip, CHANNEL_BASE, OPERATOR_BASE};
use crate::opl::voice::{FourOpRole, Voice, VoiceState};

/// Chip-channel pairs eligible for four-op combination, lower-indexed pairs
/// given priority, per `spec.md` §4.1.
const FOUR_OP_PAIRS: [(usize, usize); 6] = [(0, 3), (1, 4), (2, 5), (9, 12), (10, 13), (11, 14)];

/// Owns `N` emulated OPL3 chips and the flat voice-metadata table of length
/// `18*N`. All high-level note/patch/pan operations reduce to `poke`, which
/// forwards to the owning chip's `write_reg`.
pub struct Opl3Driver<C: OplChip> {
    chips: Vec<C>,
    voices: Vec<Voice>,
    bank: Arc<BankData>,
    num_fourops: usize,
}

impl<C: OplChip> Opl3Driver<C> {
    pub fn new(chips: Vec<C>, bank: Arc<BankData>, num_fourops: usize) -> Self {
        let num_cards = chips.len();
        let voices = (0..18 * num_cards).map(|_| Voice::new()).collect();
        Opl3Driver {
            chips,
            voices,
            bank,
            num_fourops,
        }
    }

    pub fn num_cards(&self) -> usize {
        self.chips.len()
    }

    pub fn num_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn voice(&self, v: usize) -> &Voice {
        &self.voices[v]
    }

    pub fn voice_mut(&mut self, v: usize) -> &mut Voice {
        &mut self.voices[v]
    }

    /// Read-only access to a chip, e.g. to inspect `RecordingChip::writes`
    /// in tests.
    pub fn chip(&self, chip_index: usize) -> &C {
        &self.chips[chip_index]
    }

    pub fn voices_iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    pub fn voices_iter_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.voices.iter_mut()
    }

    fn split(v: usize) -> (usize, usize) {
        (v / 18, v % 18)
    }

    fn poke(&mut self, chip_index: usize, register: u16, value: u8) {
        self.chips[chip_index].write_reg(register, value);
    }

    pub fn generate(&mut self, chip_index: usize, out: &mut [i16], nsamples: usize) {
        self.chips[chip_index].generate(out, nsamples);
    }

    /// Writes `0xB0+Channels[c]` with the key-on bit cleared, preserving the
    /// stored octave/F-number high bits.
    pub fn note_off(&mut self, v: usize) {
        let (chip, c) = Self::split(v);
        let pit = self.voices[v].pitch_word;
        self.poke(chip, 0xB0 + CHANNEL_BASE[c], pit & 0xDF);
    }

    /// Computes F-number/block from `hertz` and writes the key-on word.
    /// `fnum = hertz * 2^(20-block) / OPL_REF_CLOCK`, with `block` the
    /// smallest value keeping `fnum` under the 10-bit field's 1023.5 edge —
    /// the standard OPL3 frequency encoding (`SoftChip::fnum_block_to_hz` is
    /// its exact inverse, which is what the pitch-formula round-trip test
    /// exercises).
    pub fn note_on(&mut self, v: usize, hertz: f64) {
        const OPL_REF_CLOCK: f64 = 49_716.0;
        let (chip, c) = Self::split(v);
        let mut scaled = hertz * (1u32 << 20) as f64 / OPL_REF_CLOCK;
        let mut block: u32 = 0;
        while scaled >= 1023.5 {
            scaled /= 2.0;
            block += 1;
        }
        let x: u32 = 0x2000 + block * 0x400 + scaled.round() as u32;
        let lo = (x & 0xFF) as u8;
        let hi = ((x >> 8) & 0xFF) as u8;
        self.poke(chip, 0xA0 + CHANNEL_BASE[c], lo);
        self.poke(chip, 0xB0 + CHANNEL_BASE[c], hi);
        self.voices[v].pitch_word = hi;
    }

    /// Writes the carrier/modulator TL bytes scaled against `vol` (0..63),
    /// preserving each byte's KSL bits.
    pub fn touch_real(&mut self, v: usize, vol: i32) {
        let (chip, c) = Self::split(v);
        let op = self.bank.operator(self.voices[v].instrument_index);
        let (carrier_40, modulator_40) = (op.carrier_40 as i32, op.modulator_40 as i32);
        let vol = vol.clamp(0, 63);

        let carrier_val = scale_tl(carrier_40, vol);
        let modulator_val = scale_tl(modulator_40, vol);

        let op_base = OPERATOR_BASE[c];
        self.poke(chip, 0x40 + op_base, carrier_val);
        self.poke(chip, 0x43 + op_base, modulator_val);
    }

    /// Applies the OPL3 perceptual volume curve and calls `touch_real`.
    pub fn touch(&mut self, v: usize, vol: f64) {
        if vol <= 8725.0 {
            self.touch_real(v, 0);
            return;
        }
        let attenuation = vol.ln() * 11.541561 - 103.72845;
        self.touch_real(v, attenuation.round() as i32);
    }

    /// Writes the four operator parameter bytes for carrier (operator+0)
    /// and modulator (operator+3) from the bank's instrument table.
    pub fn patch(&mut self, v: usize, adl_index: usize) {
        let (chip, c) = Self::split(v);
        let op = *self.bank.operator(adl_index);
        let op_base = OPERATOR_BASE[c];
        self.poke(chip, 0x20 + op_base, op.carrier.am_vib_egt_ksr_mult);
        self.poke(chip, 0x60 + op_base, op.carrier.attack_decay);
        self.poke(chip, 0x80 + op_base, op.carrier.sustain_release);
        self.poke(chip, 0xE0 + op_base, op.carrier.wave_select);
        self.poke(chip, 0x23 + op_base, op.modulator.am_vib_egt_ksr_mult);
        self.poke(chip, 0x63 + op_base, op.modulator.attack_decay);
        self.poke(chip, 0x83 + op_base, op.modulator.sustain_release);
        self.poke(chip, 0xE3 + op_base, op.modulator.wave_select);
        self.voices[v].instrument_index = adl_index;
    }

    /// Writes `0xC0+Channels[c]` with the instrument's feedback/algorithm
    /// bits OR'd with the 2-bit stereo mask.
    pub fn pan(&mut self, v: usize, encoded: u8) {
        let (chip, c) = Self::split(v);
        let op = self.bank.operator(self.voices[v].instrument_index);
        let value = op.feedconn | encoded;
        self.poke(chip, 0xC0 + CHANNEL_BASE[c], value);
    }

    /// Key off and silence every voice on every chip.
    pub fn silence(&mut self) {
        for v in 0..self.voices.len() {
            self.note_off(v);
            self.touch_real(v, 0);
        }
    }

    /// Initializes chips at `sample_rate`, performs the exact boot sequence
    /// enabling OPL3/four-op mode, computes each voice's four-op role, and
    /// silences every voice.
    pub fn reset(&mut self, sample_rate: u32) {
        let num_cards = self.chips.len();
        let fours_per_card = distribute_fourops(self.num_fourops, num_cards);

        for (chip_index, chip) in self.chips.iter_mut().enumerate() {
            chip.init(sample_rate);
            let _ = chip_index;
        }

        for chip_index in 0..num_cards {
            // Pulse timer mask.
            self.poke(chip_index, 0x04, 0x60);
            self.poke(chip_index, 0x04, 0x80);
            // Pulse OPL3 "new" mode bit.
            self.poke(chip_index, 0x105, 0x00);
            self.poke(chip_index, 0x105, 0x01);
            // Enable waveform select, force melodic (non-rhythm) mode.
            self.poke(chip_index, 0x001, 0x20);
            self.poke(chip_index, 0xBD, 0x00);
            // Four-op enable bitmap.
            let fours_this_card = fours_per_card[chip_index];
            let bitmap = if fours_this_card == 0 {
                0
            } else {
                (1u8 << fours_this_card).wrapping_sub(1)
            };
            self.poke(chip_index, 0x104, bitmap);

            for (pair_index, &(a, b)) in FOUR_OP_PAIRS.iter().enumerate() {
                let v_a = chip_index * 18 + a;
                let v_b = chip_index * 18 + b;
                if pair_index < fours_this_card {
                    self.voices[v_a].four_op_role = FourOpRole::FourOpMaster;
                    self.voices[v_b].four_op_role = FourOpRole::FourOpSlave;
                } else {
                    self.voices[v_a].four_op_role = FourOpRole::Regular;
                    self.voices[v_b].four_op_role = FourOpRole::Regular;
                }
            }
            for c in 0..18 {
                let is_pair_member = FOUR_OP_PAIRS.iter().any(|&(a, b)| a == c || b == c);
                if !is_pair_member {
                    self.voices[chip_index * 18 + c].four_op_role = FourOpRole::Regular;
                }
            }
        }

        self.silence();
        for voice in self.voices.iter_mut() {
            voice.state = VoiceState::Off;
            voice.age_ms = 0.0;
            voice.midi_channel = None;
            voice.midi_note = None;
        }
    }
}

fn scale_tl(x: i32, vol: i32) -> u8 {
    let base = x | 63;
    let scaled = base - vol + vol * (x & 63) / 63;
    scaled.clamp(0, 255) as u8
}

/// Splits a requested total four-op count across cards, lower-indexed cards
/// first, capped at 6 per card.
fn distribute_fourops(total: usize, num_cards: usize) -> Vec<usize> {
    let mut remaining = total;
    let mut out = vec![0usize; num_cards.max(1)];
    for slot in out.iter_mut() {
        let take = remaining.min(6);
        *slot = take;
        remaining -= take;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opl::chip::RecordingChip;

    fn driver_with(num_cards: usize, num_fourops: usize) -> Opl3Driver<RecordingChip> {
        let bank = Arc::new(BankData::load());
        let chips = (0..num_cards).map(|_| RecordingChip::new()).collect();
        Opl3Driver::new(chips, bank, num_fourops)
    }

    #[test]
    fn four_op_pairing_assigns_master_and_slave() {
        let mut drv = driver_with(1, 1);
        drv.reset(48_000);
        assert_eq!(drv.voice(0).four_op_role, FourOpRole::FourOpMaster);
        assert_eq!(drv.voice(3).four_op_role, FourOpRole::FourOpSlave);
        assert_eq!(drv.voice(1).four_op_role, FourOpRole::Regular);
    }

    #[test]
    fn zero_fourops_leaves_everything_regular() {
        let mut drv = driver_with(1, 0);
        drv.reset(48_000);
        for v in 0..18 {
            assert_eq!(drv.voice(v).four_op_role, FourOpRole::Regular);
        }
    }

    #[test]
    fn note_on_computes_block_and_fnum() {
        let mut drv = driver_with(1, 0);
        drv.reset(48_000);
        drv.chips[0].writes.clear();
        // Scaled by the 49716 Hz reference clock, 172.00093 Hz needs two
        // halvings to fit the 10-bit fnum field.
        drv.note_on(0, 172.00093);
        let (addr, value) = drv.chips[0].writes.last().copied().unwrap();
        assert_eq!(addr, 0xB0);
        assert_eq!(value & 0x20, 0x20, "key-on bit must be set");
        assert_eq!((value >> 2) & 0x7, 2, "block should be 2 for 172 Hz");
    }

    #[test]
    fn note_off_preserves_octave_bits_and_clears_key_on() {
        let mut drv = driver_with(1, 0);
        drv.reset(48_000);
        drv.note_on(0, 3000.0); // forces block > 0
        let pit_after_on = drv.voice(0).pitch_word;
        assert_ne!(pit_after_on & 0x1C, 0);
        drv.note_off(0);
        let (addr, value) = drv.chips[0].writes.last().copied().unwrap();
        assert_eq!(addr, 0xB0);
        assert_eq!(value & 0x20, 0, "key-on bit must be cleared");
        assert_eq!(value & 0x1C, pit_after_on & 0x1C, "octave bits preserved");
    }

    #[test]
    fn touch_real_is_monotonic_in_volume() {
        let mut drv = driver_with(1, 0);
        drv.reset(48_000);
        drv.patch(0, 200);
        let mut last_tl: Option<u8> = None;
        for vol in (0..=63).step_by(9) {
            drv.chips[0].writes.clear();
            drv.touch_real(0, vol);
            let (_, value) = drv.chips[0].writes[0];
            let tl = value & 0x3F;
            if let Some(prev) = last_tl {
                assert!(tl <= prev, "attenuation must be non-increasing as vol rises");
            }
            last_tl = Some(tl);
        }
    }
}
