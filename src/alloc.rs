//! `VoiceAllocator`: chooses physical OPL3 voices for new notes, evicting
//! colliding or stale voices by a cost function. See `spec.md` §4.5.

use crate::banks::BankData;
use crate::midi::channel::MidiChannel;
use crate::opl::{FourOpRole, Opl3Driver, OplChip, VoiceState};

pub struct VoiceAllocator;

impl VoiceAllocator {
    /// Allocates up to two physical voices for a note-on: a primary for
    /// `adlno1` and, if `adlno1 != adlno2`, a secondary for `adlno2`.
    pub fn allocate<C: OplChip>(
        driver: &mut Opl3Driver<C>,
        channels: &mut [MidiChannel],
        bank: &BankData,
        ch: usize,
        adlno1: usize,
        adlno2: usize,
        ms_sound_kon: f64,
        program: u8,
    ) -> (Option<usize>, Option<usize>) {
        let needs_four_op = adlno1 != adlno2;
        let fourops_configured = driver
            .voices_iter()
            .any(|v| v.four_op_role == FourOpRole::FourOpMaster);

        let primary = Self::allocate_primary(
            driver,
            channels,
            bank,
            ch,
            adlno1,
            ms_sound_kon,
            program,
            needs_four_op,
            fourops_configured,
        );

        let secondary = match (primary, needs_four_op) {
            (Some(p), true) => Self::allocate_secondary(driver, channels, p),
            _ => None,
        };

        (primary, secondary)
    }

    #[allow(clippy::too_many_arguments)]
    fn allocate_primary<C: OplChip>(
        driver: &mut Opl3Driver<C>,
        channels: &mut [MidiChannel],
        bank: &BankData,
        ch: usize,
        candidate_adl_index: usize,
        ms_sound_kon: f64,
        program: u8,
        needs_four_op: bool,
        fourops_configured: bool,
    ) -> Option<usize> {
        let mut best_score = if fourops_configured {
            f64::NEG_INFINITY
        } else {
            -ms_sound_kon
        };
        let mut best: Option<usize> = None;

        for v in 0..driver.num_voices() {
            let role = driver.voice(v).four_op_role;
            let role_ok = if needs_four_op {
                role == FourOpRole::FourOpMaster
            } else {
                role == FourOpRole::Regular
            };
            if !role_ok {
                continue;
            }
            let score = Self::cost(driver, bank, v, ch, candidate_adl_index, program);
            if score > best_score {
                best_score = score;
                best = Some(v);
            }
        }

        if let Some(v) = best {
            Self::preempt(driver, channels, v);
        }
        best
    }

    /// The only admissible secondary voice is the OPL3-paired slave of the
    /// chosen primary; accept it unconditionally (after preempting whatever
    /// it currently holds) or reject.
    fn allocate_secondary<C: OplChip>(
        driver: &mut Opl3Driver<C>,
        channels: &mut [MidiChannel],
        primary: usize,
    ) -> Option<usize> {
        let slave = primary + 3;
        if slave >= driver.num_voices() {
            return None;
        }
        Self::preempt(driver, channels, slave);
        Some(slave)
    }

    fn cost<C: OplChip>(
        driver: &Opl3Driver<C>,
        bank: &BankData,
        v: usize,
        ch: usize,
        candidate_adl_index: usize,
        program: u8,
    ) -> f64 {
        let voice = driver.voice(v);
        let meta = bank.instrument(voice.instrument_meta);
        let mut s = voice.age_ms;
        match voice.state {
            VoiceState::On => s -= meta.ms_sound_kon,
            VoiceState::Sustained => s -= meta.ms_sound_kon / 2.0,
            VoiceState::Off => s -= meta.ms_sound_koff / 2.0,
        }
        if voice.instrument_index == candidate_adl_index {
            s += 50.0;
        }
        if voice.midi_channel == Some(ch) {
            s += 1.0;
        }
        let _ = program;
        s += 50.0 * (voice.program as i32 / 128) as f64;
        s
    }

    /// Evicts whatever the chosen voice currently holds: a synchronous
    /// note-off (and active-note removal) if it's audibly on, or a sustain
    /// release if it's held by a pedal.
    fn preempt<C: OplChip>(driver: &mut Opl3Driver<C>, channels: &mut [MidiChannel], v: usize) {
        let (state, owner, note) = {
            let voice = driver.voice(v);
            (voice.state, voice.midi_channel, voice.midi_note)
        };
        match state {
            VoiceState::On => {
                driver.note_off(v);
                let voice = driver.voice_mut(v);
                voice.state = VoiceState::Off;
                voice.age_ms = 0.0;
                if let (Some(owner), Some(note)) = (owner, note) {
                    channels[owner].active_notes.remove(&note);
                }
            }
            VoiceState::Sustained => {
                driver.note_off(v);
                driver.voice_mut(v).state = VoiceState::Off;
            }
            VoiceState::Off => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opl::chip::RecordingChip;
    use std::sync::Arc;

    fn setup(num_fourops: usize) -> (Opl3Driver<RecordingChip>, Arc<BankData>, Vec<MidiChannel>) {
        let bank = Arc::new(BankData::load());
        let chips = vec![RecordingChip::new()];
        let mut driver = Opl3Driver::new(chips, bank.clone(), num_fourops);
        driver.reset(48_000);
        let channels = (0..16).map(|_| MidiChannel::new()).collect();
        (driver, bank, channels)
    }

    #[test]
    fn single_op_instrument_only_uses_primary() {
        let (mut driver, bank, mut channels) = setup(0);
        let (primary, secondary) =
            VoiceAllocator::allocate(&mut driver, &mut channels, &bank, 0, 200, 200, 50.0, 0);
        assert!(primary.is_some());
        assert!(secondary.is_none());
    }

    #[test]
    fn four_op_instrument_pairs_master_and_slave() {
        let (mut driver, bank, mut channels) = setup(1);
        let (primary, secondary) =
            VoiceAllocator::allocate(&mut driver, &mut channels, &bank, 0, 300, 301, 50.0, 0);
        assert_eq!(primary, Some(0));
        assert_eq!(secondary, Some(3));
    }

    #[test]
    fn four_op_instrument_fails_secondary_without_fourops_configured() {
        let (mut driver, bank, mut channels) = setup(0);
        let (primary, secondary) =
            VoiceAllocator::allocate(&mut driver, &mut channels, &bank, 0, 300, 301, 50.0, 0);
        assert!(primary.is_none());
        assert!(secondary.is_none());
    }
}
