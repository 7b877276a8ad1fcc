//! The pitch-formula round-trip law from `spec.md` §8: for any tone in the
//! playable MIDI range, encoding via `Opl3Driver::note_on`'s F-number/block
//! split and decoding back to Hz must stay within 0.1% of
//! `172.00093 * exp(0.057762265 * tone)`.

use std::sync::Arc;

use approx::assert_relative_eq;
use midiplay::banks::BankData;
use midiplay::opl::{Opl3Driver, RecordingChip};

fn hertz_for_tone(tone: f64) -> f64 {
    172.00093 * (0.057762265 * tone).exp()
}

/// Inverse of `Opl3Driver::note_on`'s fnum/block encoding (and exactly what
/// `SoftChip::fnum_block_to_hz` computes), reading the last A0/B0 pair
/// written for a voice's channel.
fn decode_last_fnum_block(writes: &[(u16, u8)]) -> f64 {
    const OPL_REF_CLOCK: f64 = 49_716.0;
    let a0 = writes.iter().rev().find(|&&(a, _)| a == 0xA0).unwrap().1;
    let b0 = writes.iter().rev().find(|&&(a, _)| a == 0xB0).unwrap().1;
    let fnum = (a0 as u16) | (((b0 & 0x3) as u16) << 8);
    let block = (b0 >> 2) & 0x7;
    fnum as f64 * OPL_REF_CLOCK / (1u32 << 20) as f64 * 2f64.powi(block as i32)
}

#[test]
fn note_on_round_trips_within_tenth_of_a_percent() {
    let bank = Arc::new(BankData::load());
    let chips = vec![RecordingChip::new()];
    let mut driver = Opl3Driver::new(chips, bank, 0);
    driver.reset(48_000);

    // `block` is a 3-bit hardware field (0..=7); tones whose scaled
    // frequency needs a higher block than that would overflow into the
    // key-on bit, a limit inherent to OPL3 hardware itself, not this
    // driver. 0..=60 stays comfortably inside the representable range.
    for tone in 0..=60u8 {
        let expected_hz = hertz_for_tone(tone as f64);
        driver.note_on(0, expected_hz);
        let decoded_hz = decode_last_fnum_block(&driver.chip(0).writes);
        assert_relative_eq!(decoded_hz, expected_hz, max_relative = 0.001);
    }
}
