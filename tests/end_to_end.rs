//! Drives the literal end-to-end scenarios from `spec.md` §8 against
//! in-memory SMF byte arrays, using `RecordingChip` so assertions can
//! inspect voice/channel state without real audio.

mod common;

use std::sync::Arc;

use midiplay::banks::BankData;
use midiplay::midi::channel::MidiChannel;
use midiplay::midi::scheduler::Scheduler;
use midiplay::opl::{Opl3Driver, RecordingChip, VoiceState};

const PPQ: u16 = 480;
const STEP: f64 = 0.01;

struct Harness {
    scheduler: Scheduler,
    driver: Opl3Driver<RecordingChip>,
    channels: Vec<MidiChannel>,
    bank: Arc<BankData>,
}

impl Harness {
    fn new(bytes: &[u8]) -> Self {
        let bank = Arc::new(BankData::load());
        let scheduler = Scheduler::load("t.mid", bytes).unwrap();
        let chips = vec![RecordingChip::new()];
        let mut driver = Opl3Driver::new(chips, bank.clone(), 1);
        driver.reset(48_000);
        let channels = (0..16).map(|_| MidiChannel::new()).collect();
        Harness {
            scheduler,
            driver,
            channels,
            bank,
        }
    }

    fn advance(&mut self, seconds: f64) {
        let mut remaining = seconds;
        while remaining > 0.0 {
            self.scheduler
                .tick(&mut self.driver, &mut self.channels, &self.bank, 0, STEP, STEP);
            remaining -= STEP;
        }
    }
}

#[test]
fn single_note_playback() {
    let mut body = Vec::new();
    common::push_event(&mut body, 0, &[0x90, 0x3C, 0x64]); // note on C4 vel 100
    common::push_event(&mut body, 480, &[0x80, 0x3C, 0x00]); // note off 0.5s later
    common::end_of_track(&mut body, 0);
    let bytes = common::build_smf(1, PPQ, &[body]);

    let mut h = Harness::new(&bytes);
    h.advance(0.05);
    assert!(h.channels[0].active_notes.contains_key(&0x3C));
    let voice = h.channels[0].active_notes[&0x3C].voice_primary.unwrap();
    assert_eq!(h.driver.voice(voice).state, VoiceState::On);

    h.advance(0.6);
    assert!(!h.channels[0].active_notes.contains_key(&0x3C));
    assert_eq!(h.driver.voice(voice).state, VoiceState::Off);
    assert_eq!(h.driver.voice(voice).age_ms, 0.0);
}

#[test]
fn sustain_hold_defers_note_off() {
    let mut body = Vec::new();
    common::push_event(&mut body, 0, &[0x90, 0x3C, 0x64]);
    common::push_event(&mut body, 120, &[0xB0, 64, 127]); // sustain on at 0.125s
    common::push_event(&mut body, 120, &[0x80, 0x3C, 0x00]); // note off at 0.25s
    common::push_event(&mut body, 360, &[0xB0, 64, 0]); // sustain off at 0.625s
    common::end_of_track(&mut body, 0);
    let bytes = common::build_smf(1, PPQ, &[body]);

    let mut h = Harness::new(&bytes);
    h.advance(0.3);
    let voice = h.channels[0].active_notes[&0x3C].voice_primary.unwrap();
    assert_eq!(h.driver.voice(voice).state, VoiceState::Sustained);

    h.advance(0.8);
    assert_eq!(h.driver.voice(voice).state, VoiceState::Off);
}

#[test]
fn running_status_keys_on_two_notes_without_repeating_status() {
    let mut body = Vec::new();
    common::push_event(&mut body, 0, &[0x90, 0x3C, 0x64]); // note on C4
    common::push_event(&mut body, 0, &[0x3E, 0x64]); // running status: note on E4
    common::push_event(&mut body, 480, &[0x80, 0x3C, 0x00]); // note off C4
    common::push_event(&mut body, 0, &[0x3E, 0x00]); // running status: note off E4
    common::end_of_track(&mut body, 0);
    let bytes = common::build_smf(1, PPQ, &[body]);

    let mut h = Harness::new(&bytes);
    h.advance(0.05);
    assert!(h.channels[0].active_notes.contains_key(&0x3C));
    assert!(h.channels[0].active_notes.contains_key(&0x3E));

    h.advance(0.6);
    assert!(!h.channels[0].active_notes.contains_key(&0x3C));
    assert!(!h.channels[0].active_notes.contains_key(&0x3E));
}

#[test]
fn tempo_change_mid_song_shifts_real_time() {
    let mut body = Vec::new();
    common::push_event(&mut body, 0, &[0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]); // 500000us/qtr
    common::push_event(&mut body, 480, &[0xFF, 0x51, 0x03, 0x03, 0xD0, 0x90]); // 250000us/qtr
    common::push_event(&mut body, 480, &[0x90, 0x40, 0x64]); // note on at tick 960
    common::end_of_track(&mut body, 0);
    let bytes = common::build_smf(1, PPQ, &[body]);

    let mut h = Harness::new(&bytes);
    // First 480 ticks cost 0.5s (old tempo), next 480 cost 0.25s (new tempo):
    // the note-on should not have fired yet just before t=0.75s.
    h.advance(0.70);
    assert!(!h.channels[0].active_notes.contains_key(&0x40));
    h.advance(0.10);
    assert!(h.channels[0].active_notes.contains_key(&0x40));
}

#[test]
fn loop_markers_restart_playback_at_loop_start() {
    // loopStart .. note on C4 .. note off C4 .. loopEnd, with nothing after
    // loopEnd. Each lap is 1.0s (960 ticks at 500000us/qtr, 480 ticks/qtr).
    // A run long enough to cross loopEnd twice must see C4 fire again on the
    // second lap, proving playback rewound to loopStart instead of stopping.
    let mut body = Vec::new();
    common::push_event(
        &mut body,
        0,
        &[0xFF, 0x06, 0x09, b'l', b'o', b'o', b'p', b'S', b't', b'a', b'r', b't'],
    );
    common::push_event(&mut body, 0, &[0x90, 0x3C, 0x64]);
    common::push_event(&mut body, 480, &[0x80, 0x3C, 0x00]);
    common::push_event(
        &mut body,
        480,
        &[0xFF, 0x06, 0x07, b'l', b'o', b'o', b'p', b'E', b'n', b'd'],
    );
    let bytes = common::build_smf(1, PPQ, &[body]);

    let mut h = Harness::new(&bytes);
    h.advance(0.05);
    assert!(h.channels[0].active_notes.contains_key(&0x3C));

    // Past the first loopEnd and into the second lap's note-on.
    h.advance(1.0);
    assert!(
        h.channels[0].active_notes.contains_key(&0x3C),
        "loopEnd should rewind to loopStart and key C4 on again"
    );
}

#[test]
fn four_op_allocation_pairs_master_and_slave_voice() {
    // Program 16 (organ) is wired to a four-op instrument in the bundled
    // bank (see src/banks.rs's four_op_programs list).
    let mut body = Vec::new();
    common::push_event(&mut body, 0, &[0xC0, 16]); // program change to 16
    common::push_event(&mut body, 0, &[0x90, 0x3C, 0x64]);
    common::end_of_track(&mut body, 480);
    let bytes = common::build_smf(1, PPQ, &[body]);

    let mut h = Harness::new(&bytes);
    h.advance(0.05);
    let active = &h.channels[0].active_notes[&0x3C];
    assert_eq!(active.voice_primary, Some(0));
    assert_eq!(active.voice_secondary, Some(3));
}
