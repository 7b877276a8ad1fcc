//! Boundary-behavior checks from `spec.md` §8 that are easiest to exercise
//! by driving `handle_channel_event` directly rather than through full SMF
//! bytes.

mod common;

use std::sync::Arc;

use midiplay::banks::BankData;
use midiplay::midi::channel::{handle_channel_event, ChannelEventContext, MidiChannel};
use midiplay::midi::scheduler::Scheduler;
use midiplay::opl::{Opl3Driver, RecordingChip, VoiceState};

fn setup() -> (Opl3Driver<RecordingChip>, Arc<BankData>, Vec<MidiChannel>) {
    let bank = Arc::new(BankData::load());
    let chips = vec![RecordingChip::new()];
    let mut driver = Opl3Driver::new(chips, bank.clone(), 0);
    driver.reset(48_000);
    let channels = (0..16).map(|_| MidiChannel::new()).collect();
    (driver, bank, channels)
}

#[test]
fn zero_velocity_note_on_behaves_as_note_off() {
    let (mut driver, bank, mut channels) = setup();
    {
        let mut ctx = ChannelEventContext {
            channels: &mut channels,
            driver: &mut driver,
            bank: &bank,
            adl_bank: 0,
        };
        handle_channel_event(&mut ctx, 0, 0x9, 0x3C, 100);
    }
    assert!(channels[0].active_notes.contains_key(&0x3C));

    let mut ctx = ChannelEventContext {
        channels: &mut channels,
        driver: &mut driver,
        bank: &bank,
        adl_bank: 0,
    };
    handle_channel_event(&mut ctx, 0, 0x9, 0x3C, 0);
    assert!(!channels[0].active_notes.contains_key(&0x3C));
}

#[test]
fn all_notes_off_only_clears_triggering_channel() {
    let (mut driver, bank, mut channels) = setup();
    for (ch, note) in [(0u8, 0x3Cu8), (1, 0x40)] {
        let mut ctx = ChannelEventContext {
            channels: &mut channels,
            driver: &mut driver,
            bank: &bank,
            adl_bank: 0,
        };
        handle_channel_event(&mut ctx, ch as usize, 0x9, note, 100);
    }
    assert!(channels[0].active_notes.contains_key(&0x3C));
    assert!(channels[1].active_notes.contains_key(&0x40));

    let mut ctx = ChannelEventContext {
        channels: &mut channels,
        driver: &mut driver,
        bank: &bank,
        adl_bank: 0,
    };
    handle_channel_event(&mut ctx, 0, 0xB, 123, 0); // CC 123: all notes off, channel 0

    assert!(!channels[0].active_notes.contains_key(&0x3C));
    assert!(channels[1].active_notes.contains_key(&0x40));
}

#[test]
fn sustain_release_keys_off_sustained_voices_on_every_channel() {
    let (mut driver, bank, mut channels) = setup();
    let mut voices = Vec::new();
    for (ch, note) in [(0u8, 0x3Cu8), (1, 0x40)] {
        let mut ctx = ChannelEventContext {
            channels: &mut channels,
            driver: &mut driver,
            bank: &bank,
            adl_bank: 0,
        };
        handle_channel_event(&mut ctx, ch as usize, 0xB, 64, 127); // sustain on
        handle_channel_event(&mut ctx, ch as usize, 0x9, note, 100);
        // Capture the voice before note-off removes the ActiveNote entry
        // (note_update() drops the map entry unconditionally on an Off
        // flag; only the voice's own state records the sustain hold).
        voices.push(channels[ch as usize].active_notes[&note].voice_primary.unwrap());
        handle_channel_event(&mut ctx, ch as usize, 0x8, note, 0); // note off -> sustained
    }
    let (ch0_voice, ch1_voice) = (voices[0], voices[1]);
    assert_eq!(driver.voice(ch0_voice).state, VoiceState::Sustained);
    assert_eq!(driver.voice(ch1_voice).state, VoiceState::Sustained);

    // CC 64 value 0 on channel 0 must release every sustained voice, not
    // just channel 0's.
    let mut ctx = ChannelEventContext {
        channels: &mut channels,
        driver: &mut driver,
        bank: &bank,
        adl_bank: 0,
    };
    handle_channel_event(&mut ctx, 0, 0xB, 64, 0);

    assert_eq!(driver.voice(ch0_voice).state, VoiceState::Off);
    assert_eq!(driver.voice(ch1_voice).state, VoiceState::Off);
}

#[test]
fn program_change_does_not_retune_an_already_sounding_note() {
    let (mut driver, bank, mut channels) = setup();
    let mut ctx = ChannelEventContext {
        channels: &mut channels,
        driver: &mut driver,
        bank: &bank,
        adl_bank: 0,
    };
    handle_channel_event(&mut ctx, 0, 0x9, 0x3C, 100); // program 0 (default)
    let instrument_before = driver.voice(channels[0].active_notes[&0x3C].voice_primary.unwrap())
        .instrument_index;

    let mut ctx = ChannelEventContext {
        channels: &mut channels,
        driver: &mut driver,
        bank: &bank,
        adl_bank: 0,
    };
    handle_channel_event(&mut ctx, 0, 0xC, 40, 0); // program change to 40
    assert_eq!(channels[0].program, 40);

    let instrument_after = driver.voice(channels[0].active_notes[&0x3C].voice_primary.unwrap())
        .instrument_index;
    assert_eq!(
        instrument_before, instrument_after,
        "program change must not retune an already-sounding note"
    );
}

#[test]
fn end_of_track_on_one_track_does_not_halt_others() {
    let mut short_track = Vec::new();
    common::end_of_track(&mut short_track, 0);

    let mut long_track = Vec::new();
    common::push_event(&mut long_track, 240, &[0x90, 0x3C, 0x64]);
    common::end_of_track(&mut long_track, 0);

    let bytes = common::build_smf(2, 480, &[short_track, long_track]);
    let bank = Arc::new(BankData::load());
    let mut scheduler = Scheduler::load("t.mid", &bytes).unwrap();
    let chips = vec![RecordingChip::new()];
    let mut driver = Opl3Driver::new(chips, bank.clone(), 0);
    driver.reset(48_000);
    let mut channels: Vec<MidiChannel> = (0..16).map(|_| MidiChannel::new()).collect();

    let mut remaining = 0.3;
    while remaining > 0.0 {
        scheduler.tick(&mut driver, &mut channels, &bank, 0, 0.01, 0.01);
        remaining -= 0.01;
    }

    assert!(
        channels[0].active_notes.contains_key(&0x3C),
        "track 1's finished end-of-track must not prevent track 2's note-on"
    );
}
