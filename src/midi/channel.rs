use std::collections::BTreeMap;

use crate::alloc::VoiceAllocator;
use crate::banks::BankData;
use crate::opl::{FourOpRole, Opl3Driver, OplChip, VoiceState};

pub mod flags {
    pub const OFF: u8 = 1 << 0;
    pub const PATCH: u8 = 1 << 1;
    pub const PAN: u8 = 1 << 2;
    pub const VOLUME: u8 = 1 << 3;
    pub const PITCH: u8 = 1 << 4;
    pub const ALL_BUT_OFF: u8 = PATCH | PAN | VOLUME | PITCH;
    pub const PAN_VOLUME_PITCH: u8 = PAN | VOLUME | PITCH;
}

/// A currently-playing note, binding it to one or two physical voices.
#[derive(Debug, Clone)]
pub struct ActiveNote {
    pub voice_primary: Option<usize>,
    pub voice_secondary: Option<usize>,
    pub velocity: u8,
    pub ins_primary: usize,
    pub ins_secondary: usize,
    /// Effective pitch number; may differ from the played note for
    /// percussion instruments with a tone override.
    pub tone: f64,
}

/// One of the 16 logical MIDI channels (channel 9 is percussion).
#[derive(Debug, Clone)]
pub struct MidiChannel {
    pub program: u8,
    pub bank_msb: u8,
    pub bank_lsb: u8,
    pub volume: u8,
    pub expression: u8,
    /// Encoded OPL3 stereo bits: 0x10 = left, 0x20 = right.
    pub panning: u8,
    pub pitch_bend: f64,
    pub bend_sensitivity: f64,
    pub sustain: bool,
    pub vib_depth_index: u8,
    pub vib_speed: f64,
    pub vib_depth: f64,
    pub vib_delay_ms: f64,
    pub vib_phase: f64,
    pub last_lsb: u8,
    pub last_msb: u8,
    pub is_nrpn: bool,
    pub active_notes: BTreeMap<u8, ActiveNote>,
}

impl MidiChannel {
    pub fn new() -> Self {
        let mut ch = MidiChannel {
            program: 0,
            bank_msb: 0,
            bank_lsb: 0,
            volume: 100,
            expression: 100,
            panning: 0x30,
            pitch_bend: 0.0,
            bend_sensitivity: 2.0 / 8192.0,
            sustain: false,
            vib_depth_index: 0,
            vib_speed: std::f64::consts::TAU * 5.0,
            vib_depth: 0.0,
            vib_delay_ms: 0.0,
            vib_phase: 0.0,
            last_lsb: 0,
            last_msb: 0,
            is_nrpn: false,
            active_notes: BTreeMap::new(),
        };
        ch.reset_controllers();
        ch
    }

    pub fn reset_controllers(&mut self) {
        self.pitch_bend = 0.0;
        self.bend_sensitivity = 2.0 / 8192.0;
        self.volume = 100;
        self.expression = 100;
        self.sustain = false;
        self.vib_depth_index = 0;
        self.vib_speed = std::f64::consts::TAU * 5.0;
        self.vib_depth = 0.0;
        self.vib_delay_ms = 0.0;
        self.panning = 0x30;
    }

    pub fn vibrato_active(&self) -> bool {
        self.vib_depth_index != 0
    }
}

impl Default for MidiChannel {
    fn default() -> Self {
        MidiChannel::new()
    }
}

/// Context bundling the cross-cutting collaborators channel event handling
/// needs: the full channel array (aftertouch/RPN only ever touch the
/// dispatching channel, but allocation can steal voices from any channel),
/// the OPL3 driver, the allocator, and the read-only bank tables.
pub struct ChannelEventContext<'a, C: OplChip> {
    pub channels: &'a mut [MidiChannel],
    pub driver: &'a mut Opl3Driver<C>,
    pub bank: &'a BankData,
    pub adl_bank: usize,
}

fn warn_unmapped_once(bank_msb: u8, midiins: usize) {
    use std::collections::HashSet;
    use std::sync::{Mutex, OnceLock};
    static SEEN: OnceLock<Mutex<HashSet<(u8, usize)>>> = OnceLock::new();
    let seen = SEEN.get_or_init(|| Mutex::new(HashSet::new()));
    if seen.lock().unwrap().insert((bank_msb, midiins)) {
        log::warn!("unmapped instrument: bank_msb={bank_msb} midiins={midiins}, using silence");
    }
}

/// `NoteUpdate_Sub`: applies one update flag set to one physical voice.
fn note_update_sub<C: OplChip>(
    driver: &mut Opl3Driver<C>,
    bank: &BankData,
    channel: &MidiChannel,
    voice_index: usize,
    tone: f64,
    instrument: usize,
    velocity: u8,
    flags: u8,
) {
    if flags & flags::OFF != 0 {
        if channel.sustain {
            driver.voice_mut(voice_index).state = VoiceState::Sustained;
        } else {
            driver.note_off(voice_index);
            let v = driver.voice_mut(voice_index);
            v.state = VoiceState::Off;
            v.age_ms = 0.0;
        }
    }
    if flags & flags::PATCH != 0 {
        driver.patch(voice_index, instrument);
        driver.voice_mut(voice_index).age_ms = 0.0;
    }
    if flags & flags::PAN != 0 {
        driver.pan(voice_index, channel.panning);
    }
    if flags & flags::VOLUME != 0 {
        let vol = velocity as f64 * channel.volume as f64 * channel.expression as f64;
        driver.touch(voice_index, vol);
    }
    if flags & flags::PITCH != 0 {
        let mut bend = channel.pitch_bend + bank.operator(instrument).finetune;
        let age_ms = driver.voice(voice_index).age_ms;
        if channel.vibrato_active() && age_ms >= channel.vib_delay_ms {
            bend += channel.vib_depth_index as f64 * channel.vib_depth * channel.vib_phase.sin();
        }
        let hertz = 172.00093 * (0.057762265 * (tone + bend)).exp();
        driver.note_on(voice_index, hertz);
        driver.voice_mut(voice_index).state = VoiceState::On;
    }
}

/// `NoteOffSustain`: key off a voice already in the sustained state so it
/// can be retriggered.
fn note_off_sustain<C: OplChip>(driver: &mut Opl3Driver<C>, voice_index: usize) {
    driver.note_off(voice_index);
    driver.voice_mut(voice_index).state = VoiceState::Off;
}

/// `NoteUpdate`: applies `flags` to both voices of an active note and,
/// when `flags` includes Off, removes the note from the channel's map.
fn note_update<C: OplChip>(
    driver: &mut Opl3Driver<C>,
    bank: &BankData,
    channels: &mut [MidiChannel],
    ch: usize,
    note: u8,
    flags: u8,
) {
    let Some(active) = channels[ch].active_notes.get(&note).cloned() else {
        return;
    };
    let tone = active.tone;
    let velocity = active.velocity;
    if let Some(v) = active.voice_primary {
        note_update_sub(driver, bank, &channels[ch], v, tone, active.ins_primary, velocity, flags);
    }
    if let Some(v) = active.voice_secondary {
        note_update_sub(driver, bank, &channels[ch], v, tone, active.ins_secondary, velocity, flags);
    }
    if flags & flags::OFF != 0 {
        channels[ch].active_notes.remove(&note);
    }
}

pub(crate) fn note_update_all<C: OplChip>(
    driver: &mut Opl3Driver<C>,
    bank: &BankData,
    channels: &mut [MidiChannel],
    ch: usize,
    flags: u8,
) {
    let notes: Vec<u8> = channels[ch].active_notes.keys().copied().collect();
    for note in notes {
        note_update(driver, bank, channels, ch, note, flags);
    }
}

/// Handles one decoded channel-voice MIDI event. `event_type` is the high
/// nibble of the status byte, `ch` its low nibble (the MIDI channel).
pub fn handle_channel_event<C: OplChip>(
    ctx: &mut ChannelEventContext<C>,
    ch: usize,
    event_type: u8,
    data1: u8,
    data2: u8,
) {
    match event_type {
        0x8 => {
            note_update(ctx.driver, ctx.bank, ctx.channels, ch, data1, flags::OFF);
        }
        0x9 => {
            // Defensive preemptive note-off for this (channel, note) pair.
            note_update(ctx.driver, ctx.bank, ctx.channels, ch, data1, flags::OFF);
            if data2 == 0 {
                return; // velocity 0 behaves like note-off.
            }
            note_on(ctx, ch, data1, data2);
        }
        0xA => {
            if let Some(active) = ctx.channels[ch].active_notes.get_mut(&data1) {
                active.velocity = data2;
            }
            note_update(ctx.driver, ctx.bank, ctx.channels, ch, data1, flags::VOLUME);
        }
        0xB => control_change(ctx, ch, data1, data2),
        0xC => {
            ctx.channels[ch].program = data1;
        }
        0xD => {
            let notes: Vec<u8> = ctx.channels[ch].active_notes.keys().copied().collect();
            for note in &notes {
                if let Some(active) = ctx.channels[ch].active_notes.get_mut(note) {
                    active.velocity = data1;
                }
            }
            note_update_all(ctx.driver, ctx.bank, ctx.channels, ch, flags::VOLUME);
        }
        0xE => {
            let raw = data1 as i32 + (data2 as i32) * 128 - 8192;
            ctx.channels[ch].pitch_bend = raw as f64 * ctx.channels[ch].bend_sensitivity;
            note_update_all(ctx.driver, ctx.bank, ctx.channels, ch, flags::PITCH);
        }
        _ => {}
    }
}

fn note_on<C: OplChip>(ctx: &mut ChannelEventContext<C>, ch: usize, note: u8, velocity: u8) {
    let midiins: usize = if ch == 9 {
        128 + note as usize
    } else {
        ctx.channels[ch].program as usize
    };
    let adl_bank = ctx.adl_bank.min(crate::banks::NUM_BANKS - 1);
    let meta_index = ctx.bank.banks[adl_bank][midiins.min(255)];
    if meta_index == crate::banks::UNMAPPED
        && (ctx.channels[ch].bank_msb != 0 || ctx.channels[ch].bank_lsb != 0)
    {
        warn_unmapped_once(ctx.channels[ch].bank_msb, midiins);
    }
    let instrument = *ctx.bank.instrument(meta_index);
    let tone = if instrument.tone != 0 {
        instrument.tone as f64
    } else {
        note as f64
    };

    let (primary, secondary) = VoiceAllocator::allocate(
        ctx.driver,
        ctx.channels,
        ctx.bank,
        ch,
        instrument.adlno1,
        instrument.adlno2,
        instrument.ms_sound_kon,
        if ch == 9 { 128 } else { ctx.channels[ch].program },
    );

    if primary.is_none() {
        return; // no voice available; silently drop, per spec.
    }

    let active = ActiveNote {
        voice_primary: primary,
        voice_secondary: secondary,
        velocity,
        ins_primary: instrument.adlno1,
        ins_secondary: instrument.adlno2,
        tone,
    };

    for (maybe_voice, ins) in [
        (primary, instrument.adlno1),
        (secondary, instrument.adlno2),
    ] {
        if let Some(v) = maybe_voice {
            let program = if ch == 9 { 128 } else { ctx.channels[ch].program };
            let voice = ctx.driver.voice_mut(v);
            voice.midi_channel = Some(ch);
            voice.midi_note = Some(note);
            voice.program = program;
            voice.instrument_meta = meta_index;
            let _ = ins;
        }
    }

    ctx.channels[ch].active_notes.insert(note, active);

    if let Some(v) = primary {
        note_update_sub(
            ctx.driver,
            ctx.bank,
            &ctx.channels[ch],
            v,
            tone,
            instrument.adlno1,
            velocity,
            flags::ALL_BUT_OFF,
        );
    }
    if let Some(v) = secondary {
        note_update_sub(
            ctx.driver,
            ctx.bank,
            &ctx.channels[ch],
            v,
            tone,
            instrument.adlno2,
            velocity,
            flags::ALL_BUT_OFF,
        );
    }
}

fn control_change<C: OplChip>(ctx: &mut ChannelEventContext<C>, ch: usize, cc: u8, value: u8) {
    match cc {
        0 => ctx.channels[ch].bank_msb = value,
        1 => {
            ctx.channels[ch].vib_depth_index = value;
        }
        5 => {
            log::debug!("Ctrl 5 (portamento time MSB) <- {value} (ch {ch}); not implemented");
        }
        6 => set_rpn(ctx, ch, value, true),
        7 => {
            ctx.channels[ch].volume = value;
            note_update_all(ctx.driver, ctx.bank, ctx.channels, ch, flags::VOLUME);
        }
        10 => {
            let mut pan = 0u8;
            if value < 96 {
                pan |= 0x10;
            }
            if value >= 32 {
                pan |= 0x20;
            }
            ctx.channels[ch].panning = pan;
            note_update_all(ctx.driver, ctx.bank, ctx.channels, ch, flags::PAN);
        }
        11 => {
            ctx.channels[ch].expression = value;
            note_update_all(ctx.driver, ctx.bank, ctx.channels, ch, flags::VOLUME);
        }
        32 => ctx.channels[ch].bank_lsb = value,
        37 => set_rpn(ctx, ch, value, false),
        64 => {
            ctx.channels[ch].sustain = value != 0;
            if value == 0 {
                kill_sustained_voices(ctx);
            }
        }
        65 => log::debug!("Ctrl 65 (portamento enable) <- {value} (ch {ch}); ignored"),
        91..=95 => { /* reverb/chorus/celeste/phaser depth: ignored */ }
        98 => {
            ctx.channels[ch].last_lsb = value;
            ctx.channels[ch].is_nrpn = true;
        }
        99 => {
            ctx.channels[ch].last_msb = value;
            ctx.channels[ch].is_nrpn = true;
        }
        100 => {
            ctx.channels[ch].last_lsb = value;
            ctx.channels[ch].is_nrpn = false;
        }
        101 => {
            ctx.channels[ch].last_msb = value;
            ctx.channels[ch].is_nrpn = false;
        }
        121 => {
            ctx.channels[ch].reset_controllers();
            note_update_all(ctx.driver, ctx.bank, ctx.channels, ch, flags::PAN_VOLUME_PITCH);
            kill_sustained_voices(ctx);
        }
        123 => {
            note_update_all(ctx.driver, ctx.bank, ctx.channels, ch, flags::OFF);
        }
        _ => log::debug!("Ctrl {cc} <- {value} (ch {ch})"),
    }
}

fn kill_sustained_voices<C: OplChip>(ctx: &mut ChannelEventContext<C>) {
    let sustained: Vec<usize> = ctx
        .driver
        .voices_iter()
        .enumerate()
        .filter(|(_, v)| v.state == VoiceState::Sustained)
        .map(|(i, _)| i)
        .collect();
    for v in sustained {
        note_off_sustain(ctx.driver, v);
    }
}

fn set_rpn<C: OplChip>(ctx: &mut ChannelEventContext<C>, ch: usize, value: u8, msb: bool) {
    let channel = &mut ctx.channels[ch];
    let key = channel.last_msb as u32 * 256
        + channel.last_lsb as u32
        + if channel.is_nrpn { 0x10000 } else { 0 }
        + if msb { 0x20000 } else { 0 };

    match key {
        0x20000 => {
            // RPN 0 MSB: pitch-bend range, in semitones per raw unit.
            channel.bend_sensitivity = value as f64 / 8192.0;
        }
        0x30108 => {
            // NRPN 0x0108 MSB: vibrato speed.
            let speed = if value == 64 {
                1.0
            } else if value < 100 {
                1.0 / (0.016 * value.max(1) as f64)
            } else {
                1.0 / (0.051153846 * value as f64 - 3.4965385)
            };
            channel.vib_speed = speed * std::f64::consts::TAU * 5.0;
        }
        0x30109 => {
            // NRPN 0x0109 MSB: vibrato depth, fractional semitones.
            channel.vib_depth = (value as f64 - 64.0) * 0.0015;
        }
        0x3010A => {
            // NRPN 0x010A MSB: vibrato delay, milliseconds.
            channel.vib_delay_ms = if value != 0 {
                0.2092 * (0.0795 * value as f64).exp()
            } else {
                0.0
            };
        }
        _ => {
            log::debug!("Unrecognized RPN/NRPN key {key:#x} <- {value} (ch {ch})");
        }
    }
}
