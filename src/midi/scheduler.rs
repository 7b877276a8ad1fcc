use crate::midi::channel::{flags, handle_channel_event, ChannelEventContext, MidiChannel};
use crate::midi::reader::{read_be_int, EventReader, SmfHeader, Track};
use crate::opl::{Opl3Driver, OplChip};

const AGE_MS_SENTINEL: f64 = 1.0e9;

/// A snapshot of every track's read cursor, used for loop bookkeeping
/// (`spec.md` §3's `Position`). Cloning is cheap: track event bytes are
/// shared via `Arc`.
#[derive(Clone)]
pub struct Position {
    tracks: Vec<Track>,
}

/// Advances the merged multi-track timeline, converting delta ticks to
/// seconds via the current tempo, detecting loop markers, and dispatching
/// due events. See `spec.md` §4.3.
pub struct Scheduler {
    header: SmfHeader,
    tracks: Vec<Track>,
    loop_begin: Position,
    tempo_seconds_per_tick: f64,
    started: bool,
    wait_seconds: f64,
    loop_start_flag: bool,
    loop_end_flag: bool,
}

impl Scheduler {
    pub fn load(path: &str, bytes: &[u8]) -> Result<Self, crate::error::MidiPlayError> {
        let (header, tracks) = EventReader::load(path, bytes)?;
        let tempo_seconds_per_tick = 500_000.0 * 1e-6 / header.ticks_per_quarter.max(1) as f64;
        let loop_begin = Position {
            tracks: tracks.clone(),
        };
        Ok(Scheduler {
            header,
            tracks,
            loop_begin,
            tempo_seconds_per_tick,
            started: false,
            wait_seconds: 0.0,
            loop_start_flag: false,
            loop_end_flag: false,
        })
    }

    pub fn header(&self) -> SmfHeader {
        self.header
    }

    /// Per-call contract: advances playback by `elapsed_seconds` and
    /// returns the number of seconds until `Tick` next needs to run.
    pub fn tick<C: OplChip>(
        &mut self,
        driver: &mut Opl3Driver<C>,
        channels: &mut [MidiChannel],
        bank: &crate::banks::BankData,
        adl_bank: usize,
        elapsed_seconds: f64,
        granularity: f64,
    ) -> f64 {
        if self.started {
            self.wait_seconds -= elapsed_seconds;
        } else {
            self.started = true;
        }

        // A file with zero total duration (no notes, ends immediately) would
        // otherwise make this spin forever: every process_events() call
        // resets straight back to the same zero-duration loop point without
        // ever advancing wait_seconds. Bail out after a generous number of
        // rounds rather than hang the render thread.
        let mut rounds = 0u32;
        while self.wait_seconds <= granularity / 2.0 {
            self.process_events(driver, channels, bank, adl_bank);
            rounds += 1;
            if rounds > 100_000 {
                log::error!("scheduler made no progress for {rounds} rounds; file may be empty");
                break;
            }
        }

        for ch in 0..channels.len() {
            if channels[ch].vibrato_active() && !channels[ch].active_notes.is_empty() {
                crate::midi::channel::note_update_all(driver, bank, channels, ch, flags::PITCH);
                channels[ch].vib_phase += elapsed_seconds * channels[ch].vib_speed;
            } else {
                channels[ch].vib_phase = 0.0;
            }
        }

        self.wait_seconds
    }

    fn process_events<C: OplChip>(
        &mut self,
        driver: &mut Opl3Driver<C>,
        channels: &mut [MidiChannel],
        bank: &crate::banks::BankData,
        adl_bank: usize,
    ) {
        let row_begin = Position {
            tracks: self.tracks.clone(),
        };

        for tk in 0..self.tracks.len() {
            if !self.tracks[tk].finished && self.tracks[tk].delay <= 0 {
                let mut ctx = ChannelEventContext {
                    channels,
                    driver,
                    bank,
                    adl_bank,
                };
                self.handle_event(tk, &mut ctx);
                if self.tracks[tk].at_end() {
                    self.tracks[tk].finished = true;
                } else {
                    self.tracks[tk].delay = self.tracks[tk].read_vlq() as i64;
                }
            }
        }

        let shortest = self
            .tracks
            .iter()
            .filter(|t| !t.finished)
            .map(|t| t.delay)
            .min();

        let Some(shortest) = shortest.filter(|_| !self.loop_end_flag) else {
            self.end_of_song();
            return;
        };

        for track in self.tracks.iter_mut() {
            if !track.finished {
                track.delay -= shortest;
            }
        }

        let t = shortest as f64 * self.tempo_seconds_per_tick;
        self.wait_seconds += t;

        for voice in driver.voices_iter_mut() {
            voice.age_ms = (voice.age_ms + t * 1000.0).min(AGE_MS_SENTINEL);
        }

        if self.loop_start_flag {
            self.loop_begin = row_begin;
            self.loop_start_flag = false;
        }
    }

    /// Reached the end of every track (or an explicit loopEnd marker):
    /// rewind every track cursor back to the last loopStart snapshot.
    fn end_of_song(&mut self) {
        self.tracks = self.loop_begin.tracks.clone();
        self.loop_end_flag = false;
    }

    fn handle_event<C: OplChip>(&mut self, tk: usize, ctx: &mut ChannelEventContext<C>) {
        let Some(b) = self.tracks[tk].read_u8() else {
            self.tracks[tk].finished = true;
            return;
        };

        match b {
            0xF0 | 0xF7 => {
                let len = self.tracks[tk].read_vlq();
                self.tracks[tk].read_bytes(len as usize);
                log::debug!("SysEx on track {tk}: {len} bytes skipped");
            }
            0xFF => {
                let event_type = self.tracks[tk].read_u8().unwrap_or(0);
                let len = self.tracks[tk].read_vlq();
                let data = self.tracks[tk].read_bytes(len as usize);
                self.handle_meta(tk, event_type, &data);
            }
            0xF3 => {
                self.tracks[tk].read_bytes(1);
            }
            0xF2 => {
                self.tracks[tk].read_bytes(2);
            }
            b if b < 0x80 => {
                // Running status: this byte is actually the first data byte
                // of an event whose status repeats the last one on this
                // track. Un-read it and dispatch using the stored status.
                self.tracks[tk].rewind_one();
                let status = self.tracks[tk].running_status.unwrap_or(0x90);
                self.dispatch_channel_event(tk, status, ctx);
            }
            _ => {
                self.tracks[tk].running_status = Some(b);
                self.dispatch_channel_event(tk, b, ctx);
            }
        }
    }

    fn handle_meta(&mut self, tk: usize, event_type: u8, data: &[u8]) {
        match event_type {
            0x2F => {
                self.tracks[tk].finished = true;
            }
            0x51 if data.len() >= 3 => {
                let us_per_quarter = read_be_int(data, 3) as f64;
                self.tempo_seconds_per_tick =
                    us_per_quarter * 1e-6 / self.header.ticks_per_quarter.max(1) as f64;
                log::info!(
                    "tempo change: {:.1} BPM",
                    60_000_000.0 / us_per_quarter.max(1.0)
                );
            }
            0x06 => {
                if data == b"loopStart" {
                    self.loop_start_flag = true;
                } else if data == b"loopEnd" {
                    self.loop_end_flag = true;
                }
            }
            1..=6 => {
                if let Ok(text) = std::str::from_utf8(data) {
                    log::debug!("meta {event_type:#x} on track {tk}: {text}");
                }
            }
            _ => {}
        }
    }

    fn dispatch_channel_event<C: OplChip>(
        &mut self,
        tk: usize,
        status: u8,
        ctx: &mut ChannelEventContext<C>,
    ) {
        let ch = (status & 0x0F) as usize;
        let event_type = status >> 4;
        let data1 = self.tracks[tk].read_u8().unwrap_or(0);
        let needs_second_byte = !matches!(event_type, 0xC | 0xD);
        let data2 = if needs_second_byte {
            self.tracks[tk].read_u8().unwrap_or(0)
        } else {
            0
        };
        if ch < ctx.channels.len() {
            handle_channel_event(ctx, ch, event_type, data1, data2);
        }
    }
}
