//! `Player`: owns the scheduler, the 16 `MidiChannel`s, the OPL3 driver, and
//! the mixer/reverb/UI glue, and runs the render loop. Replaces the
//! original's module-globals per `spec.md` §9's Design Notes — everything
//! here is built once in `Player::new` and passed no global state.

use std::sync::Arc;

use crate::audio::AudioSink;
use crate::banks::BankData;
use crate::error::MidiPlayError;
use crate::midi::channel::MidiChannel;
use crate::midi::scheduler::Scheduler;
use crate::opl::{Opl3Driver, OplChip};
use crate::reverb::{Reverb, SchroederReverb};
use crate::ui::{Display, NullDisplay};

/// Render in chunks matching the audio callback's frame count, so a single
/// `render_chunk` call produces exactly one callback's worth of audio.
pub const CHUNK_FRAMES: usize = crate::audio::FRAMES_PER_CALLBACK;

/// One-pole DC blocker applied to the summed chip output before reverb,
/// matching the teacher's preference for small, explicit DSP helpers over
/// hand-tuned magic directly inline in the mixer.
struct DcBlocker {
    prev_in: f64,
    prev_out: f64,
}

impl DcBlocker {
    fn new() -> Self {
        DcBlocker {
            prev_in: 0.0,
            prev_out: 0.0,
        }
    }

    fn process(&mut self, x: f64) -> f64 {
        const R: f64 = 0.995;
        let y = x - self.prev_in + R * self.prev_out;
        self.prev_in = x;
        self.prev_out = y;
        y
    }
}

pub struct Player<C: OplChip> {
    scheduler: Scheduler,
    channels: Vec<MidiChannel>,
    driver: Opl3Driver<C>,
    bank: Arc<BankData>,
    adl_bank: usize,
    reverb: Box<dyn Reverb>,
    display: Box<dyn Display>,
    dc_blocker: DcBlocker,
    granularity_seconds: f64,
}

impl<C: OplChip> Player<C> {
    pub fn new(
        path: &str,
        bytes: &[u8],
        chips: Vec<C>,
        bank: Arc<BankData>,
        adl_bank: usize,
        numfourops: usize,
        display: Box<dyn Display>,
    ) -> Result<Self, MidiPlayError> {
        let scheduler = Scheduler::load(path, bytes)?;
        let mut driver = Opl3Driver::new(chips, bank.clone(), numfourops);
        driver.reset(crate::audio::SAMPLE_RATE);
        let channels = (0..16).map(|_| MidiChannel::new()).collect();

        Ok(Player {
            scheduler,
            channels,
            driver,
            bank,
            adl_bank,
            reverb: Box::new(SchroederReverb::new()),
            display,
            dc_blocker: DcBlocker::new(),
            granularity_seconds: CHUNK_FRAMES as f64 / crate::audio::SAMPLE_RATE as f64,
        })
    }

    pub fn with_null_display(
        path: &str,
        bytes: &[u8],
        chips: Vec<C>,
        bank: Arc<BankData>,
        adl_bank: usize,
        numfourops: usize,
    ) -> Result<Self, MidiPlayError> {
        Self::new(path, bytes, chips, bank, adl_bank, numfourops, Box::new(NullDisplay))
    }

    /// Advances playback by exactly one chunk (`CHUNK_FRAMES` frames) and
    /// pushes the resulting interleaved stereo i16 samples into `sink`.
    pub fn render_chunk(&mut self, sink: &mut dyn AudioSink) {
        self.scheduler.tick(
            &mut self.driver,
            &mut self.channels,
            &self.bank,
            self.adl_bank,
            self.granularity_seconds,
            self.granularity_seconds,
        );

        let num_cards = self.driver.num_cards();
        let mut mono = vec![0i32; CHUNK_FRAMES];
        let mut per_chip = vec![0i16; CHUNK_FRAMES];
        for chip_index in 0..num_cards {
            self.driver.generate(chip_index, &mut per_chip, CHUNK_FRAMES);
            for (acc, &s) in mono.iter_mut().zip(per_chip.iter()) {
                *acc += s as i32;
            }
        }

        let scale = 1.0 / num_cards.max(1) as f64;
        let mut summed = vec![0i16; CHUNK_FRAMES];
        for (out, &acc) in summed.iter_mut().zip(mono.iter()) {
            let filtered = self.dc_blocker.process(acc as f64 * scale);
            *out = filtered.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }

        let mut left = vec![0i16; CHUNK_FRAMES];
        let mut right = vec![0i16; CHUNK_FRAMES];
        self.reverb.process(&summed, &mut left, &mut right);

        let mut interleaved = Vec::with_capacity(CHUNK_FRAMES * 2);
        for i in 0..CHUNK_FRAMES {
            interleaved.push(left[i]);
            interleaved.push(right[i]);
        }
        sink.push_samples(&interleaved);
        self.illustrate_voices();
    }

    /// Draws every active note's current pitch/instrument/bend onto the
    /// display, mirroring the out-of-scope terminal UI's per-tick refresh.
    fn illustrate_voices(&mut self) {
        for channel in self.channels.iter() {
            for active in channel.active_notes.values() {
                if let Some(v) = active.voice_primary {
                    self.display.illustrate_note(
                        v,
                        active.tone,
                        active.ins_primary,
                        active.velocity as i32,
                        channel.pitch_bend,
                    );
                }
                if let Some(v) = active.voice_secondary {
                    self.display.illustrate_note(
                        v,
                        active.tone,
                        active.ins_secondary,
                        active.velocity as i32,
                        channel.pitch_bend,
                    );
                }
            }
        }
    }

    /// Runs the render loop forever (MIDI files loop by default per
    /// `spec.md` §6), pushing one chunk at a time. Intended to run on its
    /// own thread, mirroring the teacher's `thread::spawn` conductor.
    pub fn run_render_loop(&mut self, sink: &mut dyn AudioSink) -> ! {
        loop {
            self.render_chunk(sink);
        }
    }
}
