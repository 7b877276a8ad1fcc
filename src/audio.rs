//! Audio output. `spec.md` names the sink only by interface (a pull callback
//! delivering 16-bit stereo frames at 48 kHz); `CpalSink` is the concrete
//! implementation, mirroring the teacher's `cpal` device-open/stream-build
//! pattern but with a lock-free SPSC ring (`ringbuf`) instead of a mutex
//! shared with the render thread, per `spec.md` §9's "Blocking audio
//! callback" redesign flag.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::error::MidiPlayError;

pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u16 = 2;
/// 48000 / 50 = 960 frames (1920 interleaved i16 samples) per callback.
pub const FRAMES_PER_CALLBACK: usize = 960;

/// Capability the render loop needs from an audio sink: push interleaved
/// stereo i16 samples, non-blocking, dropping nothing it can hold.
pub trait AudioSink: Send {
    fn push_samples(&mut self, samples: &[i16]);
}

/// The render-thread side of the ring: the sole producer.
pub struct RingSink {
    producer: HeapProd<i16>,
}

impl AudioSink for RingSink {
    fn push_samples(&mut self, samples: &[i16]) {
        for &s in samples {
            // Ring full means the callback hasn't caught up; drop the
            // newest sample rather than block the renderer.
            let _ = self.producer.try_push(s);
        }
    }
}

/// Owns the `cpal` output stream and the ring's consumer half, which the
/// audio callback alone drains. Underflow (fewer queued samples than the
/// callback wants) yields silence for the remainder of the buffer.
pub struct CpalOutput {
    stream: cpal::Stream,
}

impl CpalOutput {
    /// Opens the default output device at a fixed stereo S16 48 kHz / 960
    /// frame configuration, falling back through `I16`/`F32` sample formats
    /// the way the teacher's `main.rs` does for `SampleFormat`. Returns the
    /// producer half of the ring for the render loop to push into.
    pub fn open() -> Result<(Self, RingSink), MidiPlayError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(MidiPlayError::NoOutputDevice)?;

        let stream_config = cpal::StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Fixed((FRAMES_PER_CALLBACK * CHANNELS as usize) as u32),
        };

        // Several seconds of headroom; the render loop keeps it topped up.
        let ring = HeapRb::<i16>::new(SAMPLE_RATE as usize * CHANNELS as usize * 2);
        let (producer, mut consumer) = ring.split();

        let err_fn = |e| log::error!("audio stream error: {e}");
        let sample_format = device
            .default_output_config()
            .map(|c| c.sample_format())
            .unwrap_or(cpal::SampleFormat::I16);

        let stream = match sample_format {
            cpal::SampleFormat::I16 => device
                .build_output_stream(
                    &stream_config,
                    move |out: &mut [i16], _| fill_i16(out, &mut consumer),
                    err_fn,
                    None,
                )
                .map_err(|e| MidiPlayError::AudioDevice(e.to_string()))?,
            _ => device
                .build_output_stream(
                    &stream_config,
                    move |out: &mut [f32], _| fill_f32(out, &mut consumer),
                    err_fn,
                    None,
                )
                .map_err(|e| MidiPlayError::AudioDevice(e.to_string()))?,
        };

        stream
            .play()
            .map_err(|e| MidiPlayError::AudioDevice(e.to_string()))?;

        Ok((CpalOutput { stream }, RingSink { producer }))
    }

    pub fn pause(&self) -> Result<(), MidiPlayError> {
        self.stream
            .pause()
            .map_err(|e| MidiPlayError::AudioDevice(e.to_string()))
    }
}

fn fill_i16(out: &mut [i16], consumer: &mut HeapCons<i16>) {
    for slot in out.iter_mut() {
        *slot = consumer.try_pop().unwrap_or(0);
    }
}

fn fill_f32(out: &mut [f32], consumer: &mut HeapCons<i16>) {
    for slot in out.iter_mut() {
        let s = consumer.try_pop().unwrap_or(0);
        *slot = s as f32 / i16::MAX as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Split;

    #[test]
    fn underflow_yields_silence() {
        let ring = HeapRb::<i16>::new(16);
        let (mut producer, mut consumer) = ring.split();
        producer.try_push(100).unwrap();
        producer.try_push(200).unwrap();
        let mut out = vec![0i16; 8];
        fill_i16(&mut out, &mut consumer);
        assert_eq!(&out[..2], &[100, 200]);
        assert!(out[2..].iter().all(|&s| s == 0));
    }

    #[test]
    fn push_drops_when_ring_is_full() {
        let ring = HeapRb::<i16>::new(4);
        let (producer, _consumer) = ring.split();
        let mut sink = RingSink { producer };
        sink.push_samples(&[1, 2, 3, 4, 5, 6]); // last two silently dropped
    }
}
