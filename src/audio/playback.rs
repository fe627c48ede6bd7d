//! Gapless playback of streamed audio chunks
//!
//! Chunks are placed on a virtual timeline: each one starts at
//! `max(now, next_start_time)` and pushes the cursor forward by its duration.
//! Bursty or jittery arrival therefore never produces overlap, and chunks that
//! arrive before their predecessor ends play back-to-back without a gap.
//!
//! The `Mixer` renders that timeline into the output device callback; its frame
//! counter is the clock the scheduler reads.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::codec;
use super::device::{DeviceGuard, spawn_device_thread};
use crate::{Error, Result};

/// Sample rate for playback (matches the live endpoint's output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Decoded audio ready for scheduling
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackChunk {
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Rate of `samples`
    pub sample_rate: u32,
    /// Playing time of `samples`
    pub duration: Duration,
}

impl PlaybackChunk {
    /// Wrap samples, computing the duration
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration = if sample_rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(samples.len() as f64 / f64::from(sample_rate))
        };
        Self {
            samples,
            sample_rate,
            duration,
        }
    }

    /// Decode a base64 PCM16 payload
    ///
    /// The rate comes from the MIME type's `rate=` parameter, else `default_rate`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` for malformed payloads
    pub fn decode(data: &str, mime_type: Option<&str>, default_rate: u32) -> Result<Self> {
        let rate = mime_type.and_then(codec::parse_rate).unwrap_or(default_rate);
        let samples = codec::decode_pcm16_base64(data)?;
        if samples.is_empty() {
            return Err(Error::Decode("empty audio payload".to_string()));
        }
        Ok(Self::new(samples, rate))
    }
}

/// Where a chunk landed on the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSpan {
    pub start: Duration,
    pub end: Duration,
}

/// Time source of the output context
pub trait PlaybackClock: Send + Sync {
    /// Current position of the output timeline
    fn now(&self) -> Duration;
}

/// Output that can start chunks at absolute timeline positions
pub trait AudioSink: Send {
    /// Play `chunk` starting at `start`
    fn schedule(&mut self, start: Duration, chunk: &PlaybackChunk);

    /// Stop everything scheduled, including a chunk already playing
    fn cancel_all(&mut self);
}

/// Schedules inbound chunks back-to-back on the output timeline
pub struct PlaybackScheduler {
    clock: Arc<dyn PlaybackClock>,
    sink: Box<dyn AudioSink>,
    default_rate: u32,
    next_start_time: Duration,
}

impl PlaybackScheduler {
    /// Create a scheduler over a clock and a sink
    #[must_use]
    pub fn new(clock: Arc<dyn PlaybackClock>, sink: Box<dyn AudioSink>, default_rate: u32) -> Self {
        let next_start_time = clock.now();
        Self {
            clock,
            sink,
            default_rate,
            next_start_time,
        }
    }

    /// Decode and schedule a raw payload
    ///
    /// Decode failures are logged and the chunk dropped; the cursor is untouched.
    pub fn enqueue(&mut self, data: &str, mime_type: Option<&str>) -> Option<ScheduledSpan> {
        match PlaybackChunk::decode(data, mime_type, self.default_rate) {
            Ok(chunk) => Some(self.enqueue_chunk(&chunk)),
            Err(e) => {
                tracing::warn!(error = %e, mime_type, "dropping undecodable audio chunk");
                None
            }
        }
    }

    /// Schedule an already decoded chunk
    pub fn enqueue_chunk(&mut self, chunk: &PlaybackChunk) -> ScheduledSpan {
        let start = self.clock.now().max(self.next_start_time);
        self.sink.schedule(start, chunk);
        self.next_start_time = start + chunk.duration;

        tracing::trace!(
            start_ms = start.as_millis(),
            duration_ms = chunk.duration.as_millis(),
            "scheduled playback chunk"
        );

        ScheduledSpan {
            start,
            end: self.next_start_time,
        }
    }

    /// Cancel scheduled audio and reset the cursor to now (barge-in, teardown)
    pub fn flush(&mut self) {
        self.sink.cancel_all();
        self.next_start_time = self.clock.now();
        tracing::debug!("playback flushed");
    }

    /// Alias of `flush` used on teardown
    pub fn stop(&mut self) {
        self.flush();
    }

    /// Earliest time the next chunk may start
    #[must_use]
    pub const fn next_start_time(&self) -> Duration {
        self.next_start_time
    }

    /// Check if scheduled audio is still ahead of the clock
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.next_start_time > self.clock.now()
    }
}

/// A chunk placed at an absolute frame offset
#[derive(Debug)]
struct MixerEntry {
    start_frame: u64,
    samples: Vec<f32>,
}

#[derive(Debug, Default)]
struct MixerState {
    position: u64,
    queue: VecDeque<MixerEntry>,
}

/// Frame-accurate timeline shared between the scheduler and the device callback
#[derive(Clone)]
pub struct Mixer {
    state: Arc<Mutex<MixerState>>,
    sample_rate: u32,
}

impl Mixer {
    /// Create a mixer rendering at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MixerState::default())),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Output rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Fill an interleaved output buffer, advancing the timeline
    pub fn render(&self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let Ok(mut state) = self.state.lock() else {
            out.fill(0.0);
            return;
        };

        for frame in out.chunks_mut(channels) {
            let pos = state.position;

            while state
                .queue
                .front()
                .is_some_and(|e| e.start_frame + e.samples.len() as u64 <= pos)
            {
                state.queue.pop_front();
            }

            let sample = state
                .queue
                .front()
                .filter(|e| e.start_frame <= pos)
                .and_then(|e| usize::try_from(pos - e.start_frame).ok().and_then(|i| e.samples.get(i)))
                .copied()
                .unwrap_or(0.0);

            frame.fill(sample);
            state.position += 1;
        }
    }

    /// Frames queued but not yet rendered
    #[must_use]
    pub fn pending_frames(&self) -> u64 {
        self.state.lock().map_or(0, |state| {
            state
                .queue
                .iter()
                .map(|e| (e.start_frame + e.samples.len() as u64).saturating_sub(state.position))
                .sum()
        })
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn frames_at(&self, at: Duration) -> u64 {
        (at.as_secs_f64() * f64::from(self.sample_rate)).round() as u64
    }
}

impl PlaybackClock for Mixer {
    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> Duration {
        let position = self.state.lock().map_or(0, |s| s.position);
        Duration::from_secs_f64(position as f64 / f64::from(self.sample_rate))
    }
}

impl AudioSink for Mixer {
    fn schedule(&mut self, start: Duration, chunk: &PlaybackChunk) {
        let samples = codec::resample_linear(&chunk.samples, chunk.sample_rate, self.sample_rate);
        let start_frame = self.frames_at(start);
        if let Ok(mut state) = self.state.lock() {
            state.queue.push_back(MixerEntry {
                start_frame,
                samples,
            });
        }
    }

    fn cancel_all(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.queue.clear();
        }
    }
}

/// An opened output device, split into the scheduler's clock and sink
pub struct OpenedOutput {
    pub clock: Arc<dyn PlaybackClock>,
    pub sink: Box<dyn AudioSink>,
    /// Releases the device when dropped
    pub guard: DeviceGuard,
    /// Rate the device renders at
    pub sample_rate: u32,
}

impl OpenedOutput {
    /// Build a scheduler over this output
    ///
    /// Returns the scheduler and the guard that keeps the device open.
    #[must_use]
    pub fn into_scheduler(self, default_rate: u32) -> (PlaybackScheduler, DeviceGuard) {
        (
            PlaybackScheduler::new(self.clock, self.sink, default_rate),
            self.guard,
        )
    }
}

/// Something that can play audio
pub trait OutputDevice: Send + Sync {
    /// Open the device
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceUnavailable` if no usable output device exists
    fn open(&self) -> Result<OpenedOutput>;
}

/// Default system speaker via `cpal`, rendered through a `Mixer`
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl OutputDevice for CpalOutput {
    fn open(&self) -> Result<OpenedOutput> {
        let (guard, mixer) = spawn_device_thread("speaker-output", build_output_stream)?;
        Ok(OpenedOutput {
            clock: Arc::new(mixer.clone()),
            sample_rate: mixer.sample_rate(),
            sink: Box::new(mixer),
            guard,
        })
    }
}

fn build_output_stream() -> Result<(cpal::Stream, Mixer)> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

    let supports_rate = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels
            && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
            && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
    };

    let preferred = device
        .supported_output_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .find(|c| supports_rate(c, 1))
        .or_else(|| {
            // Fallback: try stereo
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports_rate(c, 2))
        });

    let config: StreamConfig = match preferred {
        Some(supported) => supported
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config(),
        None => device
            .default_output_config()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .into(),
    };

    let channels = usize::from(config.channels);
    let mixer = Mixer::new(config.sample_rate.0);
    let render = mixer.clone();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate.0,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render.render(data, channels),
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    Ok((stream, mixer))
}
