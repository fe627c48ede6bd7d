//! Audio capture from microphone
//!
//! The device pushes mono f32 blocks into a channel; `CaptureStream` resamples
//! them to the capture rate when needed, cuts fixed-size frames, measures RMS
//! volume and produces wire-ready PCM16 frames.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::codec;
use super::device::{DeviceGuard, spawn_device_thread};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Capacity of the device -> pipeline block channel
const BLOCK_CHANNEL_CAPACITY: usize = 64;

/// Resampler input chunk size (frames)
const RESAMPLE_CHUNK: usize = 1024;

/// One fixed-size window of outbound audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Monotonic per-stream sequence number, starting at 0
    pub sequence: u64,
    /// Sample rate of `samples`
    pub sample_rate: u32,
    /// Mono PCM16 samples
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// Encode the frame as a base64 PCM16 little-endian payload
    #[must_use]
    pub fn payload(&self) -> String {
        codec::encode_base64(&codec::pcm16_to_le_bytes(&self.samples))
    }

    /// MIME type describing the payload
    #[must_use]
    pub fn mime_type(&self) -> String {
        codec::pcm_mime(self.sample_rate)
    }
}

/// RMS volume of the most recent frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSample {
    /// RMS of normalized samples, in [0, 1]
    pub level: f32,
    /// When the frame completed
    pub at: Instant,
}

impl VolumeSample {
    /// A silent sample stamped now
    #[must_use]
    pub fn silent() -> Self {
        Self {
            level: 0.0,
            at: Instant::now(),
        }
    }
}

/// A frame paired with its measured volume
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: AudioFrame,
    pub volume: VolumeSample,
}

/// An opened input device
pub struct OpenedSource {
    /// Releases the device when dropped
    pub guard: DeviceGuard,
    /// Rate the device actually delivers
    pub sample_rate: u32,
}

/// Something that can deliver microphone audio
pub trait AudioSource: Send + Sync {
    /// Open the device, preferring `sample_rate`, and push mono blocks into `tx`
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceUnavailable` if there is no device or access is denied
    fn open(&self, sample_rate: u32, tx: mpsc::Sender<Vec<f32>>) -> Result<OpenedSource>;
}

/// Default system microphone via `cpal`
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalSource;

impl AudioSource for CpalSource {
    fn open(&self, sample_rate: u32, tx: mpsc::Sender<Vec<f32>>) -> Result<OpenedSource> {
        let (guard, sample_rate) =
            spawn_device_thread("mic-capture", move || build_input_stream(sample_rate, tx))?;
        Ok(OpenedSource { guard, sample_rate })
    }
}

/// Build and start the input stream, falling back to the device default config
fn build_input_stream(
    sample_rate: u32,
    tx: mpsc::Sender<Vec<f32>>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

    let exact = device
        .supported_input_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        });

    let config: StreamConfig = match exact {
        Some(supported) => supported.with_sample_rate(SampleRate(sample_rate)).config(),
        None => device
            .default_input_config()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
            .into(),
    };

    let channels = usize::from(config.channels);
    let device_rate = config.sample_rate.0;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = device_rate,
        channels,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Err(e) = tx.try_send(codec::downmix(data, channels)) {
                    tracing::trace!(error = %e, "dropping capture block");
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    Ok((stream, device_rate))
}

/// Streaming mono resampler for devices that cannot run at the capture rate
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a resampler from `from` Hz to `to` Hz
    ///
    /// # Errors
    ///
    /// Returns error if either rate is zero
    pub fn new(from: u32, to: u32) -> Result<Self> {
        if from == 0 || to == 0 {
            return Err(Error::Config("sample rates must be greater than 0".to_string()));
        }

        let inner = FastFixedIn::<f32>::new(
            f64::from(to) / f64::from(from),
            1.0,
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            1,
        )
        .map_err(|e| Error::Audio(format!("failed to create resampler: {e}")))?;

        tracing::debug!(from, to, "created capture resampler");

        Ok(Self {
            inner,
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
        })
    }

    /// Feed samples; returns whatever output full chunks produced
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(input);
        let mut output = Vec::new();

        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let resampled = self
                .inner
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;

            if let Some(channel) = resampled.first() {
                output.extend_from_slice(channel);
            }
        }

        Ok(output)
    }
}

/// Cuts a mono sample stream into fixed-size frames
pub struct Framer {
    frame_samples: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl Framer {
    /// Create a framer emitting `frame_samples`-sample frames
    #[must_use]
    pub fn new(frame_samples: usize, sample_rate: u32) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            sample_rate,
            pending: Vec::with_capacity(frame_samples * 2),
            next_sequence: 0,
        }
    }

    /// Append samples
    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
    }

    /// Take the next complete frame, if any
    pub fn pop(&mut self) -> Option<CapturedFrame> {
        if self.pending.len() < self.frame_samples {
            return None;
        }

        let window: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
        let volume = VolumeSample {
            level: codec::rms(&window),
            at: Instant::now(),
        };
        let frame = AudioFrame {
            sequence: self.next_sequence,
            sample_rate: self.sample_rate,
            samples: codec::f32_to_pcm16(&window),
        };
        self.next_sequence += 1;

        Some(CapturedFrame { frame, volume })
    }

    /// Samples waiting for a full frame
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Acquires the microphone for a session
#[derive(Clone)]
pub struct CapturePipeline {
    source: Arc<dyn AudioSource>,
    config: AudioConfig,
}

impl CapturePipeline {
    /// Create a pipeline over an audio source
    #[must_use]
    pub fn new(source: Arc<dyn AudioSource>, config: AudioConfig) -> Self {
        Self { source, config }
    }

    /// Open the microphone and start producing frames
    ///
    /// The device is opened on the blocking pool, since the open can wait on
    /// an OS permission prompt.
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceUnavailable` if the device is missing or denied;
    /// the caller decides whether to continue without capture
    pub async fn start(&self) -> Result<CaptureStream> {
        let (tx, rx) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);
        let target_rate = self.config.capture_sample_rate;
        let source = Arc::clone(&self.source);
        let opened = tokio::task::spawn_blocking(move || source.open(target_rate, tx))
            .await
            .map_err(|e| Error::Audio(format!("microphone open task failed: {e}")))??;

        let resampler = if opened.sample_rate == target_rate {
            None
        } else {
            Some(StreamResampler::new(opened.sample_rate, target_rate)?)
        };

        tracing::info!(
            device_rate = opened.sample_rate,
            capture_rate = target_rate,
            frame_samples = self.config.frame_samples,
            "audio capture started"
        );

        Ok(CaptureStream {
            guard: Some(opened.guard),
            blocks: rx,
            resampler,
            framer: Framer::new(self.config.frame_samples, target_rate),
        })
    }
}

/// A running capture; owns the microphone until stopped or dropped
pub struct CaptureStream {
    guard: Option<DeviceGuard>,
    blocks: mpsc::Receiver<Vec<f32>>,
    resampler: Option<StreamResampler>,
    framer: Framer,
}

impl CaptureStream {
    /// Wait for the next frame
    ///
    /// Cancel-safe: partially filled frames stay buffered. Returns `None`
    /// once the device has stopped and the buffer is drained.
    pub async fn next_frame(&mut self) -> Option<CapturedFrame> {
        loop {
            if let Some(frame) = self.framer.pop() {
                return Some(frame);
            }

            if self.guard.is_none() {
                return None;
            }

            let block = self.blocks.recv().await?;
            match self.resampler.as_mut() {
                Some(resampler) => match resampler.process(&block) {
                    Ok(samples) => self.framer.push(&samples),
                    Err(e) => tracing::warn!(error = %e, "dropping capture block"),
                },
                None => self.framer.push(&block),
            }
        }
    }

    /// Release the microphone; safe to call repeatedly
    ///
    /// Dropping the stream also releases the device, but blocks while doing so.
    pub async fn stop(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.release_async().await;
            self.blocks.close();
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if the microphone is still held
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.guard.is_some()
    }
}
