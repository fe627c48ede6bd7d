//! Audio I/O for live sessions
//!
//! Microphone capture into wire-ready PCM16 frames, and gapless playback of
//! inbound audio chunks. Devices are opened through `cpal` on dedicated threads.

mod capture;
pub mod codec;
mod device;
mod playback;

pub use capture::{
    AudioFrame, AudioSource, CapturePipeline, CaptureStream, CapturedFrame, CpalSource, Framer,
    OpenedSource, StreamResampler, VolumeSample,
};
pub use device::{DeviceGuard, spawn_device_thread};
pub use playback::{
    AudioSink, CpalOutput, Mixer, OpenedOutput, OutputDevice, PLAYBACK_SAMPLE_RATE,
    PlaybackChunk, PlaybackClock, PlaybackScheduler, ScheduledSpan,
};
