//! System audio capture and encoding.
//!
//! The capture stage pumps a platform [`AudioBackend`], slices its byte stream
//! into fixed fragments and hands them to the encode stage over a channel.

pub mod capture;
pub mod encoder;
#[cfg(all(feature = "pipewire", target_os = "linux"))]
pub mod pipewire;

pub use capture::{spawn_audio_capture, AudioSession, CaptureBuffer, Fragmenter};
pub use encoder::{AudioEncoder, AudioEncoderFactory, AudioPacket, PcmEncoder};

use std::sync::Arc;

use crate::errors::AudioError;

/// Samples per channel in one fragment.
pub const SAMPLES_PER_FRAGMENT: usize = 1024;
pub const MAX_SAMPLE_RATE: u32 = 48_000;
pub const MAX_CHANNELS: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    /// Signed 16-bit little-endian.
    S16,
    /// 32-bit float little-endian.
    F32,
}

impl SampleType {
    pub fn sample_width(&self) -> usize {
        match self {
            SampleType::S16 => 2,
            SampleType::F32 => 4,
        }
    }
}

/// Interleaved PCM layout delivered by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStreamFormat {
    pub sample_rate: u32,
    pub channels: u32,
    pub sample_type: SampleType,
}

impl AudioStreamFormat {
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(AudioError::UnsupportedSampleRate(self.sample_rate));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} channels",
                self.channels
            )));
        }
        Ok(())
    }

    /// Bytes in one full fragment.
    pub fn fragment_size(&self) -> usize {
        SAMPLES_PER_FRAGMENT * self.channels as usize * self.sample_type.sample_width()
    }
}

/// Platform loopback capture of the default output device.
pub trait AudioBackend {
    fn format(&mut self) -> Result<AudioStreamFormat, AudioError>;

    /// Runs one backend iteration and passes every readable chunk to `sink`.
    /// May block briefly waiting for data.
    fn pump(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<(), AudioError>;
}

/// Builds the backend on the capture thread.
pub type AudioBackendFactory =
    Arc<dyn Fn() -> Result<Box<dyn AudioBackend>, AudioError> + Send + Sync>;

/// Item on the audio queue.
#[derive(Debug, PartialEq)]
pub enum AudioMessage {
    Fragment(Vec<u8>),
    EndOfStream,
}

/// Default backend for this build, if any.
pub fn default_backend_factory() -> Option<AudioBackendFactory> {
    #[cfg(all(feature = "pipewire", target_os = "linux"))]
    {
        if pipewire::PipeWireLoopback::probe() {
            return Some(Arc::new(|| {
                pipewire::PipeWireLoopback::connect()
                    .map(|backend| Box::new(backend) as Box<dyn AudioBackend>)
            }));
        }
    }
    None
}
