use std::path::PathBuf;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use super::{AudioMessage, AudioStreamFormat, SampleType, SAMPLES_PER_FRAGMENT};
use crate::container::stream_file::{AudioHeader, AudioStreamWriter};
use crate::errors::{EncodingError, RecorderError};
use crate::events::RecorderEvent;
use crate::recorder::context::SessionContext;
use crate::recorder::writer::WriterGuard;

/// One coded audio packet.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPacket {
    pub data: Vec<u8>,
    /// Sample position at the end of this packet. Zero or negative for
    /// header and priming packets, which are not written.
    pub granule_pos: i64,
}

pub trait AudioEncoder: Send {
    fn codec_private(&mut self) -> Result<Vec<u8>, EncodingError>;

    /// Encodes one block of planar samples, one `Vec` per channel.
    fn encode(&mut self, planar: &[Vec<f32>], out: &mut Vec<AudioPacket>)
        -> Result<(), EncodingError>;

    /// Flushes trailing packets at end of stream.
    fn finish(&mut self, out: &mut Vec<AudioPacket>) -> Result<(), EncodingError>;
}

/// Builds an audio encoder once the backend format is known. The `u32` is the
/// configured bitrate.
pub type AudioEncoderFactory = Box<
    dyn Fn(&AudioStreamFormat, u32) -> Result<Box<dyn AudioEncoder>, EncodingError> + Send + Sync,
>;

/// Uncompressed 16-bit little-endian interleaved PCM.
pub struct PcmEncoder {
    channels: usize,
    granule: i64,
}

impl PcmEncoder {
    pub fn new(format: &AudioStreamFormat) -> Self {
        Self {
            channels: format.channels as usize,
            granule: 0,
        }
    }
}

impl AudioEncoder for PcmEncoder {
    fn codec_private(&mut self) -> Result<Vec<u8>, EncodingError> {
        Ok(Vec::new())
    }

    fn encode(
        &mut self,
        planar: &[Vec<f32>],
        out: &mut Vec<AudioPacket>,
    ) -> Result<(), EncodingError> {
        if planar.len() != self.channels {
            return Err(EncodingError::EncodeFailed(format!(
                "got {} channels, expected {}",
                planar.len(),
                self.channels
            )));
        }
        let frames = planar.first().map_or(0, Vec::len);
        if frames == 0 {
            return Ok(());
        }

        let mut data = Vec::with_capacity(frames * self.channels * 2);
        for i in 0..frames {
            for channel in planar {
                let sample = (channel[i] * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }
        self.granule += frames as i64;
        out.push(AudioPacket {
            data,
            granule_pos: self.granule,
        });
        Ok(())
    }

    fn finish(&mut self, _out: &mut Vec<AudioPacket>) -> Result<(), EncodingError> {
        Ok(())
    }
}

/// Splits an interleaved fragment into one block of planar samples.
///
/// Output always holds [`SAMPLES_PER_FRAGMENT`] samples per channel, short
/// fragments are zero-padded.
pub fn deinterleave(fragment: &[u8], format: &AudioStreamFormat, planar: &mut Vec<Vec<f32>>) {
    let channels = format.channels as usize;
    let width = format.sample_type.sample_width();
    planar.resize_with(channels, Vec::new);
    for channel in planar.iter_mut() {
        channel.clear();
        channel.resize(SAMPLES_PER_FRAGMENT, 0.0);
    }

    for (i, frame) in fragment
        .chunks_exact(channels * width)
        .take(SAMPLES_PER_FRAGMENT)
        .enumerate()
    {
        for (channel, sample) in frame.chunks_exact(width).enumerate() {
            planar[channel][i] = match format.sample_type {
                SampleType::S16 => f32::from(i16::from_le_bytes([sample[0], sample[1]])) / 32768.0,
                SampleType::F32 => {
                    f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]])
                }
            };
        }
    }
}

/// Writes packets with the timestamp where the previous packet ended.
struct GranuleClock {
    sample_rate: f64,
    last_timestamp_ns: i64,
}

impl GranuleClock {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: f64::from(sample_rate),
            last_timestamp_ns: 0,
        }
    }

    /// Returns the timestamp to write `packet` with, or `None` to skip it.
    fn stamp(&mut self, packet: &AudioPacket) -> Option<i64> {
        if packet.granule_pos <= 0 {
            return None;
        }
        let timestamp = self.last_timestamp_ns;
        self.last_timestamp_ns = (packet.granule_pos as f64 / self.sample_rate * 1e9) as i64;
        Some(timestamp)
    }
}

/// Audio encode stage: drains the audio queue into the intermediate audio file.
/// Returns the number of packets written.
pub(crate) fn run_audio_encoder(
    ctx: Arc<SessionContext>,
    fragments: Receiver<AudioMessage>,
    mut encoder: Box<dyn AudioEncoder>,
    format: AudioStreamFormat,
    path: PathBuf,
) -> Result<u64, RecorderError> {
    let codec_private = encoder.codec_private()?;
    let mut guard = WriterGuard::new(path.clone());
    let mut writer = AudioStreamWriter::create(
        &path,
        AudioHeader {
            sample_rate: format.sample_rate,
            channels: format.channels,
        },
        &codec_private,
    )?;
    tracing::info!(
        target: "recorder",
        "[AUDIO] Encoder ready: {} Hz, {} channels, {:?}",
        format.sample_rate,
        format.channels,
        format.sample_type
    );

    let mut clock = GranuleClock::new(format.sample_rate);
    let mut planar = Vec::new();
    let mut packets = Vec::new();

    loop {
        let end_of_stream = match fragments.recv() {
            Ok(AudioMessage::Fragment(fragment)) => {
                deinterleave(&fragment, &format, &mut planar);
                encoder.encode(&planar, &mut packets)?;
                false
            }
            Ok(AudioMessage::EndOfStream) => {
                encoder.finish(&mut packets)?;
                true
            }
            Err(_) => {
                tracing::error!(target: "recorder", "[AUDIO] Queue closed before end of stream");
                ctx.emit(RecorderEvent::Error(
                    "Audio capture ended unexpectedly".to_string(),
                ));
                return Ok(writer.frames_written());
            }
        };

        for packet in packets.drain(..) {
            if let Some(timestamp) = clock.stamp(&packet) {
                writer.write_frame(&packet.data, timestamp)?;
            }
        }

        if end_of_stream {
            break;
        }
    }

    let written = writer.frames_written();
    writer.finish()?;
    guard.mark_completed();
    tracing::info!(target: "recorder", "[AUDIO] Encoder finished: {} packets", written);
    Ok(written)
}
