//! Intermediate per-stage stream files.
//!
//! Video: `u32 private_size, [private]`, then `u32 size, i64 frame_index, u8 is_key, [frame]`.
//! Audio: `u32 sample_rate, u32 channels, u32 private_size, [private]`,
//! then `u32 size, i64 timestamp_ns, [frame]`. Integers are little-endian.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::errors::StreamFileError;

const MIN_FRAME_LIMIT: u32 = 1024 * 1024;
pub const MAX_AUDIO_SAMPLE_RATE: u32 = 48_000;
pub const MAX_AUDIO_CHANNELS: u32 = 256;

/// Largest frame or private block a reader accepts for a `width`x`height` session.
pub fn frame_size_limit(width: u32, height: u32) -> u32 {
    let raw = u64::from(width) * u64::from(height) * 3;
    raw.clamp(u64::from(MIN_FRAME_LIMIT), u64::from(u32::MAX)) as u32
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub frame_index: i64,
    pub is_key: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub timestamp_ns: i64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    pub sample_rate: u32,
    pub channels: u32,
}

pub struct VideoStreamWriter<W: Write> {
    out: W,
    frames: u64,
}

impl VideoStreamWriter<BufWriter<std::fs::File>> {
    pub fn create(path: &Path, codec_private: &[u8]) -> Result<Self, StreamFileError> {
        let file = std::fs::File::create(path)?;
        Self::new(BufWriter::new(file), codec_private)
    }
}

impl<W: Write> VideoStreamWriter<W> {
    pub fn new(mut out: W, codec_private: &[u8]) -> Result<Self, StreamFileError> {
        write_block(&mut out, codec_private)?;
        Ok(Self { out, frames: 0 })
    }

    pub fn write_frame(
        &mut self,
        data: &[u8],
        frame_index: i64,
        is_key: bool,
    ) -> Result<(), StreamFileError> {
        self.out.write_all(&block_len(data)?.to_le_bytes())?;
        self.out.write_all(&frame_index.to_le_bytes())?;
        self.out.write_all(&[u8::from(is_key)])?;
        self.out.write_all(data)?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, StreamFileError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

pub struct AudioStreamWriter<W: Write> {
    out: W,
    frames: u64,
}

impl AudioStreamWriter<BufWriter<std::fs::File>> {
    pub fn create(
        path: &Path,
        header: AudioHeader,
        codec_private: &[u8],
    ) -> Result<Self, StreamFileError> {
        let file = std::fs::File::create(path)?;
        Self::new(BufWriter::new(file), header, codec_private)
    }
}

impl<W: Write> AudioStreamWriter<W> {
    pub fn new(
        mut out: W,
        header: AudioHeader,
        codec_private: &[u8],
    ) -> Result<Self, StreamFileError> {
        out.write_all(&header.sample_rate.to_le_bytes())?;
        out.write_all(&header.channels.to_le_bytes())?;
        write_block(&mut out, codec_private)?;
        Ok(Self { out, frames: 0 })
    }

    pub fn write_frame(&mut self, data: &[u8], timestamp_ns: i64) -> Result<(), StreamFileError> {
        self.out.write_all(&block_len(data)?.to_le_bytes())?;
        self.out.write_all(&timestamp_ns.to_le_bytes())?;
        self.out.write_all(data)?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn finish(mut self) -> Result<W, StreamFileError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

pub struct VideoStreamReader<R: Read> {
    input: R,
    limit: u32,
    codec_private: Vec<u8>,
}

impl VideoStreamReader<BufReader<std::fs::File>> {
    pub fn open(path: &Path, limit: u32) -> Result<Self, StreamFileError> {
        let file = std::fs::File::open(path)?;
        Self::new(BufReader::new(file), limit)
    }
}

impl<R: Read> VideoStreamReader<R> {
    pub fn new(mut input: R, limit: u32) -> Result<Self, StreamFileError> {
        let size = read_u32(&mut input)?.ok_or(StreamFileError::Truncated("video header"))?;
        if size > limit {
            return Err(StreamFileError::PrivateTooLarge { size, limit });
        }
        let codec_private = read_exact_vec(&mut input, size, "video codec private")?;
        Ok(Self {
            input,
            limit,
            codec_private,
        })
    }

    pub fn codec_private(&self) -> &[u8] {
        &self.codec_private
    }

    /// Reads the next frame. `Ok(None)` at a clean end of file.
    pub fn next_frame(&mut self) -> Result<Option<VideoFrame>, StreamFileError> {
        let Some(size) = read_u32(&mut self.input)? else {
            return Ok(None);
        };
        if size > self.limit {
            return Err(StreamFileError::FrameTooLarge {
                size,
                limit: self.limit,
            });
        }
        let frame_index = read_i64(&mut self.input, "video frame index")?;
        let mut key = [0u8; 1];
        read_exact(&mut self.input, &mut key, "video key flag")?;
        let data = read_exact_vec(&mut self.input, size, "video frame")?;
        Ok(Some(VideoFrame {
            frame_index,
            is_key: key[0] != 0,
            data,
        }))
    }
}

pub struct AudioStreamReader<R: Read> {
    input: R,
    limit: u32,
    header: AudioHeader,
    codec_private: Vec<u8>,
}

impl AudioStreamReader<BufReader<std::fs::File>> {
    pub fn open(path: &Path, limit: u32) -> Result<Self, StreamFileError> {
        let file = std::fs::File::open(path)?;
        Self::new(BufReader::new(file), limit)
    }
}

impl<R: Read> AudioStreamReader<R> {
    pub fn new(mut input: R, limit: u32) -> Result<Self, StreamFileError> {
        let sample_rate = read_u32(&mut input)?.ok_or(StreamFileError::Truncated("audio header"))?;
        let channels = read_u32(&mut input)?.ok_or(StreamFileError::Truncated("audio header"))?;
        if sample_rate == 0
            || sample_rate > MAX_AUDIO_SAMPLE_RATE
            || channels == 0
            || channels > MAX_AUDIO_CHANNELS
        {
            return Err(StreamFileError::InvalidAudioHeader {
                sample_rate,
                channels,
            });
        }
        let size = read_u32(&mut input)?.ok_or(StreamFileError::Truncated("audio header"))?;
        if size > limit {
            return Err(StreamFileError::PrivateTooLarge { size, limit });
        }
        let codec_private = read_exact_vec(&mut input, size, "audio codec private")?;
        Ok(Self {
            input,
            limit,
            header: AudioHeader {
                sample_rate,
                channels,
            },
            codec_private,
        })
    }

    pub fn header(&self) -> AudioHeader {
        self.header
    }

    pub fn codec_private(&self) -> &[u8] {
        &self.codec_private
    }

    pub fn next_frame(&mut self) -> Result<Option<AudioFrame>, StreamFileError> {
        let Some(size) = read_u32(&mut self.input)? else {
            return Ok(None);
        };
        if size > self.limit {
            return Err(StreamFileError::FrameTooLarge {
                size,
                limit: self.limit,
            });
        }
        let timestamp_ns = read_i64(&mut self.input, "audio timestamp")?;
        let data = read_exact_vec(&mut self.input, size, "audio frame")?;
        Ok(Some(AudioFrame { timestamp_ns, data }))
    }
}

fn block_len(data: &[u8]) -> Result<u32, StreamFileError> {
    u32::try_from(data.len()).map_err(|_| StreamFileError::FrameTooLarge {
        size: u32::MAX,
        limit: u32::MAX,
    })
}

fn write_block<W: Write>(out: &mut W, data: &[u8]) -> Result<(), StreamFileError> {
    out.write_all(&block_len(data)?.to_le_bytes())?;
    out.write_all(data)?;
    Ok(())
}

/// Reads a u32, returning `None` if the stream ends before the first byte.
fn read_u32<R: Read>(input: &mut R) -> Result<Option<u32>, StreamFileError> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(StreamFileError::Truncated("size field")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(u32::from_le_bytes(buf)))
}

fn read_i64<R: Read>(input: &mut R, what: &'static str) -> Result<i64, StreamFileError> {
    let mut buf = [0u8; 8];
    read_exact(input, &mut buf, what)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_exact<R: Read>(input: &mut R, buf: &mut [u8], what: &'static str) -> Result<(), StreamFileError> {
    input.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => StreamFileError::Truncated(what),
        _ => StreamFileError::Io(e),
    })
}

fn read_exact_vec<R: Read>(
    input: &mut R,
    size: u32,
    what: &'static str,
) -> Result<Vec<u8>, StreamFileError> {
    let mut data = vec![0u8; size as usize];
    read_exact(input, &mut data, what)?;
    Ok(data)
}
