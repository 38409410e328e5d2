use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::ConfigError;

pub const MAX_DIMENSION: u32 = 16384;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VideoFormat {
    #[default]
    Mjpeg,
    Vp8,
    Vp9,
    H264,
}

impl VideoFormat {
    /// Matroska codec identifier for the video track.
    pub fn codec_id(&self) -> &'static str {
        match self {
            VideoFormat::Mjpeg => "V_MJPEG",
            VideoFormat::Vp8 => "V_VP8",
            VideoFormat::Vp9 => "V_VP9",
            VideoFormat::H264 => "V_MPEG4/ISO/AVC",
        }
    }

    /// VP8/VP9 go into a WebM file, everything else into Matroska.
    pub fn is_webm(&self) -> bool {
        matches!(self, VideoFormat::Vp8 | VideoFormat::Vp9)
    }

    pub fn container_extension(&self) -> &'static str {
        if self.is_webm() {
            "webm"
        } else {
            "mkv"
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Vorbis,
    #[default]
    Pcm,
}

impl AudioFormat {
    pub fn codec_id(&self) -> &'static str {
        match self {
            AudioFormat::Vorbis => "A_VORBIS",
            AudioFormat::Pcm => "A_PCM/INT/LIT",
        }
    }
}

/// Session configuration. Frozen once a [`crate::Recorder`] is built.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecorderConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_true")]
    pub triple_buffering: bool,
    #[serde(default)]
    pub record_audio: bool,
    #[serde(default)]
    pub video_format: VideoFormat,
    #[serde(default)]
    pub audio_format: AudioFormat,
    pub video_bitrate: u32,
    pub audio_bitrate: u32,
    pub record_fps: u32,
    pub jpeg_quality: u8,
}

fn default_true() -> bool {
    true
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            triple_buffering: true,
            record_audio: false,
            video_format: VideoFormat::Mjpeg,
            audio_format: AudioFormat::Pcm,
            video_bitrate: 100_000,
            audio_bitrate: 112_000,
            record_fps: 30,
            jpeg_quality: 90,
        }
    }
}

impl RecorderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width < 8
            || self.height < 2
            || self.width > MAX_DIMENSION
            || self.height > MAX_DIMENSION
        {
            return Err(ConfigError::InvalidResolution {
                width: self.width,
                height: self.height,
            });
        }
        if self.video_bitrate == 0 || self.audio_bitrate == 0 {
            return Err(ConfigError::ZeroBitrate);
        }
        if self.record_fps == 0 {
            return Err(ConfigError::ZeroFramerate);
        }
        if self.jpeg_quality > 100 {
            return Err(ConfigError::InvalidQuality(self.jpeg_quality));
        }
        Ok(())
    }

    /// Validates and normalises the config, falling back to defaults when invalid.
    ///
    /// Width is rounded down to a multiple of 8 and height to a multiple of 2,
    /// which every supported codec can encode without padding.
    pub fn validated(self) -> (Self, Option<ConfigError>) {
        if let Err(e) = self.validate() {
            tracing::warn!(target: "recorder", "[CONFIG] Invalid config ({}), using defaults", e);
            return (Self::default(), Some(e));
        }
        let mut config = self;
        config.width -= config.width % 8;
        config.height -= config.height % 2;
        (config, None)
    }

    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Loads a JSON config, returning defaults when the file is missing or unreadable.
pub fn load_config(path: &Path) -> RecorderConfig {
    if !path.exists() {
        return RecorderConfig::default();
    }

    match load_config_from_file(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(target: "recorder", "[CONFIG] {}, using defaults", e);
            RecorderConfig::default()
        }
    }
}

fn load_config_from_file(path: &Path) -> Result<RecorderConfig, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed(e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| ConfigError::ParseFailed(e.to_string()))
}
