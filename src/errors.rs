use thiserror::Error;

/// Errors from validating a [`crate::config::RecorderConfig`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Resolution {width}x{height} is out of range")]
    InvalidResolution { width: u32, height: u32 },
    #[error("Bitrate must be non-zero")]
    ZeroBitrate,
    #[error("Record framerate must be non-zero")]
    ZeroFramerate,
    #[error("JPEG quality {0} is above 100")]
    InvalidQuality(u8),
    #[error("Failed to read config file: {0}")]
    ReadFailed(String),
    #[error("Failed to parse config: {0}")]
    ParseFailed(String),
}

/// Errors from the platform audio backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Audio backend is not available: {0}")]
    Unavailable(String),
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("Sample rate {0} Hz is above 48000 Hz")]
    UnsupportedSampleRate(u32),
    #[error("Audio stream failed: {0}")]
    StreamFailed(String),
}

/// Errors from picture conversion and the video/audio encoders.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("Picture compression failed: {0}")]
    CompressFailed(String),
    #[error("Picture decompression failed: {0}")]
    DecompressFailed(String),
    #[error("Encoder initialization failed: {0}")]
    InitFailed(String),
    #[error("Encoding failed: {0}")]
    EncodeFailed(String),
    #[error("No encoder registered for {0}")]
    Unsupported(String),
}

/// Errors from reading or writing the intermediate stream files.
#[derive(Error, Debug)]
pub enum StreamFileError {
    #[error("Stream file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame size {size} exceeds limit {limit}")]
    FrameTooLarge { size: u32, limit: u32 },
    #[error("Codec private data of {size} bytes exceeds limit {limit}")]
    PrivateTooLarge { size: u32, limit: u32 },
    #[error("Invalid audio header: {sample_rate} Hz, {channels} channels")]
    InvalidAudioHeader { sample_rate: u32, channels: u32 },
    #[error("Truncated stream file: {0}")]
    Truncated(&'static str),
}

/// Errors from the final container mux.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error(transparent)]
    Stream(#[from] StreamFileError),
    #[error("Failed to write container: {0}")]
    WriteFailed(#[from] std::io::Error),
    #[error("Container encoding failed: {0}")]
    Container(String),
    #[error("Video stream file is missing: {0}")]
    MissingVideo(String),
}

/// Top-level error type for recorder operations.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    StreamFile(#[from] StreamFileError),
    #[error(transparent)]
    Mux(#[from] MuxError),
    #[error("Failed to prepare output directory: {0}")]
    OutputDir(std::io::Error),
    #[error("Failed to spawn {0} thread: {1}")]
    ThreadSpawn(&'static str, String),
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}
