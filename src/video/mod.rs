//! Video encoder interface and the built-in MJPEG writer.

pub mod mjpeg;
pub mod picture;

pub use mjpeg::MjpegEncoder;
pub use picture::{JpegCodec, PictureCodec, PictureLayout};

use crate::config::RecorderConfig;
use crate::errors::EncodingError;

/// How an encoder timestamps its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamping {
    /// One `encode` call per output frame with increasing frame indices.
    PerFrameIndex,
    /// One `encode` call per picture, the frame counter then skips ahead by the
    /// picture's repeat count.
    RepeatAnnotated,
}

/// One coded video packet ready for the intermediate video file.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoPacket {
    pub data: Vec<u8>,
    /// Frame index the packet is presented at.
    pub frame_index: i64,
    pub is_key: bool,
}

pub trait VideoEncoder: Send {
    /// Layout the video stage must decode pictures into before calling `encode`.
    fn input_layout(&self) -> PictureLayout;

    fn timestamping(&self) -> Timestamping;

    /// Codec private data stored in the stream header. Empty when the codec has none.
    fn codec_private(&mut self) -> Result<Vec<u8>, EncodingError>;

    fn encode(
        &mut self,
        picture: &[u8],
        frame_index: i64,
        out: &mut Vec<VideoPacket>,
    ) -> Result<(), EncodingError>;

    /// Drains delayed packets at end of stream.
    ///
    /// Packets carry the frame index of the picture they belong to. The muxer
    /// never moves video backwards in time and clamps an earlier index to the
    /// previous packet's timestamp.
    fn flush(&mut self, out: &mut Vec<VideoPacket>) -> Result<(), EncodingError>;
}

/// Builds a video encoder for a validated session config.
pub type VideoEncoderFactory =
    Box<dyn Fn(&RecorderConfig) -> Result<Box<dyn VideoEncoder>, EncodingError> + Send + Sync>;
