use super::{PictureLayout, Timestamping, VideoEncoder, VideoPacket};
use crate::errors::EncodingError;

/// Motion JPEG: every intermediate picture is already a finished key frame.
#[derive(Debug, Default)]
pub struct MjpegEncoder;

impl MjpegEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl VideoEncoder for MjpegEncoder {
    fn input_layout(&self) -> PictureLayout {
        PictureLayout::Jpeg
    }

    fn timestamping(&self) -> Timestamping {
        Timestamping::RepeatAnnotated
    }

    fn codec_private(&mut self) -> Result<Vec<u8>, EncodingError> {
        Ok(Vec::new())
    }

    fn encode(
        &mut self,
        picture: &[u8],
        frame_index: i64,
        out: &mut Vec<VideoPacket>,
    ) -> Result<(), EncodingError> {
        if picture.is_empty() {
            return Err(EncodingError::EncodeFailed("empty MJPEG picture".to_string()));
        }
        out.push(VideoPacket {
            data: picture.to_vec(),
            frame_index,
            is_key: true,
        });
        Ok(())
    }

    fn flush(&mut self, _out: &mut Vec<VideoPacket>) -> Result<(), EncodingError> {
        Ok(())
    }
}
