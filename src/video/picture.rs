//! Intermediate picture format used between the conversion and video stages.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};

use crate::errors::EncodingError;

/// Raw pixel layout a video encoder wants its input in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureLayout {
    /// The compressed intermediate picture, untouched.
    Jpeg,
    /// Planar YUV 4:2:0, `width*height*3/2` bytes.
    I420,
}

/// Compresses flipped RGBA frames and expands them again for the encoder.
pub trait PictureCodec: Send {
    fn compress(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, EncodingError>;

    /// Expands `picture` into `layout`, reusing `out`.
    fn decompress(
        &mut self,
        picture: &[u8],
        layout: PictureLayout,
        out: &mut Vec<u8>,
    ) -> Result<(), EncodingError>;
}

/// JPEG codec backed by the `image` crate.
pub struct JpegCodec {
    quality: u8,
    rgb: Vec<u8>,
}

impl JpegCodec {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            rgb: Vec::new(),
        }
    }
}

impl PictureCodec for JpegCodec {
    fn compress(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, EncodingError> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(EncodingError::CompressFailed(format!(
                "frame is {} bytes, expected {}",
                rgba.len(),
                expected
            )));
        }

        // Readback alpha is meaningless for the output, JPEG has no alpha channel.
        self.rgb.clear();
        self.rgb.reserve(expected / 4 * 3);
        for px in rgba.chunks_exact(4) {
            self.rgb.extend_from_slice(&px[..3]);
        }

        let mut jpeg = Vec::with_capacity(expected / 8);
        JpegEncoder::new_with_quality(&mut jpeg, self.quality)
            .encode(&self.rgb, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| EncodingError::CompressFailed(e.to_string()))?;
        Ok(jpeg)
    }

    fn decompress(
        &mut self,
        picture: &[u8],
        layout: PictureLayout,
        out: &mut Vec<u8>,
    ) -> Result<(), EncodingError> {
        match layout {
            PictureLayout::Jpeg => {
                out.clear();
                out.extend_from_slice(picture);
                Ok(())
            }
            PictureLayout::I420 => {
                let decoded = image::load_from_memory_with_format(picture, ImageFormat::Jpeg)
                    .map_err(|e| EncodingError::DecompressFailed(e.to_string()))?
                    .to_rgb8();
                let (width, height) = decoded.dimensions();
                rgb_to_i420(decoded.as_raw(), width, height, out);
                Ok(())
            }
        }
    }
}

/// BT.601 limited-range RGB to planar I420. Chroma is averaged over 2x2 blocks.
pub fn rgb_to_i420(rgb: &[u8], width: u32, height: u32, out: &mut Vec<u8>) {
    let w = width as usize;
    let h = height as usize;
    let cw = w.div_ceil(2);
    let ch = h.div_ceil(2);

    out.clear();
    out.resize(w * h + 2 * cw * ch, 0);
    let (y_plane, chroma) = out.split_at_mut(w * h);
    let (u_plane, v_plane) = chroma.split_at_mut(cw * ch);

    for row in 0..h {
        for col in 0..w {
            let i = (row * w + col) * 3;
            let (r, g, b) = (
                i32::from(rgb[i]),
                i32::from(rgb[i + 1]),
                i32::from(rgb[i + 2]),
            );
            y_plane[row * w + col] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8;
        }
    }

    for cy in 0..ch {
        for cx in 0..cw {
            let (mut r, mut g, mut b, mut n) = (0i32, 0i32, 0i32, 0i32);
            for row in (cy * 2)..(cy * 2 + 2).min(h) {
                for col in (cx * 2)..(cx * 2 + 2).min(w) {
                    let i = (row * w + col) * 3;
                    r += i32::from(rgb[i]);
                    g += i32::from(rgb[i + 1]);
                    b += i32::from(rgb[i + 2]);
                    n += 1;
                }
            }
            let (r, g, b) = (r / n, g / n, b / n);
            u_plane[cy * cw + cx] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8;
            v_plane[cy * cw + cx] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8;
        }
    }
}

/// Flips an image upside down in place, one scanline swap at a time.
///
/// Graphics readback delivers the bottom row first. `scratch` is resized to one
/// scanline and reused between calls.
pub fn flip_vertical(pixels: &mut [u8], pitch: usize, height: usize, scratch: &mut Vec<u8>) {
    scratch.resize(pitch, 0);
    for top in 0..height / 2 {
        let bottom = height - 1 - top;
        let (head, tail) = pixels.split_at_mut(bottom * pitch);
        let top_row = &mut head[top * pitch..(top + 1) * pitch];
        let bottom_row = &mut tail[..pitch];
        scratch.copy_from_slice(top_row);
        top_row.copy_from_slice(bottom_row);
        bottom_row.copy_from_slice(scratch);
    }
}
