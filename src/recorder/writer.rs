use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use super::context::SessionContext;
use crate::container::stream_file::VideoStreamWriter;
use crate::errors::RecorderError;
use crate::events::RecorderEvent;
use crate::video::{PictureCodec, Timestamping, VideoEncoder, VideoPacket};

/// RAII guard ensuring partial file deletion on abnormal exit.
///
/// On drop, if not marked as completed, the output file is removed. This keeps
/// half-written stream files and containers out of the output directory even
/// on panic or early return.
pub struct WriterGuard {
    output_path: PathBuf,
    completed: bool,
}

impl WriterGuard {
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            completed: false,
        }
    }

    /// Prevents cleanup on drop. Call after the file is fully written.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        tracing::warn!(target: "recorder", "[WRITER] WriterGuard dropping without completion, cleaning up...");

        if self.output_path.exists() {
            tracing::info!(target: "recorder", "[WRITER] Deleting partial file: {:?}", self.output_path);
            if let Err(e) = std::fs::remove_file(&self.output_path) {
                tracing::warn!(target: "recorder", "[WRITER] Failed to delete partial file: {}", e);
            }
        }
    }
}

/// A compressed frame waiting for the video stage.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPicture {
    pub data: Vec<u8>,
    /// Output frames this picture stands for, at least 1.
    pub repeat_count: u32,
}

/// Item on the picture queue.
#[derive(Debug, PartialEq)]
pub enum PictureMessage {
    Picture(EncodedPicture),
    /// No more pictures this session.
    EndOfStream,
}

/// Result from the video thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoStats {
    pub pictures: u64,
    pub frames: i64,
    pub packets: u64,
}

/// Running video stage for one session.
pub(crate) struct VideoSession {
    pub pictures: Sender<PictureMessage>,
    pub progress: Arc<AtomicBool>,
    pub handle: JoinHandle<Result<VideoStats, RecorderError>>,
}

/// Final-drain progress, counted in queue entries.
struct DrainProgress {
    total: usize,
    done: usize,
}

impl DrainProgress {
    /// `remaining` is the queue length after taking the current picture. The
    /// sentinel is part of it and stands in for the current picture.
    fn new(remaining: usize) -> Self {
        Self {
            total: remaining.max(1),
            done: 0,
        }
    }

    fn advance(&mut self) -> u8 {
        self.done += 1;
        (self.done * 100 / self.total).min(99) as u8
    }
}

pub(crate) fn spawn_video_writer(
    ctx: Arc<SessionContext>,
    encoder: Box<dyn VideoEncoder>,
    path: PathBuf,
) -> Result<VideoSession, RecorderError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let progress = Arc::new(AtomicBool::new(false));
    let progress_flag = Arc::clone(&progress);
    let codec = ctx.picture_codec();

    let handle = std::thread::Builder::new()
        .name("glr-video".to_string())
        .spawn(move || {
            let result = run_video_writer(&ctx, rx, encoder, codec, path, &progress_flag);
            if let Err(e) = &result {
                tracing::error!(target: "recorder", "[VIDEO] Writer failed: {}", e);
                ctx.emit(RecorderEvent::Error(e.to_string()));
            }
            result
        })
        .map_err(|e| RecorderError::ThreadSpawn("video", e.to_string()))?;

    Ok(VideoSession {
        pictures: tx,
        progress,
        handle,
    })
}

fn run_video_writer(
    ctx: &SessionContext,
    pictures: Receiver<PictureMessage>,
    mut encoder: Box<dyn VideoEncoder>,
    mut codec: Box<dyn PictureCodec>,
    path: PathBuf,
    show_progress: &AtomicBool,
) -> Result<VideoStats, RecorderError> {
    let layout = encoder.input_layout();
    let timestamping = encoder.timestamping();
    let codec_private = encoder.codec_private()?;

    let mut guard = WriterGuard::new(path.clone());
    let mut writer = VideoStreamWriter::create(&path, &codec_private)?;
    tracing::info!(target: "recorder", "[VIDEO] Writing {:?} ({:?}, {:?})", path, layout, timestamping);

    let mut stats = VideoStats {
        pictures: 0,
        frames: 0,
        packets: 0,
    };
    let mut drain: Option<DrainProgress> = None;
    let mut decoded = Vec::new();
    let mut packets: Vec<VideoPacket> = Vec::new();

    loop {
        let picture = match pictures.recv() {
            Ok(PictureMessage::Picture(picture)) => picture,
            Ok(PictureMessage::EndOfStream) => {
                let dropped = pictures.try_iter().count();
                if dropped > 0 {
                    tracing::warn!(target: "recorder", "[VIDEO] Dropped {} items after end of stream", dropped);
                }
                if show_progress.load(Ordering::SeqCst) {
                    ctx.emit(RecorderEvent::Progress(99));
                }
                break;
            }
            Err(_) => {
                tracing::warn!(target: "recorder", "[VIDEO] Picture queue closed without end of stream");
                break;
            }
        };

        if show_progress.load(Ordering::SeqCst) {
            let progress = drain.get_or_insert_with(|| DrainProgress::new(pictures.len()));
            ctx.emit(RecorderEvent::Progress(progress.advance()));
        }

        let EncodedPicture { data, repeat_count } = picture;
        let decoded_ok = codec.decompress(&data, layout, &mut decoded);
        drop(data);
        if let Err(e) = decoded_ok {
            tracing::error!(target: "recorder", "[VIDEO] Skipping picture: {}", e);
            ctx.emit(RecorderEvent::Error(e.to_string()));
            continue;
        }

        match timestamping {
            Timestamping::PerFrameIndex => {
                for _ in 0..repeat_count {
                    encoder.encode(&decoded, stats.frames, &mut packets)?;
                    stats.frames += 1;
                }
            }
            Timestamping::RepeatAnnotated => {
                encoder.encode(&decoded, stats.frames, &mut packets)?;
                stats.frames += i64::from(repeat_count);
            }
        }
        stats.pictures += 1;
        stats.packets += write_packets(&mut writer, &mut packets)?;

        if stats.pictures % 300 == 0 {
            tracing::debug!(target: "recorder", "[VIDEO] Progress: {} pictures, {} frames", stats.pictures, stats.frames);
        }
    }

    encoder.flush(&mut packets)?;
    stats.packets += write_packets(&mut writer, &mut packets)?;
    writer.finish()?;
    guard.mark_completed();

    tracing::info!(
        target: "recorder",
        "[VIDEO] Finished: {} pictures, {} frames, {} packets",
        stats.pictures,
        stats.frames,
        stats.packets
    );
    Ok(stats)
}

fn write_packets<W: std::io::Write>(
    writer: &mut VideoStreamWriter<W>,
    packets: &mut Vec<VideoPacket>,
) -> Result<u64, RecorderError> {
    let mut written = 0;
    for packet in packets.drain(..) {
        writer.write_frame(&packet.data, packet.frame_index, packet.is_key)?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecorderConfig;
    use crate::container::stream_file::VideoStreamReader;
    use crate::errors::EncodingError;
    use crate::events::ChannelEvents;
    use crate::video::{MjpegEncoder, PictureLayout};

    /// Echoes every picture as a packet tagged with its frame index.
    #[derive(Default)]
    struct IndexEncoder {
        last_index: i64,
    }

    impl VideoEncoder for IndexEncoder {
        fn input_layout(&self) -> PictureLayout {
            PictureLayout::Jpeg
        }

        fn timestamping(&self) -> Timestamping {
            Timestamping::PerFrameIndex
        }

        fn codec_private(&mut self) -> Result<Vec<u8>, EncodingError> {
            Ok(b"hdr".to_vec())
        }

        fn encode(
            &mut self,
            picture: &[u8],
            frame_index: i64,
            out: &mut Vec<VideoPacket>,
        ) -> Result<(), EncodingError> {
            self.last_index = frame_index;
            out.push(VideoPacket {
                data: picture.to_vec(),
                frame_index,
                is_key: frame_index == 0,
            });
            Ok(())
        }

        fn flush(&mut self, out: &mut Vec<VideoPacket>) -> Result<(), EncodingError> {
            out.push(VideoPacket {
                data: b"tail".to_vec(),
                frame_index: self.last_index,
                is_key: false,
            });
            Ok(())
        }
    }

    fn picture(data: &[u8], repeat_count: u32) -> PictureMessage {
        PictureMessage::Picture(EncodedPicture {
            data: data.to_vec(),
            repeat_count,
        })
    }

    fn read_all(path: &std::path::Path) -> Vec<(i64, bool, Vec<u8>)> {
        let mut reader = VideoStreamReader::open(path, 1 << 20).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            frames.push((frame.frame_index, frame.is_key, frame.data));
        }
        frames
    }

    fn context() -> (Arc<SessionContext>, crossbeam_channel::Receiver<RecorderEvent>) {
        let (events, rx) = ChannelEvents::new();
        (Arc::new(SessionContext::new(RecorderConfig::default(), events)), rx)
    }

    #[test]
    fn test_drain_progress_caps_at_99() {
        let mut progress = DrainProgress::new(3);
        assert_eq!(progress.advance(), 33);
        assert_eq!(progress.advance(), 66);
        assert_eq!(progress.advance(), 99);
        assert_eq!(progress.advance(), 99);
    }

    #[test]
    fn test_repeat_annotated_advances_frame_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.video");
        let (ctx, _rx) = context();
        let session = spawn_video_writer(ctx, Box::new(MjpegEncoder::new()), path.clone()).unwrap();

        session.pictures.send(picture(b"a", 1)).unwrap();
        session.pictures.send(picture(b"b", 3)).unwrap();
        session.pictures.send(picture(b"c", 1)).unwrap();
        session.pictures.send(PictureMessage::EndOfStream).unwrap();
        let stats = session.handle.join().unwrap().unwrap();

        assert_eq!(stats.pictures, 3);
        assert_eq!(stats.frames, 5);
        let frames = read_all(&path);
        let indices: Vec<i64> = frames.iter().map(|f| f.0).collect();
        assert_eq!(indices, vec![0, 1, 4]);
        assert_eq!(frames[1].2, b"b".to_vec());
    }

    #[test]
    fn test_per_frame_index_encodes_each_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.video");
        let (ctx, _rx) = context();
        let session =
            spawn_video_writer(ctx, Box::new(IndexEncoder::default()), path.clone()).unwrap();

        session.pictures.send(picture(b"x", 2)).unwrap();
        session.pictures.send(picture(b"y", 1)).unwrap();
        session.pictures.send(PictureMessage::EndOfStream).unwrap();
        let stats = session.handle.join().unwrap().unwrap();

        assert_eq!(stats.frames, 3);
        let frames = read_all(&path);
        let indices: Vec<i64> = frames.iter().map(|f| f.0).collect();
        assert_eq!(indices, vec![0, 1, 2, 2]);
        assert_eq!(frames[3].2, b"tail".to_vec());

        let reader = VideoStreamReader::open(&path, 1 << 20).unwrap();
        assert_eq!(reader.codec_private(), b"hdr");
    }

    #[test]
    fn test_progress_reported_while_draining() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.video");
        let (ctx, rx) = context();
        let (tx, pictures) = crossbeam_channel::unbounded();
        for name in [b"1", b"2", b"3"] {
            tx.send(picture(name, 1)).unwrap();
        }
        tx.send(PictureMessage::EndOfStream).unwrap();

        let progress = AtomicBool::new(true);
        run_video_writer(
            &ctx,
            pictures,
            Box::new(MjpegEncoder::new()),
            ctx.picture_codec(),
            path,
            &progress,
        )
        .unwrap();

        let reported: Vec<RecorderEvent> = rx.try_iter().collect();
        assert_eq!(
            reported,
            vec![
                RecorderEvent::Progress(33),
                RecorderEvent::Progress(66),
                RecorderEvent::Progress(99),
                RecorderEvent::Progress(99),
            ]
        );
    }

    #[test]
    fn test_undecodable_picture_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.video");
        let (ctx, rx) = context();
        let (tx, pictures) = crossbeam_channel::unbounded();
        tx.send(picture(b"not a jpeg", 1)).unwrap();
        tx.send(PictureMessage::EndOfStream).unwrap();

        let encoder = IndexEncoderI420;
        let stats = run_video_writer(
            &ctx,
            pictures,
            Box::new(encoder),
            ctx.picture_codec(),
            path.clone(),
            &AtomicBool::new(false),
        )
        .unwrap();

        assert_eq!(stats.pictures, 0);
        assert!(matches!(rx.try_recv(), Ok(RecorderEvent::Error(_))));
        assert!(path.exists());
    }

    #[test]
    fn test_writer_guard_deletes_incomplete_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.video");
        std::fs::write(&path, b"x").unwrap();
        drop(WriterGuard::new(path.clone()));
        assert!(!path.exists());

        std::fs::write(&path, b"x").unwrap();
        let mut guard = WriterGuard::new(path.clone());
        guard.mark_completed();
        drop(guard);
        assert!(path.exists());
    }

    /// Wants planar input, so pictures go through the JPEG decoder.
    struct IndexEncoderI420;

    impl VideoEncoder for IndexEncoderI420 {
        fn input_layout(&self) -> PictureLayout {
            PictureLayout::I420
        }

        fn timestamping(&self) -> Timestamping {
            Timestamping::PerFrameIndex
        }

        fn codec_private(&mut self) -> Result<Vec<u8>, EncodingError> {
            Ok(Vec::new())
        }

        fn encode(
            &mut self,
            _picture: &[u8],
            frame_index: i64,
            out: &mut Vec<VideoPacket>,
        ) -> Result<(), EncodingError> {
            out.push(VideoPacket {
                data: vec![0],
                frame_index,
                is_key: true,
            });
            Ok(())
        }

        fn flush(&mut self, _out: &mut Vec<VideoPacket>) -> Result<(), EncodingError> {
            Ok(())
        }
    }
}
