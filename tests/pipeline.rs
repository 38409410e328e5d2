//! End-to-end tests for the capture pipeline.
//!
//! A fake readback stands in for the graphics API and a scripted backend for
//! system audio. Sessions run through the real conversion, video, audio and
//! mux stages into a temporary directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Receiver;
use glrecorder_lib::audio::{AudioBackend, AudioStreamFormat, SampleType};
use glrecorder_lib::errors::{AudioError, EncodingError};
use glrecorder_lib::video::{PictureLayout, Timestamping, VideoEncoder, VideoPacket};
use glrecorder_lib::{
    ChannelEvents, GraphicsReadback, Recorder, RecorderConfig, RecorderEvent, SessionContext,
    StagingBuffer, VideoFormat,
};

const FRAME_16MS: Duration = Duration::from_millis(16);

// =============================================================================
// Fakes
// =============================================================================

/// Synchronous readback filling every frame with a running shade.
#[derive(Default)]
struct FakeReadback {
    shade: u8,
}

impl GraphicsReadback for FakeReadback {
    fn read_pixels(&mut self, _width: u32, _height: u32, dst: &mut [u8]) {
        self.shade = self.shade.wrapping_add(1);
        dst.fill(self.shade);
    }
}

/// Readback with working staging buffers.
#[derive(Default)]
struct StagedReadback;

impl GraphicsReadback for StagedReadback {
    fn read_pixels(&mut self, _width: u32, _height: u32, dst: &mut [u8]) {
        dst.fill(0);
    }

    fn create_staging_buffers(&mut self, count: usize, _size: usize) -> Option<Vec<StagingBuffer>> {
        Some((0..count as u32).map(StagingBuffer).collect())
    }

    fn copy_staging(&mut self, buffer: StagingBuffer, dst: &mut [u8]) -> bool {
        dst.fill(buffer.0 as u8 * 40);
        true
    }
}

/// Records the frame index of every encode call. Optionally blocks each call
/// until the gate sender is dropped.
struct LoggingEncoder {
    log: Arc<Mutex<Vec<i64>>>,
    gate: Option<Receiver<()>>,
}

impl VideoEncoder for LoggingEncoder {
    fn input_layout(&self) -> PictureLayout {
        PictureLayout::Jpeg
    }

    fn timestamping(&self) -> Timestamping {
        Timestamping::PerFrameIndex
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
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        self.log.lock().unwrap().push(frame_index);
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

/// 48 kHz stereo S16 backend producing a byte ramp in uneven chunks.
struct ScriptedAudio {
    next: u8,
    pumped: Arc<AtomicUsize>,
}

impl AudioBackend for ScriptedAudio {
    fn format(&mut self) -> Result<AudioStreamFormat, AudioError> {
        Ok(AudioStreamFormat {
            sample_rate: 48_000,
            channels: 2,
            sample_type: SampleType::S16,
        })
    }

    fn pump(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<(), AudioError> {
        std::thread::sleep(Duration::from_millis(5));
        let chunk: Vec<u8> = (0..1500)
            .map(|_| {
                self.next = self.next.wrapping_add(1);
                self.next
            })
            .collect();
        self.pumped.fetch_add(chunk.len(), Ordering::SeqCst);
        sink(&chunk);
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn small_config() -> RecorderConfig {
    RecorderConfig {
        width: 16,
        height: 8,
        triple_buffering: false,
        ..RecorderConfig::default()
    }
}

fn logging_context(
    config: RecorderConfig,
    events: ChannelEvents,
    gate: Option<Receiver<()>>,
) -> (SessionContext, Arc<Mutex<Vec<i64>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let factory_log = Arc::clone(&log);
    let ctx = SessionContext::new(config, events)
        .without_audio_backend()
        .with_video_encoder(VideoFormat::Mjpeg, move |_| {
            Ok(Box::new(LoggingEncoder {
                log: Arc::clone(&factory_log),
                gate: gate.clone(),
            }) as Box<dyn VideoEncoder>)
        });
    (ctx, log)
}

fn ready_recorder(ctx: SessionContext, readback: Box<dyn GraphicsReadback>, dir: &Path) -> Recorder {
    let mut recorder = Recorder::with_context(ctx).unwrap();
    recorder.register_readback(readback);
    recorder.set_output_name(dir.join("take"));
    recorder
}

/// Feeds `calls` captures spaced `step` apart, giving the conversion thread a
/// moment to pick up every frame.
fn drive(recorder: &mut Recorder, calls: usize, step: Duration) {
    for _ in 0..calls {
        recorder.capture_after(step);
        std::thread::sleep(Duration::from_millis(2));
    }
    std::thread::sleep(Duration::from_millis(100));
}

/// Collects events up to and including `Saved`.
fn wait_for_saved(rx: &Receiver<RecorderEvent>) -> (PathBuf, Vec<RecorderEvent>) {
    let mut seen = Vec::new();
    loop {
        let event = rx
            .recv_timeout(Duration::from_secs(20))
            .expect("timed out waiting for Saved");
        if let RecorderEvent::Saved(path) = &event {
            let path = path.clone();
            seen.push(event);
            return (path, seen);
        }
        seen.push(event);
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// =============================================================================
// Sessions
// =============================================================================

#[test]
fn test_one_second_at_60hz_records_30_frames() {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = ChannelEvents::new();
    let (ctx, log) = logging_context(small_config(), events, None);
    let mut recorder = ready_recorder(ctx, Box::new(FakeReadback::default()), dir.path());

    recorder.start().unwrap();
    assert!(recorder.is_capturing());
    assert_eq!(rx.recv().unwrap(), RecorderEvent::Started);

    drive(&mut recorder, 62, FRAME_16MS);
    recorder.stop();
    let (saved, seen) = wait_for_saved(&rx);

    let frames = log.lock().unwrap().clone();
    assert!((29..=30).contains(&frames.len()), "got {} frames", frames.len());
    assert_eq!(frames, (0..frames.len() as i64).collect::<Vec<_>>());

    assert_eq!(saved, dir.path().join("take.mkv"));
    assert!(saved.exists());
    assert!(!dir.path().join("take.video").exists());
    assert!(seen.contains(&RecorderEvent::Progress(99)));
    assert!(!seen.iter().any(|e| matches!(e, RecorderEvent::Error(_))));
}

#[test]
fn test_stall_becomes_one_repeated_picture() {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = ChannelEvents::new();
    let (ctx, log) = logging_context(small_config(), events, None);
    let mut recorder = ready_recorder(ctx, Box::new(FakeReadback::default()), dir.path());

    recorder.start().unwrap();
    recorder.capture_after(Duration::ZERO);
    recorder.capture_after(Duration::from_millis(500));
    std::thread::sleep(Duration::from_millis(100));
    recorder.stop();
    wait_for_saved(&rx);

    let frames = log.lock().unwrap().clone();
    assert!((14..=15).contains(&frames.len()), "got {} frames", frames.len());
}

#[test]
fn test_triple_buffered_readback_keeps_time() {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = ChannelEvents::new();
    let config = RecorderConfig {
        triple_buffering: true,
        ..small_config()
    };
    let (ctx, log) = logging_context(config, events, None);
    let mut recorder = ready_recorder(ctx, Box::new(StagedReadback), dir.path());

    recorder.start().unwrap();
    drive(&mut recorder, 62, FRAME_16MS);
    recorder.stop();
    wait_for_saved(&rx);

    let frames = log.lock().unwrap().len();
    assert!((29..=30).contains(&frames), "got {} frames", frames);
}

#[test]
fn test_long_backlog_reports_waiting_once() {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = ChannelEvents::new();
    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    let (ctx, log) = logging_context(small_config(), events, Some(gate_rx));
    let mut recorder = ready_recorder(ctx, Box::new(FakeReadback::default()), dir.path());

    recorder.start().unwrap();
    drive(&mut recorder, 250, Duration::from_millis(34));
    recorder.stop();

    let mut seen = Vec::new();
    loop {
        let event = rx.recv_timeout(Duration::from_secs(20)).unwrap();
        let waiting = event == RecorderEvent::Waiting;
        seen.push(event);
        if waiting {
            break;
        }
    }
    drop(gate_tx);

    let (saved, rest) = wait_for_saved(&rx);
    seen.extend(rest);
    let waits = seen.iter().filter(|e| **e == RecorderEvent::Waiting).count();
    assert_eq!(waits, 1);
    assert!(saved.exists());
    assert!(log.lock().unwrap().len() > 100);

    let progress: Vec<u8> = seen
        .iter()
        .filter_map(|e| match e {
            RecorderEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&99));
}

#[test]
fn test_audio_is_muxed_and_intermediates_removed() {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = ChannelEvents::new();
    let pumped = Arc::new(AtomicUsize::new(0));
    let backend_pumped = Arc::clone(&pumped);
    let config = RecorderConfig {
        record_audio: true,
        ..small_config()
    };
    let ctx = SessionContext::new(config, events).with_audio_backend(move || {
        Ok(Box::new(ScriptedAudio {
            next: 0,
            pumped: Arc::clone(&backend_pumped),
        }) as Box<dyn AudioBackend>)
    });
    let mut recorder = ready_recorder(ctx, Box::new(FakeReadback::default()), dir.path());

    recorder.start().unwrap();
    drive(&mut recorder, 30, FRAME_16MS);
    recorder.stop();
    let (saved, seen) = wait_for_saved(&rx);

    assert!(!seen.iter().any(|e| matches!(e, RecorderEvent::Error(_))), "{:?}", seen);
    assert!(pumped.load(Ordering::SeqCst) > 0);
    let bytes = std::fs::read(&saved).unwrap();
    assert!(contains(&bytes, b"V_MJPEG"));
    assert!(contains(&bytes, b"A_PCM/INT/LIT"));
    assert!(!dir.path().join("take.video").exists());
    assert!(!dir.path().join("take.audio").exists());
}

#[test]
fn test_unwritable_video_file_discards_audio() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("take.video")).unwrap();
    let (events, rx) = ChannelEvents::new();
    let config = RecorderConfig {
        record_audio: true,
        ..small_config()
    };
    let ctx = SessionContext::new(config, events).with_audio_backend(|| {
        Ok(Box::new(ScriptedAudio {
            next: 0,
            pumped: Arc::new(AtomicUsize::new(0)),
        }) as Box<dyn AudioBackend>)
    });
    let mut recorder = ready_recorder(ctx, Box::new(FakeReadback::default()), dir.path());

    recorder.start().unwrap();
    drive(&mut recorder, 20, FRAME_16MS);
    recorder.stop();

    for _ in 0..2000 {
        if !recorder.is_capturing() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!recorder.is_capturing());

    let seen: Vec<RecorderEvent> = rx.try_iter().collect();
    assert!(seen.iter().any(|e| matches!(e, RecorderEvent::Error(_))), "{:?}", seen);
    assert!(!seen.iter().any(|e| matches!(e, RecorderEvent::Saved(_))), "{:?}", seen);
    assert!(!dir.path().join("take.audio").exists());
    assert!(!dir.path().join("take.mkv").exists());
    assert!(dir.path().join("take.video").is_dir());
}

#[test]
fn test_missing_audio_backend_records_video_only() {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = ChannelEvents::new();
    let config = RecorderConfig {
        record_audio: true,
        ..small_config()
    };
    let ctx = SessionContext::new(config, events).without_audio_backend();
    let mut recorder = ready_recorder(ctx, Box::new(FakeReadback::default()), dir.path());

    recorder.start().unwrap();
    drive(&mut recorder, 10, FRAME_16MS);
    recorder.stop();
    let (saved, seen) = wait_for_saved(&rx);

    assert!(seen.iter().any(|e| matches!(e, RecorderEvent::Error(_))));
    let bytes = std::fs::read(&saved).unwrap();
    assert!(!contains(&bytes, b"A_PCM/INT/LIT"));
}

#[test]
fn test_unsupported_video_format_falls_back_to_mkv() {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = ChannelEvents::new();
    let config = RecorderConfig {
        video_format: VideoFormat::Vp9,
        ..small_config()
    };
    let ctx = SessionContext::new(config, events).without_audio_backend();
    let mut recorder = ready_recorder(ctx, Box::new(FakeReadback::default()), dir.path());

    recorder.start().unwrap();
    drive(&mut recorder, 10, FRAME_16MS);
    recorder.stop();
    let (saved, seen) = wait_for_saved(&rx);

    assert!(matches!(seen[0], RecorderEvent::Error(_)));
    assert_eq!(saved, dir.path().join("take.mkv"));
}

#[test]
fn test_sessions_can_be_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = ChannelEvents::new();
    let ctx = SessionContext::new(small_config(), events).without_audio_backend();
    let mut recorder = ready_recorder(ctx, Box::new(FakeReadback::default()), dir.path());

    for name in ["first", "second"] {
        recorder.set_output_name(dir.path().join(name));
        recorder.start().unwrap();
        drive(&mut recorder, 10, FRAME_16MS);
        recorder.stop();
        let (saved, _) = wait_for_saved(&rx);
        assert_eq!(saved, dir.path().join(format!("{}.mkv", name)));
        while recorder.is_capturing() {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

// =============================================================================
// Controller edge cases
// =============================================================================

#[test]
fn test_start_without_readback_is_ignored() {
    let (events, rx) = ChannelEvents::new();
    let ctx = SessionContext::new(small_config(), events).without_audio_backend();
    let mut recorder = Recorder::with_context(ctx).unwrap();

    recorder.start().unwrap();
    assert!(!recorder.is_capturing());
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_capture_while_idle_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = ChannelEvents::new();
    let (ctx, log) = logging_context(small_config(), events, None);
    let mut recorder = ready_recorder(ctx, Box::new(FakeReadback::default()), dir.path());

    drive(&mut recorder, 10, FRAME_16MS);
    recorder.stop();
    assert!(log.lock().unwrap().is_empty());
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_output_name_locked_while_capturing() {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = ChannelEvents::new();
    let ctx = SessionContext::new(small_config(), events).without_audio_backend();
    let mut recorder = ready_recorder(ctx, Box::new(FakeReadback::default()), dir.path());

    recorder.start().unwrap();
    recorder.set_output_name(dir.path().join("other"));
    assert_eq!(recorder.output_name(), dir.path().join("take"));
    recorder.stop();
    wait_for_saved(&rx);
}

#[test]
fn test_drop_while_capturing_finishes_silently() {
    let dir = tempfile::tempdir().unwrap();
    let (events, rx) = ChannelEvents::new();
    let ctx = SessionContext::new(small_config(), events).without_audio_backend();
    let mut recorder = ready_recorder(ctx, Box::new(FakeReadback::default()), dir.path());

    recorder.start().unwrap();
    assert_eq!(rx.recv().unwrap(), RecorderEvent::Started);
    drive(&mut recorder, 10, FRAME_16MS);
    drop(recorder);

    assert!(rx.try_recv().is_err());
    assert!(dir.path().join("take.mkv").exists());
}

#[test]
fn test_drop_while_idle_returns() {
    let (events, _rx) = ChannelEvents::new();
    let ctx = SessionContext::new(small_config(), events).without_audio_backend();
    let recorder = Recorder::with_context(ctx).unwrap();
    drop(recorder);
}
