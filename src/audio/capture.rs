use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

use super::encoder::run_audio_encoder;
use super::{AudioBackendFactory, AudioMessage};
use crate::config::AudioFormat;
use crate::errors::{AudioError, RecorderError};
use crate::events::RecorderEvent;
use crate::recorder::context::SessionContext;

/// Slices a byte stream into fixed-size fragments.
///
/// A fragment is only emitted once data beyond it arrives, so the tail of the
/// stream always stays in the current fragment until [`Fragmenter::finish`].
pub struct Fragmenter {
    fragment_size: usize,
    current: Vec<u8>,
}

impl Fragmenter {
    pub fn new(fragment_size: usize) -> Self {
        Self {
            fragment_size: fragment_size.max(1),
            current: Vec::with_capacity(fragment_size),
        }
    }

    pub fn push(&mut self, mut data: &[u8], emit: &mut dyn FnMut(Vec<u8>)) {
        while self.current.len() + data.len() > self.fragment_size {
            let take = self.fragment_size - self.current.len();
            self.current.extend_from_slice(&data[..take]);
            let full = std::mem::replace(
                &mut self.current,
                Vec::with_capacity(self.fragment_size),
            );
            emit(full);
            data = &data[take..];
        }
        self.current.extend_from_slice(data);
    }

    /// The partially filled fragment, `None` when it is empty.
    pub fn finish(self) -> Option<Vec<u8>> {
        if self.current.is_empty() {
            None
        } else {
            Some(self.current)
        }
    }
}

/// Byte queue between a backend's data callback and the thread pumping it.
///
/// Callbacks may run on a backend-owned thread.
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, data: &[u8]) {
        self.bytes
            .lock()
            .expect("capture buffer poisoned")
            .extend_from_slice(data);
    }

    /// Moves everything queued so far into `out`, which is cleared first.
    pub fn take_into(&self, out: &mut Vec<u8>) {
        out.clear();
        let mut bytes = self.bytes.lock().expect("capture buffer poisoned");
        std::mem::swap(out, &mut *bytes);
    }
}

/// Running audio capture for one session.
pub struct AudioSession {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl AudioSession {
    /// Signals the capture stage and waits for capture and encode to finish.
    pub fn stop_and_join(self) -> Result<(), RecorderError> {
        self.stop.store(true, Ordering::SeqCst);
        self.handle
            .join()
            .map_err(|_| RecorderError::ThreadPanicked("audio capture"))
    }
}

pub fn spawn_audio_capture(
    ctx: Arc<SessionContext>,
    backend: AudioBackendFactory,
    audio_format: AudioFormat,
    path: PathBuf,
) -> Result<AudioSession, RecorderError> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);

    let handle = std::thread::Builder::new()
        .name("glr-audio-capture".to_string())
        .spawn(move || {
            if let Err(e) = run_audio_capture(&ctx, &backend, audio_format, path, &stop_flag) {
                tracing::error!(target: "recorder", "[AUDIO] Capture failed: {}", e);
                ctx.emit(RecorderEvent::Error(e.to_string()));
            }
        })
        .map_err(|e| RecorderError::ThreadSpawn("audio capture", e.to_string()))?;

    Ok(AudioSession { stop, handle })
}

fn run_audio_capture(
    ctx: &Arc<SessionContext>,
    backend: &AudioBackendFactory,
    audio_format: AudioFormat,
    path: PathBuf,
    stop: &AtomicBool,
) -> Result<(), RecorderError> {
    let mut backend = backend()?;
    let format = backend.format()?;
    format.validate()?;

    let encoder = ctx.build_audio_encoder(audio_format, &format)?;
    let (tx, rx) = crossbeam_channel::unbounded();

    let encode_ctx = Arc::clone(ctx);
    let encode_handle = std::thread::Builder::new()
        .name("glr-audio-encode".to_string())
        .spawn(move || {
            let result = run_audio_encoder(Arc::clone(&encode_ctx), rx, encoder, format, path);
            if let Err(e) = &result {
                tracing::error!(target: "recorder", "[AUDIO] Encoder failed: {}", e);
                encode_ctx.emit(RecorderEvent::Error(e.to_string()));
            }
        })
        .map_err(|e| RecorderError::ThreadSpawn("audio encode", e.to_string()))?;

    tracing::info!(
        target: "recorder",
        "[AUDIO] Capturing {} Hz, {} channels, fragment {} bytes",
        format.sample_rate,
        format.channels,
        format.fragment_size()
    );

    let mut fragmenter = Fragmenter::new(format.fragment_size());
    let mut fragments = 0u64;
    let mut pump_error: Option<AudioError> = None;

    while !stop.load(Ordering::SeqCst) {
        let result = backend.pump(&mut |chunk| {
            fragmenter.push(chunk, &mut |fragment| {
                fragments += 1;
                send_fragment(&tx, AudioMessage::Fragment(fragment));
            });
        });
        if let Err(e) = result {
            pump_error = Some(e);
            break;
        }
    }

    if let Some(rest) = fragmenter.finish() {
        fragments += 1;
        send_fragment(&tx, AudioMessage::Fragment(rest));
    }
    send_fragment(&tx, AudioMessage::EndOfStream);
    tracing::info!(target: "recorder", "[AUDIO] Capture stopped after {} fragments", fragments);

    if encode_handle.join().is_err() {
        tracing::error!(target: "recorder", "[AUDIO] Encoder thread panicked");
        return Err(RecorderError::ThreadPanicked("audio encode"));
    }

    match pump_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn send_fragment(tx: &Sender<AudioMessage>, message: AudioMessage) {
    // Encoder already exited and reported why.
    let _ = tx.send(message);
}
