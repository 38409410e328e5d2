//! Capture session controller.
//!
//! The host drives a [`Recorder`] from its render thread: it registers a
//! [`GraphicsReadback`], calls [`Recorder::capture`] once per rendered frame,
//! and toggles sessions with [`Recorder::start`] / [`Recorder::stop`]. Frames
//! flow render thread -> conversion thread -> video thread, audio runs beside
//! them, and the conversion thread muxes the result when a session stops.

pub mod context;
pub mod conversion;
pub mod frame_store;
pub mod pacing;
pub mod state;
pub mod writer;

pub use context::SessionContext;
pub use frame_store::{GraphicsReadback, StagingBuffer, STAGING_SLOTS};
pub use pacing::Pacing;
pub use state::{FrameEvent, PendingFrame};
pub use writer::{EncodedPicture, PictureMessage, VideoStats, WriterGuard};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::audio::spawn_audio_capture;
use crate::config::RecorderConfig;
use crate::container::MuxRequest;
use crate::errors::RecorderError;
use crate::events::{RecorderEvent, RecorderEvents};
use crate::shared::paths::{default_output_name, ensure_dir, SessionPaths};
use conversion::{spawn_conversion, ActiveSession};
use frame_store::{FrameExchange, FrameStore};
use writer::spawn_video_writer;

pub struct Recorder {
    ctx: Arc<SessionContext>,
    exchange: Arc<FrameExchange>,
    capturing: Arc<AtomicBool>,
    sessions: Sender<ActiveSession>,
    conversion: Option<JoinHandle<()>>,
    store: Option<FrameStore>,
    pacing: Pacing,
    last_capture: Option<Instant>,
    stopping: bool,
    output_base: PathBuf,
}

impl Recorder {
    /// Builds a recorder with the built-in encoders and the platform audio backend.
    pub fn new(
        config: RecorderConfig,
        events: impl RecorderEvents + 'static,
    ) -> Result<Self, RecorderError> {
        Self::with_context(SessionContext::new(config, events))
    }

    /// Builds a recorder around a customised context and starts its conversion thread.
    pub fn with_context(ctx: SessionContext) -> Result<Self, RecorderError> {
        let ctx = Arc::new(ctx);
        let exchange = Arc::new(FrameExchange::new(ctx.config().frame_bytes()));
        let capturing = Arc::new(AtomicBool::new(false));
        let (sessions, session_rx) = crossbeam_channel::unbounded();

        let conversion = spawn_conversion(
            Arc::clone(&ctx),
            Arc::clone(&exchange),
            Arc::clone(&capturing),
            session_rx,
        )?;

        tracing::info!(
            target: "recorder",
            "[SESSION] Recorder ready: {}x{} @ {} fps, {:?}",
            ctx.config().width,
            ctx.config().height,
            ctx.config().record_fps,
            ctx.config().video_format
        );

        Ok(Self {
            pacing: Pacing::new(ctx.config().record_fps),
            ctx,
            exchange,
            capturing,
            sessions,
            conversion: Some(conversion),
            store: None,
            last_capture: None,
            stopping: false,
            output_base: default_output_name(),
        })
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Installs the host's pixel readback. Must be called from the render thread.
    /// Ignored while a session is active.
    pub fn register_readback(&mut self, readback: Box<dyn GraphicsReadback>) {
        if self.is_capturing() {
            tracing::warn!(target: "recorder", "[SESSION] Readback change ignored while capturing");
            return;
        }
        let config = self.ctx.config();
        self.store = Some(FrameStore::new(
            readback,
            config.width,
            config.height,
            config.triple_buffering,
        ));
    }

    /// Sets the output base name. Suffixes are appended per file, so
    /// `clips/run` produces `clips/run.mkv`. Ignored while a session is active.
    pub fn set_output_name(&mut self, base: impl AsRef<Path>) {
        if self.is_capturing() {
            tracing::warn!(target: "recorder", "[SESSION] Output name change ignored while capturing");
            return;
        }
        self.output_base = base.as_ref().to_path_buf();
    }

    pub fn output_name(&self) -> &Path {
        &self.output_base
    }

    /// True from [`Recorder::start`] until the stopped session has been muxed.
    pub fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Starts a session. Does nothing without a readback or while capturing.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        if self.is_capturing() {
            tracing::debug!(target: "recorder", "[SESSION] Start ignored, already capturing");
            return Ok(());
        }
        let Some(store) = self.store.as_mut() else {
            tracing::warn!(target: "recorder", "[SESSION] Start ignored, no readback registered");
            return Ok(());
        };
        store.reset();
        self.pacing.reset();
        self.last_capture = None;
        self.stopping = false;

        let config = self.ctx.config();
        let paths = SessionPaths::new(&self.output_base);
        if let Some(dir) = paths.base.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            ensure_dir(dir).map_err(RecorderError::OutputDir)?;
        }

        let video_format = self.ctx.resolve_video_format();
        let encoder = self.ctx.build_video_encoder(video_format)?;
        let video = spawn_video_writer(Arc::clone(&self.ctx), encoder, paths.video.clone())?;

        let audio_format = self.ctx.resolve_audio_format();
        let audio = if config.record_audio {
            match self.ctx.audio_backend() {
                Some(backend) => {
                    match spawn_audio_capture(
                        Arc::clone(&self.ctx),
                        backend,
                        audio_format,
                        paths.audio.clone(),
                    ) {
                        Ok(session) => Some(session),
                        Err(e) => {
                            tracing::error!(target: "recorder", "[AUDIO] {}", e);
                            self.ctx.emit(RecorderEvent::Error(e.to_string()));
                            None
                        }
                    }
                }
                None => {
                    tracing::warn!(target: "recorder", "[AUDIO] No audio backend, recording video only");
                    self.ctx.emit(RecorderEvent::Error(
                        "No audio backend available, recording video only".to_string(),
                    ));
                    None
                }
            }
        } else {
            None
        };

        let session = ActiveSession {
            video,
            audio,
            mux: MuxRequest {
                paths,
                video_format,
                audio_format,
                width: config.width,
                height: config.height,
                fps: config.record_fps,
            },
        };
        if self.sessions.send(session).is_err() {
            return Err(RecorderError::ThreadPanicked("conversion"));
        }

        self.capturing.store(true, Ordering::SeqCst);
        tracing::info!(target: "recorder", "[SESSION] Started {:?}", self.output_base);
        self.ctx.emit(RecorderEvent::Started);
        Ok(())
    }

    /// Render-thread hook, call once per rendered frame.
    pub fn capture(&mut self) {
        let now = Instant::now();
        let elapsed = self
            .last_capture
            .map(|last| now.duration_since(last))
            .unwrap_or(Duration::ZERO);
        self.last_capture = Some(now);
        self.capture_after(elapsed);
    }

    /// [`Recorder::capture`] with an explicit time since the previous call.
    pub fn capture_after(&mut self, elapsed: Duration) {
        if !self.is_capturing() || self.stopping {
            return;
        }
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let due = self.pacing.accumulate(elapsed.as_secs_f64());
        store.capture(due, &self.exchange);
    }

    /// Ends the session. Encoding and muxing finish in the background and are
    /// reported with [`RecorderEvent::Saved`] or [`RecorderEvent::Error`].
    pub fn stop(&mut self) {
        if !self.is_capturing() || self.stopping {
            return;
        }
        self.stopping = true;
        tracing::info!(target: "recorder", "[SESSION] Stop requested");
        self.exchange.signal(FrameEvent::StopRequested);
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        {
            let mut shared = self.exchange.lock();
            shared.shutdown = true;
            let event = if self.capturing.load(Ordering::SeqCst) {
                tracing::info!(target: "recorder", "[SESSION] Dropped while capturing, finishing session");
                self.ctx.mute();
                FrameEvent::StopRequested
            } else {
                FrameEvent::AbortRequested
            };
            shared.pending = shared.pending.apply(event);
        }
        self.exchange.notify();

        if let Some(handle) = self.conversion.take() {
            if handle.join().is_err() {
                tracing::error!(target: "recorder", "[SESSION] Conversion thread panicked");
            }
        }
    }
}
