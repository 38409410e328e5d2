//! Conversion stage: flips and compresses raw frames, and closes sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;

use super::context::SessionContext;
use super::frame_store::FrameExchange;
use super::state::{FrameEvent, PendingFrame};
use super::writer::{EncodedPicture, PictureMessage, VideoSession};
use crate::audio::AudioSession;
use crate::container::{mux_session, remove_intermediate, remove_intermediates, MuxRequest};
use crate::errors::RecorderError;
use crate::events::RecorderEvent;
use crate::video::picture::flip_vertical;

/// Backlog above which a stop reports [`RecorderEvent::Waiting`].
pub const WAIT_NOTIFY_THRESHOLD: usize = 100;

/// Stages of one capture session, handed over at start.
pub(crate) struct ActiveSession {
    pub video: VideoSession,
    pub audio: Option<AudioSession>,
    pub mux: MuxRequest,
}

pub(crate) fn spawn_conversion(
    ctx: Arc<SessionContext>,
    exchange: Arc<FrameExchange>,
    capturing: Arc<AtomicBool>,
    sessions: Receiver<ActiveSession>,
) -> Result<JoinHandle<()>, RecorderError> {
    std::thread::Builder::new()
        .name("glr-convert".to_string())
        .spawn(move || run_conversion(&ctx, &exchange, &capturing, &sessions))
        .map_err(|e| RecorderError::ThreadSpawn("conversion", e.to_string()))
}

fn run_conversion(
    ctx: &SessionContext,
    exchange: &FrameExchange,
    capturing: &AtomicBool,
    sessions: &Receiver<ActiveSession>,
) {
    let (width, height) = (ctx.config().width, ctx.config().height);
    let pitch = width as usize * 4;
    let mut codec = ctx.picture_codec();
    let mut frame = vec![0u8; ctx.config().frame_bytes()];
    let mut scratch = Vec::new();
    let mut session: Option<ActiveSession> = None;

    tracing::info!(target: "recorder", "[CONVERT] Thread started ({}x{})", width, height);

    loop {
        let mut shared = exchange.wait_for_work();
        if let Ok(next) = sessions.try_recv() {
            session = Some(next);
        }

        match shared.pending {
            PendingFrame::FrameReady { repeat_count } => {
                std::mem::swap(&mut shared.raw, &mut frame);
                shared.pending = shared.pending.apply(FrameEvent::Consumed);
                drop(shared);

                let Some(active) = session.as_ref() else {
                    tracing::warn!(target: "recorder", "[CONVERT] Frame without a session, dropping");
                    continue;
                };
                flip_vertical(&mut frame, pitch, height as usize, &mut scratch);
                match codec.compress(&frame, width, height) {
                    Ok(data) => {
                        let picture = EncodedPicture { data, repeat_count };
                        if active.video.pictures.send(PictureMessage::Picture(picture)).is_err() {
                            tracing::warn!(target: "recorder", "[CONVERT] Video stage gone, dropping picture");
                        }
                    }
                    Err(e) => {
                        tracing::error!(target: "recorder", "[CONVERT] {}", e);
                        ctx.emit(RecorderEvent::Error(e.to_string()));
                    }
                }
            }
            PendingFrame::Draining => {
                drop(shared);
                match session.take() {
                    Some(active) => finish_session(ctx, active),
                    None => tracing::warn!(target: "recorder", "[CONVERT] Stop without a session"),
                }

                let mut shared = exchange.lock();
                capturing.store(false, Ordering::SeqCst);
                shared.pending = shared.pending.apply(FrameEvent::DrainFinished);
                if shared.shutdown {
                    break;
                }
            }
            PendingFrame::Aborting => break,
            PendingFrame::Idle => {}
        }
    }

    tracing::info!(target: "recorder", "[CONVERT] Thread exiting");
}

/// Stops audio, drains the picture queue, then muxes and cleans up.
fn finish_session(ctx: &SessionContext, session: ActiveSession) {
    let ActiveSession { video, audio, mux } = session;

    if let Some(audio) = audio {
        if let Err(e) = audio.stop_and_join() {
            tracing::error!(target: "recorder", "[SESSION] {}", e);
            ctx.emit(RecorderEvent::Error(e.to_string()));
        }
    }

    let backlog = video.pictures.len();
    if backlog > WAIT_NOTIFY_THRESHOLD {
        tracing::info!(target: "recorder", "[SESSION] {} pictures left to encode", backlog);
        ctx.emit(RecorderEvent::Waiting);
    }

    video.progress.store(true, Ordering::SeqCst);
    if video.pictures.send(PictureMessage::EndOfStream).is_err() {
        tracing::warn!(target: "recorder", "[SESSION] Video stage exited early");
    }
    let stats = match video.handle.join() {
        Ok(Ok(stats)) => stats,
        // Already reported by the video stage.
        Ok(Err(_)) => {
            discard_audio(ctx, &mux);
            return;
        }
        Err(_) => {
            let e = RecorderError::ThreadPanicked("video");
            tracing::error!(target: "recorder", "[SESSION] {}", e);
            ctx.emit(RecorderEvent::Error(e.to_string()));
            discard_audio(ctx, &mux);
            return;
        }
    };
    tracing::info!(target: "recorder", "[SESSION] Video done: {} frames", stats.frames);

    match mux_session(&mux) {
        Ok(path) => {
            for failure in remove_intermediates(&mux.paths) {
                ctx.emit(RecorderEvent::Error(failure));
            }
            tracing::info!(target: "recorder", "[SESSION] Saved {:?}", path);
            ctx.emit(RecorderEvent::Saved(path));
        }
        Err(e) => {
            tracing::error!(target: "recorder", "[MUX] {}", e);
            ctx.emit(RecorderEvent::Error(format!(
                "Failed to mux {}: {}",
                mux.paths.base.display(),
                e
            )));
        }
    }
}

/// Nothing can be muxed without video, so the audio intermediate goes too.
fn discard_audio(ctx: &SessionContext, mux: &MuxRequest) {
    tracing::warn!(target: "recorder", "[SESSION] Video failed, discarding {:?}", mux.paths.audio);
    if let Some(failure) = remove_intermediate(&mux.paths.audio) {
        ctx.emit(RecorderEvent::Error(failure));
    }
}
