//! Per-recorder context shared by every pipeline stage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::{
    self, AudioBackend, AudioBackendFactory, AudioEncoder, AudioEncoderFactory, AudioStreamFormat,
    PcmEncoder,
};
use crate::config::{AudioFormat, RecorderConfig, VideoFormat};
use crate::errors::{AudioError, EncodingError};
use crate::events::{RecorderEvent, RecorderEvents};
use crate::video::{JpegCodec, MjpegEncoder, PictureCodec, VideoEncoder, VideoEncoderFactory};

/// Frozen configuration, event sink and codec registry of one [`crate::Recorder`].
pub struct SessionContext {
    config: RecorderConfig,
    events: Box<dyn RecorderEvents>,
    muted: AtomicBool,
    video_encoders: HashMap<VideoFormat, VideoEncoderFactory>,
    audio_encoders: HashMap<AudioFormat, AudioEncoderFactory>,
    audio_backend: Option<AudioBackendFactory>,
}

impl SessionContext {
    /// Validates `config` and registers the built-in MJPEG and PCM encoders.
    /// An invalid config is replaced by defaults and reported as an error event.
    pub fn new(config: RecorderConfig, events: impl RecorderEvents + 'static) -> Self {
        let (config, error) = config.validated();
        if let Some(e) = error {
            events.on_event(RecorderEvent::Error(format!(
                "Invalid recorder config, using defaults: {}",
                e
            )));
        }

        let mut video_encoders: HashMap<VideoFormat, VideoEncoderFactory> = HashMap::new();
        video_encoders.insert(
            VideoFormat::Mjpeg,
            Box::new(
                |_config: &RecorderConfig| -> Result<Box<dyn VideoEncoder>, EncodingError> {
                    Ok(Box::new(MjpegEncoder::new()))
                },
            ),
        );
        let mut audio_encoders: HashMap<AudioFormat, AudioEncoderFactory> = HashMap::new();
        audio_encoders.insert(
            AudioFormat::Pcm,
            Box::new(
                |format: &AudioStreamFormat,
                 _bitrate: u32|
                 -> Result<Box<dyn AudioEncoder>, EncodingError> {
                    Ok(Box::new(PcmEncoder::new(format)))
                },
            ),
        );

        Self {
            config,
            events: Box::new(events),
            muted: AtomicBool::new(false),
            video_encoders,
            audio_encoders,
            audio_backend: audio::default_backend_factory(),
        }
    }

    pub fn with_video_encoder<F>(mut self, format: VideoFormat, factory: F) -> Self
    where
        F: Fn(&RecorderConfig) -> Result<Box<dyn VideoEncoder>, EncodingError> + Send + Sync + 'static,
    {
        self.video_encoders.insert(format, Box::new(factory));
        self
    }

    pub fn with_audio_encoder<F>(mut self, format: AudioFormat, factory: F) -> Self
    where
        F: Fn(&AudioStreamFormat, u32) -> Result<Box<dyn AudioEncoder>, EncodingError>
            + Send
            + Sync
            + 'static,
    {
        self.audio_encoders.insert(format, Box::new(factory));
        self
    }

    /// Replaces the platform audio backend. The factory runs on the capture thread.
    pub fn with_audio_backend<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn AudioBackend>, AudioError> + Send + Sync + 'static,
    {
        self.audio_backend = Some(Arc::new(factory));
        self
    }

    pub fn without_audio_backend(mut self) -> Self {
        self.audio_backend = None;
        self
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Forwards an event to the host unless the recorder is tearing down.
    pub fn emit(&self, event: RecorderEvent) {
        if self.muted.load(Ordering::SeqCst) {
            tracing::debug!(target: "recorder", "[SESSION] Muted event: {:?}", event);
            return;
        }
        self.events.on_event(event);
    }

    pub(crate) fn mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    /// Configured video format, or MJPEG when no encoder is registered for it.
    pub(crate) fn resolve_video_format(&self) -> VideoFormat {
        let wanted = self.config.video_format;
        if self.video_encoders.contains_key(&wanted) {
            return wanted;
        }
        tracing::warn!(target: "recorder", "[SESSION] No encoder for {:?}, falling back to MJPEG", wanted);
        self.emit(RecorderEvent::Error(format!(
            "Unsupported video format {:?}, falling back to MJPEG",
            wanted
        )));
        VideoFormat::Mjpeg
    }

    /// Configured audio format, or PCM when no encoder is registered for it.
    pub(crate) fn resolve_audio_format(&self) -> AudioFormat {
        let wanted = self.config.audio_format;
        if self.audio_encoders.contains_key(&wanted) {
            return wanted;
        }
        tracing::warn!(target: "recorder", "[SESSION] No encoder for {:?}, falling back to PCM", wanted);
        self.emit(RecorderEvent::Error(format!(
            "Unsupported audio format {:?}, falling back to PCM",
            wanted
        )));
        AudioFormat::Pcm
    }

    pub(crate) fn build_video_encoder(
        &self,
        format: VideoFormat,
    ) -> Result<Box<dyn VideoEncoder>, EncodingError> {
        let factory = self
            .video_encoders
            .get(&format)
            .ok_or_else(|| EncodingError::Unsupported(format!("{:?}", format)))?;
        factory(&self.config)
    }

    pub(crate) fn build_audio_encoder(
        &self,
        format: AudioFormat,
        stream: &AudioStreamFormat,
    ) -> Result<Box<dyn AudioEncoder>, EncodingError> {
        let factory = self
            .audio_encoders
            .get(&format)
            .ok_or_else(|| EncodingError::Unsupported(format!("{:?}", format)))?;
        factory(stream, self.config.audio_bitrate)
    }

    pub(crate) fn picture_codec(&self) -> Box<dyn PictureCodec> {
        Box::new(JpegCodec::new(self.config.jpeg_quality))
    }

    pub(crate) fn audio_backend(&self) -> Option<AudioBackendFactory> {
        self.audio_backend.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelEvents;

    #[test]
    fn test_invalid_config_reports_error_and_uses_defaults() {
        let (events, rx) = ChannelEvents::new();
        let config = RecorderConfig {
            width: 0,
            ..RecorderConfig::default()
        };
        let ctx = SessionContext::new(config, events);

        assert_eq!(ctx.config(), &RecorderConfig::default());
        assert!(matches!(rx.try_recv(), Ok(RecorderEvent::Error(_))));
    }

    #[test]
    fn test_unregistered_video_format_falls_back_to_mjpeg() {
        let (events, rx) = ChannelEvents::new();
        let config = RecorderConfig {
            video_format: VideoFormat::Vp9,
            ..RecorderConfig::default()
        };
        let ctx = SessionContext::new(config, events);

        assert_eq!(ctx.resolve_video_format(), VideoFormat::Mjpeg);
        assert!(matches!(rx.try_recv(), Ok(RecorderEvent::Error(_))));
        assert!(ctx.build_video_encoder(VideoFormat::Vp9).is_err());
    }

    #[test]
    fn test_registered_encoder_is_used() {
        let (events, rx) = ChannelEvents::new();
        let config = RecorderConfig {
            video_format: VideoFormat::Vp8,
            ..RecorderConfig::default()
        };
        let ctx = SessionContext::new(config, events).with_video_encoder(VideoFormat::Vp8, |_| {
            Ok(Box::new(MjpegEncoder::new()) as Box<dyn VideoEncoder>)
        });

        assert_eq!(ctx.resolve_video_format(), VideoFormat::Vp8);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_vorbis_without_encoder_falls_back_to_pcm() {
        let (events, _rx) = ChannelEvents::new();
        let config = RecorderConfig {
            audio_format: AudioFormat::Vorbis,
            ..RecorderConfig::default()
        };
        let ctx = SessionContext::new(config, events);
        assert_eq!(ctx.resolve_audio_format(), AudioFormat::Pcm);
    }

    #[test]
    fn test_muted_context_drops_events() {
        let (events, rx) = ChannelEvents::new();
        let ctx = SessionContext::new(RecorderConfig::default(), events);
        ctx.mute();
        ctx.emit(RecorderEvent::Started);
        assert!(rx.try_recv().is_err());
    }
}
