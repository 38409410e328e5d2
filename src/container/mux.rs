//! Merges the intermediate video and audio files into the output container.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::matroska::{AudioTrack, DocType, MatroskaWriter, VideoTrack, AUDIO_TRACK, VIDEO_TRACK};
use super::stream_file::{frame_size_limit, AudioFrame, AudioStreamReader, VideoStreamReader};
use crate::config::{AudioFormat, VideoFormat};
use crate::errors::MuxError;
use crate::recorder::writer::WriterGuard;
use crate::shared::paths::SessionPaths;

/// Everything the muxer needs to know about a finished session.
#[derive(Debug, Clone)]
pub struct MuxRequest {
    pub paths: SessionPaths,
    pub video_format: VideoFormat,
    pub audio_format: AudioFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Presentation time of a video frame index.
pub fn video_timestamp_ns(frame_index: i64, fps: u32) -> i64 {
    frame_index.saturating_mul(1_000_000_000) / i64::from(fps.max(1))
}

/// Frame counts and end time of one interleaved pass.
#[derive(Debug, Default, Clone, Copy)]
struct Timeline {
    video_frames: u64,
    audio_frames: u64,
    /// Video frames whose index went back in time.
    clamped: u64,
    end_ns: i64,
}

type FileVideo = VideoStreamReader<BufReader<File>>;
type FileAudio = AudioStreamReader<BufReader<File>>;

/// Writes the container and returns its path.
///
/// The audio file is optional: when it does not exist the output is video-only.
/// Intermediate files are left in place, see [`remove_intermediates`].
pub fn mux_session(request: &MuxRequest) -> Result<PathBuf, MuxError> {
    let paths = &request.paths;
    if !paths.video.exists() {
        return Err(MuxError::MissingVideo(paths.video.display().to_string()));
    }

    let (video, audio) = open_streams(request)?;
    let audio_track = audio.as_ref().map(|reader| AudioTrack {
        codec_id: request.audio_format.codec_id(),
        sample_rate: reader.header().sample_rate,
        channels: reader.header().channels,
        bit_depth: match request.audio_format {
            AudioFormat::Pcm => Some(16),
            AudioFormat::Vorbis => None,
        },
        codec_private: reader.codec_private().to_vec(),
    });
    let video_track = VideoTrack {
        codec_id: request.video_format.codec_id(),
        width: request.width,
        height: request.height,
        fps: request.fps,
        codec_private: video.codec_private().to_vec(),
    };
    let doc_type = if request.video_format.is_webm() {
        DocType::WebM
    } else {
        DocType::Matroska
    };

    // Dry run for the duration, which precedes the clusters.
    let planned = interleave(video, audio, request.fps, &mut |_, _, _, _| Ok(()))?;

    let output = paths.container(request.video_format.container_extension());
    tracing::info!(target: "recorder", "[MUX] Writing {:?}", output);

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&output)?;
    let mut guard = WriterGuard::new(output.clone());
    let mut out = BufWriter::new(file);
    let mut writer = MatroskaWriter::new(
        &mut out,
        doc_type,
        &video_track,
        audio_track.as_ref(),
        planned.end_ns,
    )?;

    let (video, audio) = open_streams(request)?;
    let timeline = interleave(video, audio, request.fps, &mut |track, timestamp_ns, is_key, data| {
        writer.write_frame(track, timestamp_ns, is_key, data)
    })?;
    writer.finish()?;
    out.flush()?;
    guard.mark_completed();

    if timeline.clamped > 0 {
        tracing::warn!(
            target: "recorder",
            "[MUX] {} video frames went back in time, held at the previous timestamp",
            timeline.clamped
        );
    }
    tracing::info!(
        target: "recorder",
        "[MUX] Wrote {} video and {} audio frames, {:.2}s",
        timeline.video_frames,
        timeline.audio_frames,
        timeline.end_ns as f64 / 1e9
    );
    Ok(output)
}

fn open_streams(request: &MuxRequest) -> Result<(FileVideo, Option<FileAudio>), MuxError> {
    let limit = frame_size_limit(request.width, request.height);
    let video = VideoStreamReader::open(&request.paths.video, limit)?;
    let audio = if request.paths.audio.exists() {
        Some(AudioStreamReader::open(&request.paths.audio, limit)?)
    } else {
        None
    };
    Ok((video, audio))
}

/// Hands frames to `sink` in presentation order. Video drives the merge:
/// audio that starts before a video frame goes out first.
fn interleave<R: Read>(
    mut video: VideoStreamReader<R>,
    mut audio: Option<AudioStreamReader<R>>,
    fps: u32,
    sink: &mut dyn FnMut(u64, i64, bool, &[u8]) -> Result<(), MuxError>,
) -> Result<Timeline, MuxError> {
    let mut timeline = Timeline::default();
    let frame_period_ns = video_timestamp_ns(1, fps);
    let mut last_video_ns = 0i64;
    let mut next_audio: Option<AudioFrame> = match audio.as_mut() {
        Some(reader) => reader.next_frame()?,
        None => None,
    };

    while let Some(frame) = video.next_frame()? {
        let mut timestamp_ns = video_timestamp_ns(frame.frame_index, fps);
        if timestamp_ns < last_video_ns {
            timeline.clamped += 1;
            timestamp_ns = last_video_ns;
        }
        last_video_ns = timestamp_ns;

        while let Some(pending) = next_audio.take() {
            if pending.timestamp_ns >= timestamp_ns {
                next_audio = Some(pending);
                break;
            }
            sink(AUDIO_TRACK, pending.timestamp_ns, true, &pending.data)?;
            timeline.end_ns = timeline.end_ns.max(pending.timestamp_ns);
            timeline.audio_frames += 1;
            next_audio = match audio.as_mut() {
                Some(reader) => reader.next_frame()?,
                None => None,
            };
        }

        sink(VIDEO_TRACK, timestamp_ns, frame.is_key, &frame.data)?;
        timeline.end_ns = timeline.end_ns.max(timestamp_ns + frame_period_ns);
        timeline.video_frames += 1;
    }

    while let Some(pending) = next_audio.take() {
        sink(AUDIO_TRACK, pending.timestamp_ns, true, &pending.data)?;
        timeline.end_ns = timeline.end_ns.max(pending.timestamp_ns);
        timeline.audio_frames += 1;
        next_audio = match audio.as_mut() {
            Some(reader) => reader.next_frame()?,
            None => None,
        };
    }

    Ok(timeline)
}

/// Deletes the per-stage files. Returns a message for every file that could not be removed.
pub fn remove_intermediates(paths: &SessionPaths) -> Vec<String> {
    [&paths.audio, &paths.video]
        .into_iter()
        .filter_map(|path| remove_intermediate(path))
        .collect()
}

/// Deletes one per-stage file if it exists.
pub fn remove_intermediate(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    match std::fs::remove_file(path) {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(target: "recorder", "[MUX] Failed to remove {:?}: {}", path, e);
            Some(format!("Failed to remove {}: {}", path.display(), e))
        }
    }
}
