//! Matroska/WebM output on top of `webm-iterable`: one video track, an
//! optional audio track, SimpleBlocks grouped into clusters.

use std::io::Write;

use webm_iterable::matroska_spec::{Master, MatroskaSpec};
use webm_iterable::WebmWriter;

use crate::errors::MuxError;

/// One tick of the segment timeline, in nanoseconds (1 ms).
const TIMESTAMP_SCALE_NS: i64 = 1_000_000;
const MAX_CLUSTER_BYTES: usize = 4 * 1024 * 1024;
const APP_NAME: &str = concat!("glrecorder ", env!("CARGO_PKG_VERSION"));

pub const VIDEO_TRACK: u64 = 1;
pub const AUDIO_TRACK: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Matroska,
    WebM,
}

impl DocType {
    fn as_str(&self) -> &'static str {
        match self {
            DocType::Matroska => "matroska",
            DocType::WebM => "webm",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoTrack {
    pub codec_id: &'static str,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec_private: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AudioTrack {
    pub codec_id: &'static str,
    pub sample_rate: u32,
    pub channels: u32,
    pub bit_depth: Option<u32>,
    pub codec_private: Vec<u8>,
}

/// Blocks collected for the cluster being built.
struct PendingCluster {
    timestamp_ms: i64,
    blocks: Vec<MatroskaSpec>,
    bytes: usize,
}

impl PendingCluster {
    fn new(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            blocks: Vec::new(),
            bytes: 0,
        }
    }

    /// Block offset inside this cluster, `None` when a new cluster is needed.
    fn offset(&self, timestamp_ms: i64) -> Option<i16> {
        if self.bytes > MAX_CLUSTER_BYTES {
            return None;
        }
        i16::try_from(timestamp_ms - self.timestamp_ms)
            .ok()
            .filter(|relative| *relative >= 0)
    }
}

/// Streams a segment of unknown size. Header, info and tracks go out first,
/// so the duration must be known up front.
pub struct MatroskaWriter<W: Write> {
    writer: WebmWriter<W>,
    cluster: Option<PendingCluster>,
}

impl<W: Write> MatroskaWriter<W> {
    pub fn new(
        out: W,
        doc_type: DocType,
        video: &VideoTrack,
        audio: Option<&AudioTrack>,
        duration_ns: i64,
    ) -> Result<Self, MuxError> {
        let mut writer = WebmWriter::new(out);

        writer
            .write(&MatroskaSpec::Ebml(Master::Full(vec![
                MatroskaSpec::DocType(doc_type.as_str().to_string()),
                MatroskaSpec::DocTypeVersion(2),
                MatroskaSpec::DocTypeReadVersion(2),
            ])))
            .map_err(container_error)?;
        writer
            .write_unknown_size(&MatroskaSpec::Segment(Master::Start))
            .map_err(container_error)?;
        writer
            .write(&MatroskaSpec::Info(Master::Full(vec![
                MatroskaSpec::TimestampScale(TIMESTAMP_SCALE_NS as u64),
                MatroskaSpec::Duration(duration_ns.max(0) as f64 / TIMESTAMP_SCALE_NS as f64),
                MatroskaSpec::MuxingApp(APP_NAME.to_string()),
                MatroskaSpec::WritingApp(APP_NAME.to_string()),
            ])))
            .map_err(container_error)?;

        let mut entries = vec![video_entry(video)];
        entries.extend(audio.map(audio_entry));
        writer
            .write(&MatroskaSpec::Tracks(Master::Full(entries)))
            .map_err(container_error)?;

        Ok(Self {
            writer,
            cluster: None,
        })
    }

    /// Queues one frame. Timestamps below zero are written as zero.
    pub fn write_frame(
        &mut self,
        track: u64,
        timestamp_ns: i64,
        is_key: bool,
        data: &[u8],
    ) -> Result<(), MuxError> {
        let timestamp_ms = timestamp_ns.max(0) / TIMESTAMP_SCALE_NS;
        let fits = self
            .cluster
            .as_ref()
            .and_then(|cluster| cluster.offset(timestamp_ms));
        if fits.is_none() {
            self.flush_cluster()?;
        }
        let cluster = self
            .cluster
            .get_or_insert_with(|| PendingCluster::new(timestamp_ms));
        let relative = fits.unwrap_or(0);

        let mut block = Vec::with_capacity(data.len() + 4);
        block.push(0x80 | track as u8);
        block.extend_from_slice(&relative.to_be_bytes());
        block.push(if is_key { 0x80 } else { 0x00 });
        block.extend_from_slice(data);

        cluster.bytes += block.len();
        cluster.blocks.push(MatroskaSpec::SimpleBlock(block));
        Ok(())
    }

    /// Writes the last cluster and closes the segment.
    pub fn finish(mut self) -> Result<(), MuxError> {
        self.flush_cluster()?;
        self.writer
            .write(&MatroskaSpec::Segment(Master::End))
            .map_err(container_error)?;
        self.writer.flush().map_err(container_error)
    }

    fn flush_cluster(&mut self) -> Result<(), MuxError> {
        let Some(cluster) = self.cluster.take() else {
            return Ok(());
        };
        let mut children = Vec::with_capacity(cluster.blocks.len() + 1);
        children.push(MatroskaSpec::Timestamp(cluster.timestamp_ms as u64));
        children.extend(cluster.blocks);
        self.writer
            .write(&MatroskaSpec::Cluster(Master::Full(children)))
            .map_err(container_error)
    }
}

fn container_error(e: impl std::fmt::Display) -> MuxError {
    MuxError::Container(e.to_string())
}

fn video_entry(video: &VideoTrack) -> MatroskaSpec {
    let mut entry = vec![
        MatroskaSpec::TrackNumber(VIDEO_TRACK),
        MatroskaSpec::TrackUID(VIDEO_TRACK),
        MatroskaSpec::TrackType(1),
        MatroskaSpec::FlagLacing(0),
        MatroskaSpec::DefaultDuration(1_000_000_000 / u64::from(video.fps.max(1))),
        MatroskaSpec::CodecID(video.codec_id.to_string()),
    ];
    if !video.codec_private.is_empty() {
        entry.push(MatroskaSpec::CodecPrivate(video.codec_private.clone()));
    }
    entry.push(MatroskaSpec::Video(Master::Full(vec![
        MatroskaSpec::PixelWidth(u64::from(video.width)),
        MatroskaSpec::PixelHeight(u64::from(video.height)),
    ])));
    MatroskaSpec::TrackEntry(Master::Full(entry))
}

fn audio_entry(audio: &AudioTrack) -> MatroskaSpec {
    let mut entry = vec![
        MatroskaSpec::TrackNumber(AUDIO_TRACK),
        MatroskaSpec::TrackUID(AUDIO_TRACK),
        MatroskaSpec::TrackType(2),
        MatroskaSpec::FlagLacing(0),
        MatroskaSpec::CodecID(audio.codec_id.to_string()),
    ];
    if !audio.codec_private.is_empty() {
        entry.push(MatroskaSpec::CodecPrivate(audio.codec_private.clone()));
    }
    let mut settings = vec![
        MatroskaSpec::SamplingFrequency(f64::from(audio.sample_rate)),
        MatroskaSpec::Channels(u64::from(audio.channels)),
    ];
    if let Some(bits) = audio.bit_depth {
        settings.push(MatroskaSpec::BitDepth(u64::from(bits)));
    }
    entry.push(MatroskaSpec::Audio(Master::Full(settings)));
    MatroskaSpec::TrackEntry(Master::Full(entry))
}
