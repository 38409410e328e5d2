//! Default-sink loopback capture through PipeWire.

use std::time::Duration;

use pipewire as pw;
use pw::spa::param::audio::{AudioFormat, AudioInfoRaw};
use pw::spa::param::ParamType;
use pw::spa::pod::serialize::PodSerializer;
use pw::spa::pod::Pod;
use pw::spa::utils::{Direction, SpaTypes};
use pw::stream::StreamFlags;

use super::{AudioBackend, AudioStreamFormat, CaptureBuffer, SampleType};
use crate::errors::AudioError;

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u32 = 2;
const PUMP_TIMEOUT: Duration = Duration::from_millis(10);

/// Captures the monitor of the default output as 48 kHz stereo F32LE.
///
/// PipeWire objects are not `Send`; build this on the thread that pumps it.
pub struct PipeWireLoopback {
    mainloop: pw::main_loop::MainLoop,
    _context: pw::context::Context,
    _core: pw::core::Core,
    _stream: pw::stream::Stream,
    _listener: pw::stream::StreamListener<()>,
    pending: CaptureBuffer,
    scratch: Vec<u8>,
}

impl PipeWireLoopback {
    /// True when a PipeWire daemon accepts connections.
    pub fn probe() -> bool {
        pw::init();
        let Ok(mainloop) = pw::main_loop::MainLoop::new(None) else {
            return false;
        };
        let Ok(context) = pw::context::Context::new(&mainloop) else {
            return false;
        };
        context.connect(None).is_ok()
    }

    pub fn connect() -> Result<Self, AudioError> {
        pw::init();

        let mainloop = pw::main_loop::MainLoop::new(None).map_err(|e| {
            tracing::error!(target: "recorder", "[AUDIO] Failed to create main loop: {}", e);
            AudioError::Unavailable(format!("Failed to create main loop: {}", e))
        })?;
        let context = pw::context::Context::new(&mainloop)
            .map_err(|e| AudioError::Unavailable(format!("Failed to create context: {}", e)))?;
        let core = context
            .connect(None)
            .map_err(|e| AudioError::Unavailable(format!("Failed to connect: {}", e)))?;

        let stream = pw::stream::Stream::new(
            &core,
            "glrecorder-audio",
            pw::properties::properties! {
                *pw::keys::MEDIA_TYPE => "Audio",
                *pw::keys::MEDIA_CATEGORY => "Capture",
                *pw::keys::MEDIA_ROLE => "Music",
                *pw::keys::STREAM_CAPTURE_SINK => "true",
            },
        )
        .map_err(|e| AudioError::StreamFailed(format!("Failed to create stream: {}", e)))?;

        let pending = CaptureBuffer::new();
        let pending_process = pending.clone();

        let listener = stream
            .add_local_listener_with_user_data(())
            .param_changed(|_stream, _user_data, id, param| {
                let Some(param) = param else { return };
                if id != ParamType::Format.as_raw() {
                    return;
                }
                let mut info = AudioInfoRaw::new();
                if info.parse(param).is_ok() {
                    tracing::info!(
                        target: "recorder",
                        "[AUDIO] Stream format: rate={}, channels={}, {:?}",
                        info.rate(),
                        info.channels(),
                        info.format()
                    );
                }
            })
            .process(move |stream, _user_data| {
                let Some(mut buffer) = stream.dequeue_buffer() else {
                    return;
                };
                let datas = buffer.datas_mut();
                if datas.is_empty() {
                    return;
                }
                let data = &mut datas[0];
                let chunk = data.chunk();
                let offset = chunk.offset() as usize;
                let size = chunk.size() as usize;
                if size == 0 {
                    return;
                }
                let Some(slice) = data.data() else {
                    return;
                };
                if offset + size > slice.len() {
                    tracing::warn!(target: "recorder", "[AUDIO] Invalid chunk bounds: offset={}, size={}, len={}",
                        offset, size, slice.len());
                    return;
                }
                pending_process.append(&slice[offset..offset + size]);
            })
            .register()
            .map_err(|e| AudioError::StreamFailed(format!("Failed to register listener: {}", e)))?;

        let mut info = AudioInfoRaw::new();
        info.set_format(AudioFormat::F32LE);
        info.set_rate(SAMPLE_RATE);
        info.set_channels(CHANNELS);
        let obj = pw::spa::pod::Object {
            type_: SpaTypes::ObjectParamFormat.as_raw(),
            id: ParamType::EnumFormat.as_raw(),
            properties: info.into(),
        };
        let values: Vec<u8> = PodSerializer::serialize(
            std::io::Cursor::new(Vec::new()),
            &pw::spa::pod::Value::Object(obj),
        )
        .map_err(|e| AudioError::StreamFailed(format!("Failed to serialize format pod: {:?}", e)))?
        .0
        .into_inner();
        let pod = Pod::from_bytes(&values)
            .ok_or_else(|| AudioError::StreamFailed("Invalid format pod".to_string()))?;
        let mut params = [pod];

        stream
            .connect(
                Direction::Input,
                None,
                // Without RT_PROCESS the process callback runs inside `iterate`.
                StreamFlags::AUTOCONNECT | StreamFlags::MAP_BUFFERS,
                &mut params,
            )
            .map_err(|e| AudioError::StreamFailed(format!("Failed to connect stream: {}", e)))?;

        tracing::info!(target: "recorder", "[AUDIO] PipeWire loopback connected");

        Ok(Self {
            mainloop,
            _context: context,
            _core: core,
            _stream: stream,
            _listener: listener,
            pending,
            scratch: Vec::new(),
        })
    }
}

impl AudioBackend for PipeWireLoopback {
    fn format(&mut self) -> Result<AudioStreamFormat, AudioError> {
        Ok(AudioStreamFormat {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            sample_type: SampleType::F32,
        })
    }

    fn pump(&mut self, sink: &mut dyn FnMut(&[u8])) -> Result<(), AudioError> {
        let result = self.mainloop.loop_().iterate(PUMP_TIMEOUT);
        if result < 0 {
            return Err(AudioError::StreamFailed(format!(
                "Main loop iteration failed: {}",
                result
            )));
        }
        self.pending.take_into(&mut self.scratch);
        if !self.scratch.is_empty() {
            sink(&self.scratch);
        }
        Ok(())
    }
}
