pub mod audio;
pub mod config;
pub mod container;
pub mod errors;
pub mod events;
pub mod logging;
pub mod recorder;
pub mod shared;
pub mod video;

pub use audio::{AudioBackend, AudioStreamFormat, SampleType};
pub use config::{load_config, AudioFormat, RecorderConfig, VideoFormat};
pub use errors::RecorderError;
pub use events::{ChannelEvents, NoopEvents, RecorderEvent, RecorderEvents};
pub use logging::{init_logging, LoggingGuards};
pub use recorder::{GraphicsReadback, Recorder, SessionContext, StagingBuffer};
