//! Notifications delivered to the host application.
//!
//! Events are raised from the pipeline threads, never from the render thread
//! except for [`RecorderEvent::Started`] and configuration fallbacks.

use crossbeam_channel::{Receiver, Sender};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// A capture session began.
    Started,
    /// The container was written to this path.
    Saved(PathBuf),
    /// A stage failed or fell back. The message is human readable.
    Error(String),
    /// Final-drain progress, 0 to 99.
    Progress(u8),
    /// A stop found a long picture backlog. Encoding will take a while.
    Waiting,
}

pub trait RecorderEvents: Send + Sync {
    fn on_event(&self, event: RecorderEvent);
}

/// Discards every event.
pub struct NoopEvents;

impl RecorderEvents for NoopEvents {
    fn on_event(&self, _event: RecorderEvent) {}
}

/// Forwards events into a channel the host can poll.
pub struct ChannelEvents {
    tx: Sender<RecorderEvent>,
}

impl ChannelEvents {
    pub fn new() -> (Self, Receiver<RecorderEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl RecorderEvents for ChannelEvents {
    fn on_event(&self, event: RecorderEvent) {
        // Host dropped the receiver: nobody is listening.
        let _ = self.tx.send(event);
    }
}

impl<F> RecorderEvents for F
where
    F: Fn(RecorderEvent) + Send + Sync,
{
    fn on_event(&self, event: RecorderEvent) {
        self(event)
    }
}
