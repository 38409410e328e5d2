//! Pending-frame signal shared by the render thread and the conversion stage.
//!
//! Implemented as a pure function `(PendingFrame, FrameEvent) -> PendingFrame`
//! so the hand-off rules can be tested without threads.

/// What the conversion stage should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingFrame {
    /// Nothing to do, keep waiting.
    #[default]
    Idle,

    /// The raw frame holds a readback representing `repeat_count` output frames.
    FrameReady { repeat_count: u32 },

    /// Stop requested: finish the session, then go back to waiting.
    Draining,

    /// Library teardown: exit the thread without touching the session.
    Aborting,
}

impl PendingFrame {
    /// True when the conversion stage has work.
    pub fn is_signalled(&self) -> bool {
        !matches!(self, PendingFrame::Idle)
    }

    pub fn apply(self, event: FrameEvent) -> PendingFrame {
        match (self, event) {
            (PendingFrame::Idle, FrameEvent::Published { repeat_count }) if repeat_count > 0 => {
                PendingFrame::FrameReady { repeat_count }
            }

            // Never overwrite a frame that has not been picked up. The newer readback
            // is dropped and its time is credited to the pending one.
            (
                PendingFrame::FrameReady { repeat_count },
                FrameEvent::Published {
                    repeat_count: extra,
                },
            ) => PendingFrame::FrameReady {
                repeat_count: repeat_count.saturating_add(extra),
            },

            (PendingFrame::FrameReady { .. }, FrameEvent::Consumed) => PendingFrame::Idle,

            (PendingFrame::Idle | PendingFrame::FrameReady { .. }, FrameEvent::StopRequested) => {
                PendingFrame::Draining
            }

            (PendingFrame::Draining, FrameEvent::DrainFinished) => PendingFrame::Idle,

            (_, FrameEvent::AbortRequested) => PendingFrame::Aborting,

            // Invalid transition: keep the current signal
            (state, _) => state,
        }
    }
}

/// Events that move the pending-frame signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// Render thread copied a frame into the shared buffer.
    Published { repeat_count: u32 },
    /// Conversion stage took the frame out of the shared buffer.
    Consumed,
    /// Host asked to stop the session.
    StopRequested,
    /// Conversion stage finished the drain/mux sequence.
    DrainFinished,
    /// Recorder is being destroyed while idle.
    AbortRequested,
}
