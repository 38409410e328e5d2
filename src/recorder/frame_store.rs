//! Render-thread side of the capture: readback slots and the shared raw frame.

use std::sync::{Condvar, Mutex, MutexGuard};

use super::state::{FrameEvent, PendingFrame};

/// Number of rotating staging buffers with triple buffering.
pub const STAGING_SLOTS: usize = 3;

/// Opaque handle to a GPU-side staging buffer, owned by the readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingBuffer(pub u32);

/// Pixel readback primitives of the host's graphics API.
///
/// All pixel data is RGBA8 with the bottom scanline first. Only called from
/// the thread that drives [`crate::Recorder::capture`].
pub trait GraphicsReadback {
    /// Synchronously reads the current surface into `dst`.
    fn read_pixels(&mut self, width: u32, height: u32, dst: &mut [u8]);

    /// Allocates `count` staging buffers of `size` bytes.
    /// `None` means asynchronous readback is unsupported.
    fn create_staging_buffers(&mut self, _count: usize, _size: usize) -> Option<Vec<StagingBuffer>> {
        None
    }

    /// Starts an asynchronous readback of the surface into `buffer`.
    fn begin_readback(&mut self, _buffer: StagingBuffer, _width: u32, _height: u32) {}

    /// Maps `buffer` and copies its finished readback into `dst`.
    fn copy_staging(&mut self, _buffer: StagingBuffer, _dst: &mut [u8]) -> bool {
        false
    }

    fn delete_staging_buffers(&mut self, _buffers: &[StagingBuffer]) {}
}

/// State shared between the render thread and the conversion stage.
pub(crate) struct SharedFrame {
    pub raw: Vec<u8>,
    pub pending: PendingFrame,
    /// Set once the recorder is being dropped.
    pub shutdown: bool,
}

/// The raw frame plus its pending signal, guarded by one lock.
pub(crate) struct FrameExchange {
    shared: Mutex<SharedFrame>,
    ready: Condvar,
}

impl FrameExchange {
    pub fn new(frame_bytes: usize) -> Self {
        Self {
            shared: Mutex::new(SharedFrame {
                raw: vec![0u8; frame_bytes],
                pending: PendingFrame::Idle,
                shutdown: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SharedFrame> {
        self.shared.lock().expect("frame exchange mutex poisoned")
    }

    pub fn notify(&self) {
        self.ready.notify_one();
    }

    pub fn signal(&self, event: FrameEvent) {
        let mut shared = self.lock();
        shared.pending = shared.pending.apply(event);
        drop(shared);
        self.notify();
    }

    /// Blocks until the pending signal asks for work.
    pub fn wait_for_work(&self) -> MutexGuard<'_, SharedFrame> {
        self.ready
            .wait_while(self.lock(), |shared| !shared.pending.is_signalled())
            .expect("frame exchange mutex poisoned")
    }

    /// Hands a frame worth `repeat_count` output frames to the conversion stage.
    ///
    /// `fill` copies pixels into the raw frame and runs only when no frame is
    /// pending. A still pending frame absorbs the repeat count instead.
    pub fn publish(&self, repeat_count: u32, fill: impl FnOnce(&mut [u8]) -> bool) -> bool {
        if repeat_count == 0 {
            return false;
        }
        let mut shared = self.lock();
        match shared.pending {
            PendingFrame::Idle => {
                if !fill(&mut shared.raw) {
                    return false;
                }
            }
            PendingFrame::FrameReady { .. } => {}
            PendingFrame::Draining | PendingFrame::Aborting => return false,
        }
        shared.pending = shared.pending.apply(FrameEvent::Published { repeat_count });
        drop(shared);
        self.notify();
        true
    }
}

/// Rotating readback targets owned by the render thread.
pub struct FrameStore {
    readback: Box<dyn GraphicsReadback>,
    width: u32,
    height: u32,
    slots: Vec<StagingBuffer>,
    rotation: usize,
    carried: u32,
}

impl FrameStore {
    pub fn new(
        mut readback: Box<dyn GraphicsReadback>,
        width: u32,
        height: u32,
        triple_buffering: bool,
    ) -> Self {
        let mut slots = Vec::new();
        if triple_buffering {
            let size = width as usize * height as usize * 4;
            match readback.create_staging_buffers(STAGING_SLOTS, size) {
                Some(buffers) if buffers.len() == STAGING_SLOTS => slots = buffers,
                Some(buffers) => {
                    tracing::warn!(
                        target: "recorder",
                        "[SESSION] Got {} staging buffers, expected {}, using synchronous readback",
                        buffers.len(),
                        STAGING_SLOTS
                    );
                    readback.delete_staging_buffers(&buffers);
                }
                None => {
                    tracing::warn!(target: "recorder", "[SESSION] Staging buffers unsupported, using synchronous readback");
                }
            }
        }
        Self {
            readback,
            width,
            height,
            slots,
            rotation: 0,
            carried: 0,
        }
    }

    pub fn is_buffered(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Forgets outstanding readbacks. Called at session start.
    pub fn reset(&mut self) {
        self.rotation = 0;
        self.carried = 0;
    }

    /// One render-thread capture step. `due` is the number of output frames the
    /// pacing reported for this call. Returns the repeat count handed over, if any.
    pub(crate) fn capture(&mut self, due: u32, exchange: &FrameExchange) -> Option<u32> {
        let repeat_count = self.carried.saturating_add(due);
        let (width, height) = (self.width, self.height);

        if self.slots.is_empty() {
            self.carried = 0;
            let readback = &mut self.readback;
            let published = exchange.publish(repeat_count, |dst| {
                readback.read_pixels(width, height, dst);
                true
            });
            return published.then_some(repeat_count);
        }

        let slot = self.slots[self.rotation % STAGING_SLOTS];
        let mut published = None;
        if self.rotation >= STAGING_SLOTS {
            self.carried = 0;
            let readback = &mut self.readback;
            if exchange.publish(repeat_count, |dst| readback.copy_staging(slot, dst)) {
                published = Some(repeat_count);
            } else if repeat_count > 0 {
                tracing::debug!(target: "recorder", "[SESSION] Dropped readback worth {} frames", repeat_count);
            }
        } else {
            // Warm-up: nothing readable yet, keep the time for the first frame.
            self.carried = repeat_count;
        }

        self.readback.begin_readback(slot, width, height);
        self.rotation += 1;
        if self.rotation >= 2 * STAGING_SLOTS {
            self.rotation -= STAGING_SLOTS;
        }
        published
    }
}

impl Drop for FrameStore {
    fn drop(&mut self) {
        if !self.slots.is_empty() {
            self.readback.delete_staging_buffers(&self.slots);
        }
    }
}
