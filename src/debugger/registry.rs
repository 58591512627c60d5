use crate::debugger::frame::{FrameId, FrameRef};
use crate::debugger::thread::ThreadId;
use std::collections::HashMap;
use std::sync::Mutex;

/// Thread-scoped side table of frames that are not on a live call stack.
///
/// Populated for the duration of a caught-exception stack send, so the
/// session can look up frames of the propagation chain by identity while
/// the thread is parked. Each thread publishes its own chain, lookups from
/// other threads are safe.
#[derive(Default)]
pub struct AdditionalFrameRegistry {
    state: Mutex<HashMap<ThreadId, HashMap<FrameId, FrameRef>>>,
}

impl AdditionalFrameRegistry {
    /// Publish frames for a thread. Removal happens when the returned guard
    /// drops, regardless of how the send step completes.
    pub(super) fn register(
        &self,
        thread: ThreadId,
        frames: HashMap<FrameId, FrameRef>,
    ) -> AdditionalFramesGuard<'_> {
        self.state.lock().expect("unpoisoned").insert(thread, frames);
        AdditionalFramesGuard {
            registry: self,
            thread,
        }
    }

    pub fn get(&self, thread: ThreadId, frame: FrameId) -> Option<FrameRef> {
        self.state
            .lock()
            .expect("unpoisoned")
            .get(&thread)
            .and_then(|frames| frames.get(&frame))
            .cloned()
    }

    fn remove(&self, thread: ThreadId) {
        self.state.lock().expect("unpoisoned").remove(&thread);
    }
}

pub(super) struct AdditionalFramesGuard<'a> {
    registry: &'a AdditionalFrameRegistry,
    thread: ThreadId,
}

impl Drop for AdditionalFramesGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.thread);
    }
}
