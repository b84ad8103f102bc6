// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Single-slot hand-off from the receive worker to the render thread.

use parking_lot::Mutex;

use crate::core::frames::{FrameBufferHandle, StreamInfo};

/// What the render thread picks up on a paint.
#[derive(Debug, Default)]
pub struct SlotUpdate {
    /// Set when a connection was (re-)established since the last take.
    pub info: Option<StreamInfo>,
    pub frame: Option<FrameBufferHandle>,
}

impl SlotUpdate {
    pub fn is_empty(&self) -> bool {
        self.info.is_none() && self.frame.is_none()
    }
}

#[derive(Default)]
struct SlotState {
    info: Option<StreamInfo>,
    frame: Option<FrameBufferHandle>,
    dropped: u64,
}

/// Latest-wins frame slot. Posting overwrites any frame not yet taken.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, returning the undisplayed frame it replaced.
    pub fn post(&self, frame: FrameBufferHandle) -> Option<FrameBufferHandle> {
        let mut state = self.state.lock();
        let replaced = state.frame.replace(frame);
        if replaced.is_some() {
            state.dropped += 1;
        }
        replaced
    }

    /// Record a new connection. Frames from the previous one are discarded.
    pub fn announce(&self, info: StreamInfo) {
        let mut state = self.state.lock();
        state.info = Some(info);
        if state.frame.take().is_some() {
            state.dropped += 1;
        }
    }

    pub fn take(&self) -> SlotUpdate {
        let mut state = self.state.lock();
        SlotUpdate {
            info: state.info.take(),
            frame: state.frame.take(),
        }
    }

    /// Discard everything pending. Returns true if a frame was discarded.
    pub fn clear(&self) -> bool {
        let mut state = self.state.lock();
        state.info = None;
        state.frame.take().is_some()
    }

    pub fn has_frame(&self) -> bool {
        self.state.lock().frame.is_some()
    }

    /// Frames overwritten or discarded before the render thread saw them.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}
