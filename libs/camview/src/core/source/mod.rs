// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame source client.
//!
//! The receive worker only sees the two traits here. [`Iceoryx2FrameSource`]
//! is the production implementation; tests script their own.

mod dmabuf;
mod iceoryx2;

pub use self::dmabuf::{default_socket_dir, socket_path, BufferExports};
pub use self::iceoryx2::{Iceoryx2FrameSource, ReceiveSettings};

use crate::core::frames::{FrameBufferHandle, StreamEndpoint, StreamInfo};
use crate::core::sync::StopSignal;
use crate::core::Result;

/// Opens connections to named streams.
///
/// Shared with the receive worker, hence `Send + Sync`. Connections
/// themselves are created and used on the worker thread only.
pub trait FrameSourceConnector: Send + Sync {
    /// Connect to `endpoint`.
    ///
    /// Fails with [`ViewError::NotFound`](crate::core::ViewError::NotFound)
    /// when no producer offers the stream and
    /// [`ViewError::Timeout`](crate::core::ViewError::Timeout) when it exists
    /// but does not deliver in time. Returns
    /// [`ViewError::Cancelled`](crate::core::ViewError::Cancelled) promptly
    /// once `stop` fires.
    fn connect(
        &self,
        endpoint: &StreamEndpoint,
        stop: &StopSignal,
    ) -> Result<Box<dyn FrameConnection>>;
}

/// A live connection to one stream.
pub trait FrameConnection {
    /// Geometry and pool size announced at connect time.
    fn info(&self) -> StreamInfo;

    /// Block until the next frame arrives or `stop` fires.
    ///
    /// `Disconnected` means the connection is gone and must be re-established.
    /// `Stale` means one frame was rejected and receiving may continue.
    fn receive_next(&mut self, stop: &StopSignal) -> Result<FrameBufferHandle>;
}
