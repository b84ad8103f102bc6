// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Stream endpoints, frame handles and display colors.

mod color;
mod endpoint;
mod frame_buffer;

pub use camview_ipc_types::{PixelFormat, StreamType};
pub use color::Rgba;
pub use endpoint::StreamEndpoint;
pub use frame_buffer::{BufferIdentity, FrameBufferHandle, FrameGeometry, NativeBuffer, StreamInfo};
