// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Camera view: draws frames from the camview shared-memory channel onto a
//! host-provided GPU surface.
//!
//! The host owns the window and graphics context and forwards its lifecycle
//! events to a [`RenderSurface`] through [`SurfaceEventHandler`]. Frames are
//! received on a background thread and drawn on the host's render thread,
//! letterboxed or zoomed to fill.
//!
//! ```ignore
//! let config = SurfaceConfig::load_or_default(Path::new(SurfaceConfig::FILE_NAME));
//! camview::init_logging(&config.log_filter);
//!
//! // with the host's EGL context current:
//! let mut surface = RenderSurface::new(config, GlDevice::from_current_context()?)?;
//! surface.initialize_graphics()?;
//! surface.resize(800, 480);
//! surface.show()?;
//! // on every host paint:
//! surface.paint()?;
//! ```

#![allow(clippy::type_complexity)] // Callback and device type aliases are clear in context

pub mod core;

pub use camview_ipc_types as ipc_types;
pub use crossbeam_channel;

pub use core::{
    frame_matrix, init_logging, BoundTexture, BufferIdentity, ConnectionState, ErrorSeverity,
    FrameBufferHandle, FrameConnection, FrameGeometry, FrameSourceConnector, FrameState, GpuDevice,
    GpuResources, Iceoryx2FrameSource, Mat4, NativeBuffer, PixelFormat, ReceiveSettings,
    RenderSurface, RepaintCallback, Result, RetryPolicy, Rgba, StopSignal, StreamEndpoint,
    StreamInfo, StreamType, SurfaceConfig, SurfaceEventHandler, SurfaceNotification, SurfaceState,
    ViewError, ViewTransform, Viewport,
};

#[cfg(target_os = "linux")]
pub use core::rhi::GlDevice;
