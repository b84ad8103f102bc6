// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod config;
pub mod error;
pub mod frames;
pub mod logging;
pub mod rhi;
pub mod source;
pub mod surface;
pub mod sync;
pub mod transform;

pub use config::{RetryPolicy, SurfaceConfig};
pub use error::*;
pub use frames::*;
pub use logging::init_logging;
pub use rhi::{BoundTexture, GpuDevice, GpuResources};
pub use source::{FrameConnection, FrameSourceConnector, Iceoryx2FrameSource, ReceiveSettings};
pub use surface::*;
pub use sync::StopSignal;
pub use transform::{frame_matrix, Mat4, ViewTransform, Viewport};
