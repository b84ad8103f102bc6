// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! GPU resource management for drawing frames.
//!
//! [`GpuResources`] holds the drawing logic and is generic over a
//! [`GpuDevice`]; [`GlDevice`] is the OpenGL ES / EGL implementation used on
//! Linux.

mod device;
#[cfg(target_os = "linux")]
mod gl_device;
mod image_cache;
mod resources;

pub use device::{
    DeviceCapabilities, DrawCall, GpuDevice, ImageId, ProgramId, ProgramKind, QuadId, TextureId,
    TextureTarget, TextureUpload,
};
#[cfg(target_os = "linux")]
pub use gl_device::GlDevice;
pub use image_cache::ImageCache;
pub use resources::{BoundTexture, GpuResources};
