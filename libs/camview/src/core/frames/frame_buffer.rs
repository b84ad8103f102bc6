// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use bytes::Bytes;
use camview_ipc_types::{FrameHeader, PixelFormat};

use crate::core::{Result, ViewError};

/// Slot of the producer's buffer pool a frame lives in.
///
/// Identities are recycled: the same identity refers to a different frame
/// once the pool wraps around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferIdentity(pub u32);

/// Width, height, row stride (bytes) and pixel layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

impl FrameGeometry {
    pub fn new(width: u32, height: u32, stride: u32, format: PixelFormat) -> Result<Self> {
        let geometry = Self {
            width,
            height,
            stride,
            format,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Tightly packed geometry (stride == width * bytes per pixel).
    pub fn packed(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            stride: width * format.bytes_per_pixel(),
            format,
        }
    }

    pub fn from_header(header: &FrameHeader) -> Result<Self> {
        let format = header.pixel_format().ok_or_else(|| {
            ViewError::Stale(format!("unknown pixel format {}", header.format))
        })?;
        Self::new(header.width, header.height, header.stride, format)
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ViewError::Stale(format!(
                "empty frame geometry {}x{}",
                self.width, self.height
            )));
        }
        let row_bytes = self.width as u64 * self.format.bytes_per_pixel() as u64;
        if (self.stride as u64) < row_bytes {
            return Err(ViewError::Stale(format!(
                "stride {} smaller than row of {} bytes",
                self.stride, row_bytes
            )));
        }
        Ok(())
    }

    /// Bytes a CPU-visible frame of this geometry occupies.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// Connection metadata announced once per successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub geometry: FrameGeometry,
    /// Number of buffers in the producer's pool; 0 when unknown.
    pub pool_size: u32,
}

/// DMA-BUF descriptor for a frame that can be imported without a copy.
#[derive(Debug, Clone)]
pub struct NativeBuffer {
    fd: Arc<OwnedFd>,
    /// DRM fourcc of the single plane.
    pub fourcc: u32,
    pub offset: u32,
    pub pitch: u32,
    /// DRM format modifier, if the producer exported one.
    pub modifier: Option<u64>,
}

impl NativeBuffer {
    pub fn new(fd: OwnedFd, fourcc: u32, offset: u32, pitch: u32, modifier: Option<u64>) -> Self {
        Self {
            fd: Arc::new(fd),
            fourcc,
            offset,
            pitch,
            modifier,
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Everything an imported image depends on. Two descriptors with the same
    /// fingerprint resolve to the same GPU image.
    pub fn fingerprint(&self) -> (RawFd, u32, u32, u32, Option<u64>) {
        (self.raw_fd(), self.fourcc, self.offset, self.pitch, self.modifier)
    }
}

/// One received frame.
///
/// Cheap to clone: pixels are refcounted and the native descriptor is shared.
/// A handle is only meaningful for the connection that produced it; buffer
/// identities are re-assigned by the producer after a reconnect.
#[derive(Debug, Clone)]
pub struct FrameBufferHandle {
    frame_id: u64,
    timestamp_ns: u64,
    geometry: FrameGeometry,
    identity: BufferIdentity,
    pixels: Bytes,
    native: Option<NativeBuffer>,
}

impl FrameBufferHandle {
    /// Build a CPU-visible frame. `pixels` must hold `stride * height` bytes.
    pub fn new(
        frame_id: u64,
        timestamp_ns: u64,
        geometry: FrameGeometry,
        identity: BufferIdentity,
        pixels: Bytes,
    ) -> Result<Self> {
        geometry.validate()?;
        if pixels.len() < geometry.byte_len() {
            return Err(ViewError::Stale(format!(
                "frame {} has {} bytes, geometry needs {}",
                frame_id,
                pixels.len(),
                geometry.byte_len()
            )));
        }
        Ok(Self {
            frame_id,
            timestamp_ns,
            geometry,
            identity,
            pixels,
            native: None,
        })
    }

    /// Build a frame that only exists as a DMA-BUF.
    pub fn from_native(
        frame_id: u64,
        timestamp_ns: u64,
        geometry: FrameGeometry,
        identity: BufferIdentity,
        native: NativeBuffer,
    ) -> Result<Self> {
        geometry.validate()?;
        Ok(Self {
            frame_id,
            timestamp_ns,
            geometry,
            identity,
            pixels: Bytes::new(),
            native: Some(native),
        })
    }

    pub fn with_native(mut self, native: NativeBuffer) -> Self {
        self.native = Some(native);
        self
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn stride(&self) -> u32 {
        self.geometry.stride
    }

    pub fn identity(&self) -> BufferIdentity {
        self.identity
    }

    /// CPU-visible pixels, empty for native-only frames.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn has_pixels(&self) -> bool {
        !self.pixels.is_empty()
    }

    pub fn native(&self) -> Option<&NativeBuffer> {
        self.native.as_ref()
    }
}
