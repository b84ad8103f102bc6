// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared iceoryx2 types for the camview shared-memory video channel.
//!
//! The producer publishes each frame as a `[u8]` slice sample carrying a
//! [`FrameHeader`] user header. Both sides must agree on the header layout and
//! on the service naming scheme, so they live here rather than in `camview`.

use iceoryx2::prelude::*;

/// Prefix of every camview frame service.
pub const SERVICE_PREFIX: &str = "camview";

/// Maximum length accepted for a stream name.
pub const MAX_STREAM_NAME_LEN: usize = 64;

/// Logical camera stream published by a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum StreamType {
    #[default]
    Road = 0,
    Driver = 1,
    WideRoad = 2,
}

impl StreamType {
    pub const ALL: [StreamType; 3] = [StreamType::Road, StreamType::Driver, StreamType::WideRoad];

    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::Road => "road",
            StreamType::Driver => "driver",
            StreamType::WideRoad => "wide_road",
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| *t as u32 == raw)
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel layout of a frame's CPU-visible payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum PixelFormat {
    Rgb8 = 0,
    #[default]
    Rgba8 = 1,
    Bgra8 = 2,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(PixelFormat::Rgb8),
            1 => Some(PixelFormat::Rgba8),
            2 => Some(PixelFormat::Bgra8),
            _ => None,
        }
    }
}

/// Set in [`FrameHeader::flags`] when the frame's pool slot is also exported
/// as a DMA-BUF on the stream's export socket (see [`export_socket_name`]).
pub const FRAME_FLAG_DMA_BUF: u32 = 1;

/// Per-frame metadata sent as the iceoryx2 user header.
///
/// `buffer_index` is the producer's buffer-pool slot for this frame. It is
/// reused cyclically and is in `0..pool_size`.
///
/// A frame flagged with [`FRAME_FLAG_DMA_BUF`] may carry an empty payload;
/// its pixels then live only in the exported buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FrameHeader {
    pub frame_id: u64,
    pub timestamp_ns: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    pub buffer_index: u32,
    pub pool_size: u32,
    pub flags: u32,
    pub reserved: u32,
}

// SAFETY: `#[repr(C)]`, only integer fields, no pointers or heap references.
unsafe impl ZeroCopySend for FrameHeader {}

impl FrameHeader {
    pub fn pixel_format(&self) -> Option<PixelFormat> {
        PixelFormat::from_raw(self.format)
    }

    /// Number of payload bytes a frame with this geometry occupies.
    pub fn expected_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    pub fn has_dma_buf(&self) -> bool {
        self.flags & FRAME_FLAG_DMA_BUF != 0
    }
}

/// iceoryx2 service name for a stream: `camview/{stream_name}/{stream_type}`.
pub fn service_name(stream_name: &str, stream_type: StreamType) -> String {
    format!("{}/{}/{}", SERVICE_PREFIX, stream_name, stream_type.as_str())
}

/// File name of the Unix socket on which a producer hands out the DMA-BUF
/// fds of a stream's buffer pool.
pub fn export_socket_name(stream_name: &str, stream_type: StreamType) -> String {
    format!("{}-{}-{}.sock", SERVICE_PREFIX, stream_name, stream_type.as_str())
}
