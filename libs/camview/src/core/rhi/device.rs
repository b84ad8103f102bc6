// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Low-level GPU operations used by [`GpuResources`](super::GpuResources).
//!
//! Every call happens on the render thread with the host's graphics context
//! current. Handles are plain ids owned by whoever created them; nothing here
//! frees resources on drop.

use camview_ipc_types::PixelFormat;

use crate::core::frames::{FrameBufferHandle, FrameGeometry, NativeBuffer, Rgba};
use crate::core::transform::{Mat4, Viewport};
use crate::core::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Unit quad geometry (vertex array plus its vertex and index buffers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuadId(pub u32);

/// An imported external image (EGLImage on Linux).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(pub u64);

/// Sampler a texture is read through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    /// Regular `GL_TEXTURE_2D`, filled by pixel upload.
    Texture2d,
    /// `GL_TEXTURE_EXTERNAL_OES`, backed by an imported image.
    External,
}

/// Shader program variant; one per [`TextureTarget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    Texture2d,
    External,
}

impl From<TextureTarget> for ProgramKind {
    fn from(target: TextureTarget) -> Self {
        match target {
            TextureTarget::Texture2d => ProgramKind::Texture2d,
            TextureTarget::External => ProgramKind::External,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceCapabilities {
    /// DMA-BUF import into external textures is available.
    pub zero_copy: bool,
}

/// CPU pixels for one texture upload.
#[derive(Debug, Clone, Copy)]
pub struct TextureUpload<'a> {
    pub width: u32,
    pub height: u32,
    /// Bytes between the starts of consecutive rows.
    pub stride: u32,
    pub format: PixelFormat,
    pub pixels: &'a [u8],
}

impl<'a> TextureUpload<'a> {
    pub fn from_frame(frame: &'a FrameBufferHandle) -> Self {
        let geometry = frame.geometry();
        Self {
            width: geometry.width,
            height: geometry.height,
            stride: geometry.stride,
            format: geometry.format,
            pixels: frame.pixels(),
        }
    }

    /// Row length in pixels for `GL_UNPACK_ROW_LENGTH`, or `None` when the
    /// stride is not a whole number of pixels and rows must go one at a time.
    pub fn row_length(&self) -> Option<u32> {
        let bpp = self.format.bytes_per_pixel();
        (self.stride % bpp == 0).then(|| self.stride / bpp)
    }

    /// The `row`-th row without its padding.
    pub fn row(&self, row: u32) -> Option<&'a [u8]> {
        let start = row as usize * self.stride as usize;
        let len = self.width as usize * self.format.bytes_per_pixel() as usize;
        self.pixels.get(start..start + len)
    }
}

/// One textured-quad draw.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall {
    pub program: ProgramId,
    pub quad: QuadId,
    pub texture: TextureId,
    pub target: TextureTarget,
    pub matrix: Mat4,
    pub viewport: Viewport,
}

/// Graphics API seam.
///
/// Failures map onto the error taxonomy: program creation fails with
/// `ShaderCompilation`, object creation with `GpuError`, uploads with
/// `UploadFailed` and imports with `ImportFailed`.
pub trait GpuDevice {
    fn capabilities(&self) -> DeviceCapabilities;

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramId>;
    fn create_quad(&mut self) -> Result<QuadId>;
    fn create_texture(&mut self, target: TextureTarget) -> Result<TextureId>;

    /// Reserve storage for a `width`x`height` texture without uploading.
    fn allocate_texture(
        &mut self,
        texture: TextureId,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<()>;
    fn upload_texture(&mut self, texture: TextureId, upload: &TextureUpload<'_>) -> Result<()>;

    fn import_image(&mut self, buffer: &NativeBuffer, geometry: &FrameGeometry) -> Result<ImageId>;
    /// Point an external texture at an imported image.
    fn attach_image(&mut self, texture: TextureId, image: ImageId) -> Result<()>;

    fn clear(&mut self, viewport: Viewport, color: Rgba);
    fn draw_quad(&mut self, call: &DrawCall);

    fn destroy_image(&mut self, image: ImageId);
    fn destroy_texture(&mut self, texture: TextureId);
    fn destroy_program(&mut self, program: ProgramId);
    fn destroy_quad(&mut self, quad: QuadId);
}
