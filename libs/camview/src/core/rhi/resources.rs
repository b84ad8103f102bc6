// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! GPU objects for drawing frames: shader programs, the unit quad, two
//! ping-pong upload textures and the imported-image cache.

use super::device::{
    DrawCall, GpuDevice, ImageId, ProgramId, ProgramKind, QuadId, TextureId, TextureTarget,
    TextureUpload,
};
use super::image_cache::ImageCache;
use crate::core::frames::{FrameBufferHandle, Rgba, StreamInfo};
use crate::core::transform::{Mat4, Viewport};
use crate::core::{Result, ViewError};

/// A frame ready to draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundTexture {
    pub texture: TextureId,
    pub target: TextureTarget,
    pub width: u32,
    pub height: u32,
    pub frame_id: u64,
}

struct Allocated {
    program_2d: ProgramId,
    quad: QuadId,
    upload_textures: [TextureId; 2],
    /// Index into `upload_textures` the next upload writes to.
    next_upload: usize,
    external: Option<ExternalPath>,
}

struct ExternalPath {
    program: ProgramId,
    texture: TextureId,
    images: ImageCache,
    /// Image the external texture currently samples.
    attached: Option<ImageId>,
    /// Attached image that left the cache. Destroyed once another image is
    /// attached, so the frame on screen survives a cache flush.
    retired: Option<ImageId>,
}

impl ExternalPath {
    /// Destroy an image the cache let go of, unless it is still on screen.
    fn release<D: GpuDevice>(&mut self, device: &mut D, image: ImageId) {
        if self.attached == Some(image) {
            if let Some(previous) = self.retired.replace(image) {
                device.destroy_image(previous);
            }
        } else {
            device.destroy_image(image);
        }
    }

    fn mark_attached<D: GpuDevice>(&mut self, device: &mut D, image: ImageId) {
        self.attached = Some(image);
        if let Some(retired) = self.retired.take_if(|retired| *retired != image) {
            device.destroy_image(retired);
        }
    }
}

/// Owns every GPU object the surface uses.
///
/// Must be initialized and torn down with the host's graphics context
/// current. [`teardown`](Self::teardown) is idempotent and also resets the
/// manager so it can be initialized again in a new context.
pub struct GpuResources<D: GpuDevice> {
    device: D,
    allocated: Option<Allocated>,
    /// Cache size used when the producer does not announce a pool size.
    fallback_cache_capacity: usize,
}

impl<D: GpuDevice> GpuResources<D> {
    pub fn new(device: D, fallback_cache_capacity: usize) -> Self {
        Self {
            device,
            allocated: None,
            fallback_cache_capacity,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.allocated.is_some()
    }

    pub fn zero_copy_enabled(&self) -> bool {
        self.allocated.as_ref().is_some_and(|a| a.external.is_some())
    }

    /// Number of imported images currently alive.
    pub fn cached_images(&self) -> usize {
        self.allocated
            .as_ref()
            .and_then(|a| a.external.as_ref())
            .map_or(0, |external| external.images.len())
    }

    pub fn image_cache_capacity(&self) -> Option<usize> {
        self.allocated
            .as_ref()
            .and_then(|a| a.external.as_ref())
            .map(|external| external.images.capacity())
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Compile programs and allocate the quad and textures. A no-op when
    /// already initialized.
    ///
    /// A program that fails to compile or link is fatal; everything created
    /// before the failure is released again.
    pub fn initialize(&mut self) -> Result<()> {
        if self.allocated.is_some() {
            return Ok(());
        }

        let mut created = Created::default();
        match self.allocate(&mut created) {
            Ok(allocated) => {
                tracing::debug!(
                    "GpuResources: initialized (zero-copy {})",
                    if allocated.external.is_some() { "on" } else { "off" }
                );
                self.allocated = Some(allocated);
                Ok(())
            }
            Err(e) => {
                tracing::error!("GpuResources: initialization failed: {}", e);
                created.release(&mut self.device);
                Err(e)
            }
        }
    }

    fn allocate(&mut self, created: &mut Created) -> Result<Allocated> {
        let program_2d = self.device.create_program(ProgramKind::Texture2d)?;
        created.programs.push(program_2d);
        let quad = self.device.create_quad()?;
        created.quads.push(quad);

        let mut upload_textures = [TextureId(0); 2];
        for slot in &mut upload_textures {
            *slot = self.device.create_texture(TextureTarget::Texture2d)?;
            created.textures.push(*slot);
        }

        let external = if self.device.capabilities().zero_copy {
            let program = self.device.create_program(ProgramKind::External)?;
            created.programs.push(program);
            let texture = self.device.create_texture(TextureTarget::External)?;
            created.textures.push(texture);
            Some(ExternalPath {
                program,
                texture,
                images: ImageCache::new(self.fallback_cache_capacity),
                attached: None,
                retired: None,
            })
        } else {
            None
        };

        Ok(Allocated {
            program_2d,
            quad,
            upload_textures,
            next_upload: 0,
            external,
        })
    }

    /// Prepare for a new connection: flush imported images (buffer identities
    /// are only meaningful per connection), size the cache from the pool and
    /// reserve storage in the upload texture the next frame is written to.
    ///
    /// The frame on screen stays drawable until a frame of the new connection
    /// is bound: neither the upload texture nor the image it shows is touched.
    pub fn prepare_stream(&mut self, info: &StreamInfo) -> Result<()> {
        let Some(allocated) = self.allocated.as_mut() else {
            return Ok(());
        };

        if let Some(external) = allocated.external.as_mut() {
            let capacity = if info.pool_size > 0 {
                info.pool_size as usize
            } else {
                self.fallback_cache_capacity
            };
            for image in external.images.reset(capacity) {
                external.release(&mut self.device, image);
            }
            tracing::debug!("GpuResources: image cache reset to {} slots", capacity);
        }

        // The other upload texture may hold the displayed frame; it is sized
        // by the upload that next writes to it.
        let geometry = info.geometry;
        let texture = allocated.upload_textures[allocated.next_upload];
        self.device
            .allocate_texture(texture, geometry.width, geometry.height, geometry.format)
    }

    /// Make `frame` drawable.
    ///
    /// Frames with a native descriptor are imported when zero-copy is
    /// available; otherwise their pixels are uploaded into the upload texture
    /// not used by the previous frame. On error nothing that the previously
    /// bound texture depends on has been touched.
    pub fn bind(&mut self, frame: &FrameBufferHandle) -> Result<BoundTexture> {
        let allocated = self
            .allocated
            .as_mut()
            .ok_or_else(|| ViewError::GpuError("bind before initialize".into()))?;

        if let (Some(native), Some(external)) = (frame.native(), allocated.external.as_mut()) {
            let identity = frame.identity();
            let (image, evicted) = match external.images.lookup(identity, native) {
                Some(image) => (image, None),
                None => {
                    let image = self
                        .device
                        .import_image(native, &frame.geometry())
                        .map_err(|e| for_identity(e, identity.0))?;
                    let evicted = external.images.insert(identity, native.clone(), image);
                    tracing::trace!(
                        "GpuResources: imported buffer {} for frame {}",
                        identity.0,
                        frame.frame_id()
                    );
                    (image, evicted)
                }
            };
            let attached = self.device.attach_image(external.texture, image);
            if let Some(evicted) = evicted {
                external.release(&mut self.device, evicted);
            }
            attached.map_err(|e| for_identity(e, identity.0))?;
            external.mark_attached(&mut self.device, image);

            return Ok(BoundTexture {
                texture: external.texture,
                target: TextureTarget::External,
                width: frame.width(),
                height: frame.height(),
                frame_id: frame.frame_id(),
            });
        }

        if !frame.has_pixels() {
            return Err(ViewError::ImportFailed {
                identity: frame.identity().0,
                reason: "no CPU pixels and zero-copy import is unavailable".into(),
            });
        }

        let texture = allocated.upload_textures[allocated.next_upload];
        self.device
            .upload_texture(texture, &TextureUpload::from_frame(frame))?;
        allocated.next_upload ^= 1;
        tracing::trace!(
            "GpuResources: uploaded frame {} into texture {}",
            frame.frame_id(),
            texture.0
        );

        Ok(BoundTexture {
            texture,
            target: TextureTarget::Texture2d,
            width: frame.width(),
            height: frame.height(),
            frame_id: frame.frame_id(),
        })
    }

    /// Clear to `background` and draw `bound` through `matrix`.
    pub fn draw(
        &mut self,
        bound: &BoundTexture,
        matrix: &Mat4,
        viewport: Viewport,
        background: Rgba,
    ) -> Result<()> {
        let allocated = self
            .allocated
            .as_ref()
            .ok_or_else(|| ViewError::GpuError("draw before initialize".into()))?;

        let program = match bound.target {
            TextureTarget::Texture2d => allocated.program_2d,
            TextureTarget::External => allocated
                .external
                .as_ref()
                .map(|external| external.program)
                .ok_or_else(|| {
                    ViewError::GpuError("external texture without zero-copy support".into())
                })?,
        };

        self.device.clear(viewport, background);
        self.device.draw_quad(&DrawCall {
            program,
            quad: allocated.quad,
            texture: bound.texture,
            target: bound.target,
            matrix: *matrix,
            viewport,
        });
        Ok(())
    }

    /// Fill the viewport with `background` only.
    pub fn clear(&mut self, viewport: Viewport, background: Rgba) {
        self.device.clear(viewport, background);
    }

    /// Release every GPU object. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        let Some(mut allocated) = self.allocated.take() else {
            tracing::trace!("GpuResources: teardown on released resources, nothing to do");
            return;
        };

        if let Some(mut external) = allocated.external.take() {
            for image in external.images.drain().into_iter().chain(external.retired.take()) {
                self.device.destroy_image(image);
            }
            self.device.destroy_texture(external.texture);
            self.device.destroy_program(external.program);
        }
        for texture in allocated.upload_textures {
            self.device.destroy_texture(texture);
        }
        self.device.destroy_quad(allocated.quad);
        self.device.destroy_program(allocated.program_2d);
        tracing::debug!("GpuResources: torn down");
    }
}

/// Report import failures against the frame's buffer identity.
fn for_identity(error: ViewError, identity: u32) -> ViewError {
    match error {
        ViewError::ImportFailed { reason, .. } => ViewError::ImportFailed { identity, reason },
        other => other,
    }
}

/// Objects created so far by a partial `initialize`.
#[derive(Default)]
struct Created {
    programs: Vec<ProgramId>,
    quads: Vec<QuadId>,
    textures: Vec<TextureId>,
}

impl Created {
    fn release<D: GpuDevice>(self, device: &mut D) {
        for texture in self.textures {
            device.destroy_texture(texture);
        }
        for quad in self.quads {
            device.destroy_quad(quad);
        }
        for program in self.programs {
            device.destroy_program(program);
        }
    }
}
