// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! OpenGL ES 3 device on the host's current EGL context.
//!
//! Zero-copy import follows `EGL_EXT_image_dma_buf_import`: a DMA-BUF plane
//! becomes an `EGLImage`, which `glEGLImageTargetTexture2DOES` attaches to a
//! `GL_TEXTURE_EXTERNAL_OES` texture sampled by the external program.

use std::collections::HashMap;
use std::ffi::{c_void, CString};

use camview_ipc_types::PixelFormat;
use gl::types::{GLenum, GLint, GLsizei, GLuint};
use khronos_egl as egl;

use super::device::{
    DeviceCapabilities, DrawCall, GpuDevice, ImageId, ProgramId, ProgramKind, QuadId, TextureId,
    TextureTarget, TextureUpload,
};
use crate::core::frames::{FrameGeometry, NativeBuffer, Rgba};
use crate::core::transform::Viewport;
use crate::core::{Result, ViewError};

const GL_TEXTURE_EXTERNAL_OES: GLenum = 0x8D65;

const EGL_LINUX_DMA_BUF_EXT: egl::Enum = 0x3270;
const EGL_LINUX_DRM_FOURCC_EXT: egl::Int = 0x3271;
const EGL_DMA_BUF_PLANE0_FD_EXT: egl::Int = 0x3272;
const EGL_DMA_BUF_PLANE0_OFFSET_EXT: egl::Int = 0x3273;
const EGL_DMA_BUF_PLANE0_PITCH_EXT: egl::Int = 0x3274;
const EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT: egl::Int = 0x3443;
const EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT: egl::Int = 0x3444;

const QUAD_VERTEX_SHADER: &str = include_str!("shaders/quad.vert");
const TEXTURE_2D_FRAGMENT_SHADER: &str = include_str!("shaders/texture2d.frag");
const EXTERNAL_FRAGMENT_SHADER: &str = include_str!("shaders/external.frag");

/// Interleaved `x, y, u, v`. Row 0 of the frame is the top of the quad.
#[rustfmt::skip]
const QUAD_VERTICES: [f32; 16] = [
    -1.0, -1.0, 0.0, 1.0,
     1.0, -1.0, 1.0, 1.0,
     1.0,  1.0, 1.0, 0.0,
    -1.0,  1.0, 0.0, 0.0,
];
const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

type ImageTargetTexture2dOes = unsafe extern "system" fn(target: GLenum, image: *mut c_void);

struct ProgramUniforms {
    transform: GLint,
    frame: GLint,
}

struct QuadBuffers {
    vertices: GLuint,
    indices: GLuint,
}

/// [`GpuDevice`] backed by the `gl` bindings and a dynamically loaded libEGL.
///
/// Create with the host's context current and use only on that thread.
pub struct GlDevice {
    egl: egl::DynamicInstance<egl::EGL1_5>,
    display: egl::Display,
    image_target_texture: Option<ImageTargetTexture2dOes>,
    programs: HashMap<GLuint, ProgramUniforms>,
    quads: HashMap<GLuint, QuadBuffers>,
    texture_storage: HashMap<GLuint, (u32, u32, PixelFormat)>,
    images: HashMap<u64, egl::Image>,
    next_image: u64,
}

impl GlDevice {
    /// Bind to the EGL context current on the calling thread.
    pub fn from_current_context() -> Result<Self> {
        // SAFETY: loading libEGL runs no code beyond the library initializers.
        let egl = unsafe { egl::DynamicInstance::<egl::EGL1_5>::load_required() }
            .map_err(|e| ViewError::NotSupported(format!("libEGL 1.5 unavailable: {}", e)))?;
        let display = egl
            .get_current_display()
            .ok_or_else(|| ViewError::GpuError("no EGL context is current".into()))?;

        gl::load_with(|name| {
            egl.get_proc_address(name)
                .map_or(std::ptr::null(), |f| f as *const c_void)
        });

        let egl_extensions = egl
            .query_string(Some(display), egl::EXTENSIONS)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dma_buf_import = egl_extensions
            .split_whitespace()
            .any(|ext| ext == "EGL_EXT_image_dma_buf_import");
        let external_sampler = gl_extensions()
            .iter()
            .any(|ext| ext == "GL_OES_EGL_image_external_essl3");

        let image_target_texture = egl.get_proc_address("glEGLImageTargetTexture2DOES").map(|f| {
            // SAFETY: the symbol has this signature per OES_EGL_image.
            unsafe { std::mem::transmute::<extern "system" fn(), ImageTargetTexture2dOes>(f) }
        });
        let zero_copy = dma_buf_import && external_sampler && image_target_texture.is_some();

        tracing::info!(
            "GlDevice: dma-buf import {}, external sampler {}, zero-copy {}",
            dma_buf_import,
            external_sampler,
            if zero_copy { "enabled" } else { "disabled" }
        );

        Ok(Self {
            egl,
            display,
            image_target_texture: image_target_texture.filter(|_| zero_copy),
            programs: HashMap::new(),
            quads: HashMap::new(),
            texture_storage: HashMap::new(),
            images: HashMap::new(),
            next_image: 1,
        })
    }
}

fn gl_extensions() -> Vec<String> {
    let mut count: GLint = 0;
    // SAFETY: GL is loaded and a context is current.
    unsafe { gl::GetIntegerv(gl::NUM_EXTENSIONS, &mut count) };
    (0..count.max(0) as GLuint)
        .filter_map(|i| {
            // SAFETY: `i` is below GL_NUM_EXTENSIONS.
            let ptr = unsafe { gl::GetStringi(gl::EXTENSIONS, i) };
            if ptr.is_null() {
                return None;
            }
            // SAFETY: GL returns a NUL-terminated static string.
            let name = unsafe { std::ffi::CStr::from_ptr(ptr.cast()) };
            Some(name.to_string_lossy().into_owned())
        })
        .collect()
}

fn gl_error() -> Option<GLenum> {
    // SAFETY: plain state query.
    let error = unsafe { gl::GetError() };
    (error != gl::NO_ERROR).then_some(error)
}

fn gl_target(target: TextureTarget) -> GLenum {
    match target {
        TextureTarget::Texture2d => gl::TEXTURE_2D,
        TextureTarget::External => GL_TEXTURE_EXTERNAL_OES,
    }
}

/// `(internal format, upload format)`. BGRA is uploaded as RGBA and swizzled.
fn gl_formats(format: PixelFormat) -> (GLenum, GLenum) {
    match format {
        PixelFormat::Rgb8 => (gl::RGB8, gl::RGB),
        PixelFormat::Rgba8 | PixelFormat::Bgra8 => (gl::RGBA8, gl::RGBA),
    }
}

fn compile_shader(kind: GLenum, source: &str) -> Result<GLuint> {
    let source = CString::new(source)
        .map_err(|_| ViewError::ShaderCompilation("shader source contains NUL".into()))?;
    // SAFETY: GL is loaded and a context is current; `source` outlives the call.
    unsafe {
        let shader = gl::CreateShader(kind);
        gl::ShaderSource(shader, 1, &source.as_ptr(), std::ptr::null());
        gl::CompileShader(shader);

        let mut status: GLint = 0;
        gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut status);
        if status == 0 {
            let mut len: GLint = 0;
            gl::GetShaderiv(shader, gl::INFO_LOG_LENGTH, &mut len);
            let mut log = vec![0u8; len.max(1) as usize];
            gl::GetShaderInfoLog(shader, len, std::ptr::null_mut(), log.as_mut_ptr().cast());
            gl::DeleteShader(shader);
            return Err(ViewError::ShaderCompilation(
                String::from_utf8_lossy(&log).trim_end_matches('\0').to_string(),
            ));
        }
        Ok(shader)
    }
}

fn link_program(fragment_source: &str) -> Result<GLuint> {
    let vertex = compile_shader(gl::VERTEX_SHADER, QUAD_VERTEX_SHADER)?;
    let fragment = match compile_shader(gl::FRAGMENT_SHADER, fragment_source) {
        Ok(fragment) => fragment,
        Err(e) => {
            // SAFETY: `vertex` was created above.
            unsafe { gl::DeleteShader(vertex) };
            return Err(e);
        }
    };

    // SAFETY: both shaders are valid; they are flagged for deletion once linked.
    unsafe {
        let program = gl::CreateProgram();
        gl::AttachShader(program, vertex);
        gl::AttachShader(program, fragment);
        gl::LinkProgram(program);
        gl::DeleteShader(vertex);
        gl::DeleteShader(fragment);

        let mut status: GLint = 0;
        gl::GetProgramiv(program, gl::LINK_STATUS, &mut status);
        if status == 0 {
            let mut len: GLint = 0;
            gl::GetProgramiv(program, gl::INFO_LOG_LENGTH, &mut len);
            let mut log = vec![0u8; len.max(1) as usize];
            gl::GetProgramInfoLog(program, len, std::ptr::null_mut(), log.as_mut_ptr().cast());
            gl::DeleteProgram(program);
            return Err(ViewError::ShaderCompilation(format!(
                "link: {}",
                String::from_utf8_lossy(&log).trim_end_matches('\0')
            )));
        }
        Ok(program)
    }
}

fn uniform_location(program: GLuint, name: &str) -> GLint {
    match CString::new(name) {
        // SAFETY: `program` is linked and `name` is NUL-terminated.
        Ok(name) => unsafe { gl::GetUniformLocation(program, name.as_ptr()) },
        Err(_) => -1,
    }
}

/// EGL attribute list importing one DMA-BUF plane.
fn dma_buf_attributes(buffer: &NativeBuffer, geometry: &FrameGeometry) -> Vec<egl::Attrib> {
    let mut attributes = vec![
        egl::WIDTH as egl::Attrib,
        geometry.width as egl::Attrib,
        egl::HEIGHT as egl::Attrib,
        geometry.height as egl::Attrib,
        EGL_LINUX_DRM_FOURCC_EXT as egl::Attrib,
        buffer.fourcc as egl::Attrib,
        EGL_DMA_BUF_PLANE0_FD_EXT as egl::Attrib,
        buffer.raw_fd() as egl::Attrib,
        EGL_DMA_BUF_PLANE0_OFFSET_EXT as egl::Attrib,
        buffer.offset as egl::Attrib,
        EGL_DMA_BUF_PLANE0_PITCH_EXT as egl::Attrib,
        buffer.pitch as egl::Attrib,
    ];
    if let Some(modifier) = buffer.modifier {
        attributes.extend_from_slice(&[
            EGL_DMA_BUF_PLANE0_MODIFIER_LO_EXT as egl::Attrib,
            (modifier & 0xffff_ffff) as egl::Attrib,
            EGL_DMA_BUF_PLANE0_MODIFIER_HI_EXT as egl::Attrib,
            (modifier >> 32) as egl::Attrib,
        ]);
    }
    attributes.push(egl::NONE as egl::Attrib);
    attributes
}

impl GpuDevice for GlDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            zero_copy: self.image_target_texture.is_some(),
        }
    }

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramId> {
        let fragment = match kind {
            ProgramKind::Texture2d => TEXTURE_2D_FRAGMENT_SHADER,
            ProgramKind::External => EXTERNAL_FRAGMENT_SHADER,
        };
        let program = link_program(fragment)?;
        let uniforms = ProgramUniforms {
            transform: uniform_location(program, "u_transform"),
            frame: uniform_location(program, "u_frame"),
        };
        if uniforms.transform < 0 {
            // SAFETY: `program` was created by link_program.
            unsafe { gl::DeleteProgram(program) };
            return Err(ViewError::ShaderCompilation(format!(
                "{:?} program has no u_transform uniform",
                kind
            )));
        }
        self.programs.insert(program, uniforms);
        tracing::debug!("GlDevice: linked {:?} program {}", kind, program);
        Ok(ProgramId(program))
    }

    fn create_quad(&mut self) -> Result<QuadId> {
        let stride = (4 * std::mem::size_of::<f32>()) as GLsizei;
        let (mut vao, mut vbo, mut ebo) = (0, 0, 0);
        // SAFETY: GL is loaded and current; the arrays are copied by BufferData.
        unsafe {
            gl::GenVertexArrays(1, &mut vao);
            gl::GenBuffers(1, &mut vbo);
            gl::GenBuffers(1, &mut ebo);
            gl::BindVertexArray(vao);

            gl::BindBuffer(gl::ARRAY_BUFFER, vbo);
            gl::BufferData(
                gl::ARRAY_BUFFER,
                std::mem::size_of_val(&QUAD_VERTICES) as isize,
                QUAD_VERTICES.as_ptr().cast(),
                gl::STATIC_DRAW,
            );
            gl::BindBuffer(gl::ELEMENT_ARRAY_BUFFER, ebo);
            gl::BufferData(
                gl::ELEMENT_ARRAY_BUFFER,
                std::mem::size_of_val(&QUAD_INDICES) as isize,
                QUAD_INDICES.as_ptr().cast(),
                gl::STATIC_DRAW,
            );

            gl::VertexAttribPointer(0, 2, gl::FLOAT, gl::FALSE, stride, std::ptr::null());
            gl::EnableVertexAttribArray(0);
            gl::VertexAttribPointer(
                1,
                2,
                gl::FLOAT,
                gl::FALSE,
                stride,
                (2 * std::mem::size_of::<f32>()) as *const c_void,
            );
            gl::EnableVertexAttribArray(1);
            gl::BindVertexArray(0);
        }
        if let Some(error) = gl_error() {
            return Err(ViewError::GpuError(format!("quad allocation failed: 0x{:x}", error)));
        }
        self.quads.insert(vao, QuadBuffers { vertices: vbo, indices: ebo });
        Ok(QuadId(vao))
    }

    fn create_texture(&mut self, target: TextureTarget) -> Result<TextureId> {
        let target = gl_target(target);
        let mut texture = 0;
        // SAFETY: GL is loaded and current.
        unsafe {
            gl::GenTextures(1, &mut texture);
            gl::BindTexture(target, texture);
            gl::TexParameteri(target, gl::TEXTURE_MIN_FILTER, gl::LINEAR as GLint);
            gl::TexParameteri(target, gl::TEXTURE_MAG_FILTER, gl::LINEAR as GLint);
            gl::TexParameteri(target, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as GLint);
            gl::TexParameteri(target, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as GLint);
            gl::BindTexture(target, 0);
        }
        if let Some(error) = gl_error() {
            return Err(ViewError::GpuError(format!("texture creation failed: 0x{:x}", error)));
        }
        Ok(TextureId(texture))
    }

    fn allocate_texture(
        &mut self,
        texture: TextureId,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<()> {
        if self.texture_storage.get(&texture.0) == Some(&(width, height, format)) {
            return Ok(());
        }
        let (internal, upload) = gl_formats(format);
        let swizzle = if format == PixelFormat::Bgra8 {
            (gl::BLUE, gl::RED)
        } else {
            (gl::RED, gl::BLUE)
        };
        // SAFETY: GL is loaded and current; a null pointer only reserves storage.
        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, texture.0);
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                internal as GLint,
                width as GLsizei,
                height as GLsizei,
                0,
                upload,
                gl::UNSIGNED_BYTE,
                std::ptr::null(),
            );
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_SWIZZLE_R, swizzle.0 as GLint);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_SWIZZLE_B, swizzle.1 as GLint);
            gl::BindTexture(gl::TEXTURE_2D, 0);
        }
        if let Some(error) = gl_error() {
            return Err(ViewError::UploadFailed(format!(
                "allocating {}x{} {:?}: 0x{:x}",
                width, height, format, error
            )));
        }
        self.texture_storage.insert(texture.0, (width, height, format));
        tracing::debug!("GlDevice: texture {} sized {}x{} {:?}", texture.0, width, height, format);
        Ok(())
    }

    fn upload_texture(&mut self, texture: TextureId, upload: &TextureUpload<'_>) -> Result<()> {
        let needed = upload.stride as usize * upload.height as usize;
        if upload.pixels.len() < needed {
            return Err(ViewError::UploadFailed(format!(
                "{} bytes for {} rows of {}",
                upload.pixels.len(),
                upload.height,
                upload.stride
            )));
        }
        self.allocate_texture(texture, upload.width, upload.height, upload.format)?;

        let (_, format) = gl_formats(upload.format);
        // SAFETY: GL is loaded and current; every row read lies inside `pixels`.
        unsafe {
            gl::BindTexture(gl::TEXTURE_2D, texture.0);
            gl::PixelStorei(gl::UNPACK_ALIGNMENT, 1);
            match upload.row_length() {
                Some(row_length) => {
                    gl::PixelStorei(gl::UNPACK_ROW_LENGTH, row_length as GLint);
                    gl::TexSubImage2D(
                        gl::TEXTURE_2D,
                        0,
                        0,
                        0,
                        upload.width as GLsizei,
                        upload.height as GLsizei,
                        format,
                        gl::UNSIGNED_BYTE,
                        upload.pixels.as_ptr().cast(),
                    );
                    gl::PixelStorei(gl::UNPACK_ROW_LENGTH, 0);
                }
                None => {
                    for y in 0..upload.height {
                        let Some(row) = upload.row(y) else { break };
                        gl::TexSubImage2D(
                            gl::TEXTURE_2D,
                            0,
                            0,
                            y as GLint,
                            upload.width as GLsizei,
                            1,
                            format,
                            gl::UNSIGNED_BYTE,
                            row.as_ptr().cast(),
                        );
                    }
                }
            }
            gl::PixelStorei(gl::UNPACK_ALIGNMENT, 4);
            gl::BindTexture(gl::TEXTURE_2D, 0);
        }
        if let Some(error) = gl_error() {
            return Err(ViewError::UploadFailed(format!("glTexSubImage2D: 0x{:x}", error)));
        }
        Ok(())
    }

    fn import_image(&mut self, buffer: &NativeBuffer, geometry: &FrameGeometry) -> Result<ImageId> {
        let attributes = dma_buf_attributes(buffer, geometry);
        // SAFETY: EGL_LINUX_DMA_BUF_EXT requires EGL_NO_CONTEXT and a null client buffer.
        let image = unsafe {
            self.egl.create_image(
                self.display,
                egl::Context::from_ptr(egl::NO_CONTEXT),
                EGL_LINUX_DMA_BUF_EXT,
                egl::ClientBuffer::from_ptr(std::ptr::null_mut()),
                &attributes,
            )
        }
        .map_err(|e| ViewError::ImportFailed {
            identity: buffer.raw_fd() as u32,
            reason: format!("eglCreateImage: {}", e),
        })?;

        let id = self.next_image;
        self.next_image += 1;
        self.images.insert(id, image);
        Ok(ImageId(id))
    }

    fn attach_image(&mut self, texture: TextureId, image: ImageId) -> Result<()> {
        let target_texture = self
            .image_target_texture
            .ok_or_else(|| ViewError::NotSupported("glEGLImageTargetTexture2DOES".into()))?;
        let image = self
            .images
            .get(&image.0)
            .ok_or_else(|| ViewError::GpuError(format!("unknown image {}", image.0)))?;
        // SAFETY: `image` is alive and `texture` is an external texture.
        unsafe {
            gl::BindTexture(GL_TEXTURE_EXTERNAL_OES, texture.0);
            target_texture(GL_TEXTURE_EXTERNAL_OES, image.as_ptr());
            gl::BindTexture(GL_TEXTURE_EXTERNAL_OES, 0);
        }
        if let Some(error) = gl_error() {
            return Err(ViewError::ImportFailed {
                identity: texture.0,
                reason: format!("glEGLImageTargetTexture2DOES: 0x{:x}", error),
            });
        }
        Ok(())
    }

    fn clear(&mut self, viewport: Viewport, color: Rgba) {
        // SAFETY: GL is loaded and current.
        unsafe {
            gl::Viewport(0, 0, viewport.width, viewport.height);
            gl::ClearColor(color.r, color.g, color.b, color.a);
            gl::Clear(gl::COLOR_BUFFER_BIT);
        }
    }

    fn draw_quad(&mut self, call: &DrawCall) {
        let Some(uniforms) = self.programs.get(&call.program.0) else {
            tracing::warn!("GlDevice: draw with unknown program {}", call.program.0);
            return;
        };
        let target = gl_target(call.target);
        // SAFETY: program, quad and texture are live objects of this context.
        unsafe {
            gl::Viewport(0, 0, call.viewport.width, call.viewport.height);
            gl::UseProgram(call.program.0);
            gl::UniformMatrix4fv(uniforms.transform, 1, gl::FALSE, call.matrix.as_slice().as_ptr());
            gl::ActiveTexture(gl::TEXTURE0);
            gl::BindTexture(target, call.texture.0);
            gl::Uniform1i(uniforms.frame, 0);
            gl::BindVertexArray(call.quad.0);
            gl::DrawElements(
                gl::TRIANGLES,
                QUAD_INDICES.len() as GLsizei,
                gl::UNSIGNED_SHORT,
                std::ptr::null(),
            );
            gl::BindVertexArray(0);
            gl::BindTexture(target, 0);
            gl::UseProgram(0);
        }
    }

    fn destroy_image(&mut self, image: ImageId) {
        if let Some(egl_image) = self.images.remove(&image.0) {
            if let Err(e) = self.egl.destroy_image(self.display, egl_image) {
                tracing::warn!("GlDevice: eglDestroyImage({}) failed: {}", image.0, e);
            }
        }
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.texture_storage.remove(&texture.0);
        // SAFETY: deleting an unknown name is ignored by GL.
        unsafe { gl::DeleteTextures(1, &texture.0) };
    }

    fn destroy_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program.0).is_some() {
            // SAFETY: `program` was created by this device.
            unsafe { gl::DeleteProgram(program.0) };
        }
    }

    fn destroy_quad(&mut self, quad: QuadId) {
        if let Some(buffers) = self.quads.remove(&quad.0) {
            // SAFETY: all three names were created by create_quad.
            unsafe {
                gl::DeleteBuffers(1, &buffers.vertices);
                gl::DeleteBuffers(1, &buffers.indices);
                gl::DeleteVertexArrays(1, &quad.0);
            }
        }
    }
}

impl Drop for GlDevice {
    fn drop(&mut self) {
        if !self.images.is_empty() {
            tracing::warn!("GlDevice: dropped with {} live images", self.images.len());
        }
    }
}
