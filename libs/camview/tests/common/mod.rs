// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Test doubles shared by the integration tests: a recording GPU device and
//! a frame source driven by the test.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use camview::core::rhi::{
    DeviceCapabilities, DrawCall, GpuDevice, ImageId, ProgramId, ProgramKind, QuadId, TextureId,
    TextureTarget, TextureUpload,
};
use camview::crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use camview::{
    BufferIdentity, FrameBufferHandle, FrameConnection, FrameGeometry, FrameSourceConnector, Mat4,
    NativeBuffer, PixelFormat, Result, RetryPolicy, Rgba, StopSignal, StreamEndpoint, StreamInfo,
    StreamType, SurfaceConfig, ViewError, Viewport,
};
use parking_lot::Mutex;

// =============================================================================
// Frames
// =============================================================================

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 2;

pub fn geometry() -> FrameGeometry {
    FrameGeometry::packed(WIDTH, HEIGHT, PixelFormat::Rgba8)
}

pub fn stream_info(pool_size: u32) -> StreamInfo {
    StreamInfo {
        geometry: geometry(),
        pool_size,
    }
}

/// Stream announced with a geometry other than the default frames'.
pub fn resized_stream_info(width: u32, height: u32, pool_size: u32) -> StreamInfo {
    StreamInfo {
        geometry: FrameGeometry::packed(width, height, PixelFormat::Rgba8),
        pool_size,
    }
}

/// CPU frame of `info`'s geometry whose every byte is `tag`.
pub fn cpu_frame_for(info: &StreamInfo, frame_id: u64, tag: u8) -> FrameBufferHandle {
    let geometry = info.geometry;
    let pixels = Bytes::from(vec![tag; geometry.byte_len()]);
    FrameBufferHandle::new(frame_id, frame_id * 1_000, geometry, BufferIdentity(0), pixels)
        .expect("valid frame")
}

/// CPU frame whose every byte is `tag`, so draws can be traced back to it.
pub fn cpu_frame(frame_id: u64, tag: u8) -> FrameBufferHandle {
    let pixels = Bytes::from(vec![tag; geometry().byte_len()]);
    let identity = BufferIdentity(frame_id as u32 % 4);
    FrameBufferHandle::new(frame_id, frame_id * 1_000, geometry(), identity, pixels)
        .expect("valid frame")
}

/// DMA-BUF frame. The fake device reports `tag` (carried as the plane offset)
/// as the drawn content.
pub fn native_frame(frame_id: u64, identity: u32, tag: u8) -> FrameBufferHandle {
    let fd = OwnedFd::from(tempfile::tempfile().expect("tempfile"));
    let native = NativeBuffer::new(fd, 0x3432_4241, tag as u32, WIDTH * 4, None);
    let identity = BufferIdentity(identity);
    FrameBufferHandle::from_native(frame_id, frame_id * 1_000, geometry(), identity, native)
        .expect("valid frame")
}

pub fn test_config() -> SurfaceConfig {
    SurfaceConfig {
        retry: RetryPolicy {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            multiplier: 2.0,
            max_attempts: None,
        },
        ..SurfaceConfig::new("camerad", StreamType::Road, false)
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

pub const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Recording GPU device
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawRecord {
    pub texture: TextureId,
    pub target: TextureTarget,
    pub matrix: Mat4,
    pub viewport: Viewport,
    /// Tag of the frame content the texture held at draw time.
    pub content: Option<u8>,
}

#[derive(Default)]
pub struct FakeGpu {
    pub zero_copy: bool,
    pub failing_programs: HashSet<ProgramKind>,
    /// Plane offsets (content tags) whose import fails.
    pub failing_imports: HashSet<u32>,

    next_id: u32,
    pub live_programs: HashSet<u32>,
    pub live_quads: HashSet<u32>,
    pub live_textures: HashSet<u32>,
    pub live_images: HashSet<u64>,
    pub invalid_destroys: usize,

    texture_content: HashMap<u32, u8>,
    image_content: HashMap<u64, u8>,
    attached: HashMap<u32, u64>,

    pub allocations: Vec<(TextureId, u32, u32)>,
    pub uploads: Vec<TextureId>,
    pub imports: usize,
    pub clears: Vec<Rgba>,
    pub draws: Vec<DrawRecord>,
}

impl FakeGpu {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn live_objects(&self) -> usize {
        self.live_programs.len()
            + self.live_quads.len()
            + self.live_textures.len()
            + self.live_images.len()
    }

    pub fn last_draw(&self) -> Option<DrawRecord> {
        self.draws.last().copied()
    }
}

/// [`GpuDevice`] that records every call. Clones share state, so a test can
/// keep a handle while the surface owns the device.
#[derive(Clone, Default)]
pub struct FakeDevice {
    pub gpu: Arc<Mutex<FakeGpu>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zero_copy() -> Self {
        let device = Self::default();
        device.gpu.lock().zero_copy = true;
        device
    }
}

impl GpuDevice for FakeDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            zero_copy: self.gpu.lock().zero_copy,
        }
    }

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramId> {
        let mut gpu = self.gpu.lock();
        if gpu.failing_programs.contains(&kind) {
            return Err(ViewError::ShaderCompilation(format!("{:?}: 0:1: syntax error", kind)));
        }
        let id = gpu.next();
        gpu.live_programs.insert(id);
        Ok(ProgramId(id))
    }

    fn create_quad(&mut self) -> Result<QuadId> {
        let mut gpu = self.gpu.lock();
        let id = gpu.next();
        gpu.live_quads.insert(id);
        Ok(QuadId(id))
    }

    fn create_texture(&mut self, _target: TextureTarget) -> Result<TextureId> {
        let mut gpu = self.gpu.lock();
        let id = gpu.next();
        gpu.live_textures.insert(id);
        Ok(TextureId(id))
    }

    fn allocate_texture(
        &mut self,
        texture: TextureId,
        width: u32,
        height: u32,
        _format: PixelFormat,
    ) -> Result<()> {
        // Reserving storage discards whatever the texture held, as in GL.
        let mut gpu = self.gpu.lock();
        gpu.texture_content.remove(&texture.0);
        gpu.allocations.push((texture, width, height));
        Ok(())
    }

    fn upload_texture(&mut self, texture: TextureId, upload: &TextureUpload<'_>) -> Result<()> {
        let mut gpu = self.gpu.lock();
        let tag = upload
            .pixels
            .first()
            .copied()
            .ok_or_else(|| ViewError::UploadFailed("empty upload".into()))?;
        gpu.texture_content.insert(texture.0, tag);
        gpu.uploads.push(texture);
        Ok(())
    }

    fn import_image(
        &mut self,
        buffer: &NativeBuffer,
        _geometry: &FrameGeometry,
    ) -> Result<ImageId> {
        let mut gpu = self.gpu.lock();
        gpu.imports += 1;
        if gpu.failing_imports.contains(&buffer.offset) {
            return Err(ViewError::ImportFailed {
                identity: 0,
                reason: "EGL_BAD_MATCH".into(),
            });
        }
        let id = gpu.next() as u64;
        gpu.live_images.insert(id);
        gpu.image_content.insert(id, buffer.offset as u8);
        Ok(ImageId(id))
    }

    fn attach_image(&mut self, texture: TextureId, image: ImageId) -> Result<()> {
        let mut gpu = self.gpu.lock();
        if !gpu.live_images.contains(&image.0) {
            return Err(ViewError::GpuError(format!("image {} is not alive", image.0)));
        }
        gpu.attached.insert(texture.0, image.0);
        Ok(())
    }

    fn clear(&mut self, _viewport: Viewport, color: Rgba) {
        self.gpu.lock().clears.push(color);
    }

    fn draw_quad(&mut self, call: &DrawCall) {
        let mut gpu = self.gpu.lock();
        let content = match call.target {
            TextureTarget::Texture2d => gpu.texture_content.get(&call.texture.0).copied(),
            TextureTarget::External => gpu
                .attached
                .get(&call.texture.0)
                .filter(|image| gpu.live_images.contains(*image))
                .and_then(|image| gpu.image_content.get(image))
                .copied(),
        };
        gpu.draws.push(DrawRecord {
            texture: call.texture,
            target: call.target,
            matrix: call.matrix,
            viewport: call.viewport,
            content,
        });
    }

    fn destroy_image(&mut self, image: ImageId) {
        let mut gpu = self.gpu.lock();
        if !gpu.live_images.remove(&image.0) {
            gpu.invalid_destroys += 1;
        }
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        let mut gpu = self.gpu.lock();
        if !gpu.live_textures.remove(&texture.0) {
            gpu.invalid_destroys += 1;
        }
    }

    fn destroy_program(&mut self, program: ProgramId) {
        let mut gpu = self.gpu.lock();
        if !gpu.live_programs.remove(&program.0) {
            gpu.invalid_destroys += 1;
        }
    }

    fn destroy_quad(&mut self, quad: QuadId) {
        let mut gpu = self.gpu.lock();
        if !gpu.live_quads.remove(&quad.0) {
            gpu.invalid_destroys += 1;
        }
    }
}

// =============================================================================
// Test-driven frame source
// =============================================================================

pub struct SourceState {
    available: AtomicBool,
    drop_connection: AtomicBool,
    info: Mutex<StreamInfo>,
    frames_tx: Sender<FrameBufferHandle>,
    frames_rx: Receiver<FrameBufferHandle>,
    connects: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    endpoints: Mutex<Vec<StreamEndpoint>>,
}

/// Frame source whose producer is the test itself.
#[derive(Clone)]
pub struct FakeSource {
    state: Arc<SourceState>,
}

impl FakeSource {
    pub fn new(info: StreamInfo) -> Self {
        let (frames_tx, frames_rx) = unbounded();
        Self {
            state: Arc::new(SourceState {
                available: AtomicBool::new(true),
                drop_connection: AtomicBool::new(false),
                info: Mutex::new(info),
                frames_tx,
                frames_rx,
                connects: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                endpoints: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A source whose stream does not exist.
    pub fn unavailable(info: StreamInfo) -> Self {
        let source = Self::new(info);
        source.set_available(false);
        source
    }

    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    pub fn publish(&self, frame: FrameBufferHandle) {
        self.state.frames_tx.send(frame).expect("receiver lives in the source");
    }

    /// Geometry announced by the next connection.
    pub fn set_info(&self, info: StreamInfo) {
        *self.state.info.lock() = info;
    }

    /// Make the live connection report `Disconnected` on its next receive.
    pub fn drop_connection(&self) {
        self.state.drop_connection.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn active_connections(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    pub fn max_active_connections(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<StreamEndpoint> {
        self.state.endpoints.lock().clone()
    }

    pub fn queued(&self) -> usize {
        self.state.frames_rx.len()
    }
}

impl FrameSourceConnector for FakeSource {
    fn connect(
        &self,
        endpoint: &StreamEndpoint,
        stop: &StopSignal,
    ) -> Result<Box<dyn FrameConnection>> {
        if stop.is_stopped() {
            return Err(ViewError::Cancelled);
        }
        self.state.endpoints.lock().push(endpoint.clone());
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(ViewError::NotFound(endpoint.service_name()));
        }

        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
            info: *self.state.info.lock(),
        }))
    }
}

struct FakeConnection {
    state: Arc<SourceState>,
    info: StreamInfo,
}

impl FrameConnection for FakeConnection {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn receive_next(&mut self, stop: &StopSignal) -> Result<FrameBufferHandle> {
        loop {
            if stop.is_stopped() {
                return Err(ViewError::Cancelled);
            }
            if self.state.drop_connection.swap(false, Ordering::SeqCst) {
                return Err(ViewError::Disconnected("producer exited".into()));
            }
            match self.state.frames_rx.recv_timeout(Duration::from_millis(1)) {
                Ok(frame) => return Ok(frame),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ViewError::Disconnected("frame queue closed".into()))
                }
            }
        }
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
    }
}
