// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The render surface: binds the receive worker, GPU resources and view
//! transform to the host's lifecycle events.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use super::notifications::{RepaintCallback, SurfaceNotification};
use super::worker::{ConnectionState, ReceiveWorker, WorkerShared};
use crate::core::config::SurfaceConfig;
use crate::core::frames::{Rgba, StreamEndpoint, StreamInfo, StreamType};
use crate::core::rhi::{BoundTexture, GpuDevice, GpuResources};
use crate::core::source::{FrameSourceConnector, Iceoryx2FrameSource, ReceiveSettings};
use crate::core::transform::{Mat4, ViewTransform, Viewport};
use crate::core::{ErrorSeverity, Result};

/// Host events a surface reacts to.
///
/// All methods are called on the host's render/event thread. Graphics
/// methods (`initialize_graphics`, `paint`, `release_graphics`) expect the
/// host's graphics context to be current.
pub trait SurfaceEventHandler {
    /// The graphics context is ready. Errors here are fatal for the surface.
    fn initialize_graphics(&mut self) -> Result<()>;

    /// Draw the latest frame, or the background color if there is none.
    /// Only fatal GPU errors are returned.
    fn paint(&mut self) -> Result<()>;

    /// The drawable changed size, in physical pixels.
    fn resize(&mut self, width: i32, height: i32);

    /// The surface became visible. Starts receiving unless graphics
    /// initialization has failed.
    fn show(&mut self) -> Result<()>;

    /// The surface was hidden. Stops receiving and forgets all frames.
    fn hide(&mut self);

    fn pointer_released(&mut self);

    /// The graphics context is about to go away.
    fn release_graphics(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Nothing to show; paints the background color.
    Idle,
    /// A frame is pending or on screen.
    HasFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    Uninitialized,
    GraphicsReady(FrameState),
    /// Graphics initialization failed; the surface will not render.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Graphics {
    Uninitialized,
    Ready,
    Failed,
}

/// Displays one camera stream on a host-provided GPU surface.
pub struct RenderSurface<D: GpuDevice> {
    config: SurfaceConfig,
    endpoint: StreamEndpoint,
    connector: Arc<dyn FrameSourceConnector>,
    shared: Arc<WorkerShared>,
    worker: Option<ReceiveWorker>,
    gpu: GpuResources<D>,
    graphics: Graphics,
    visible: bool,
    viewport: Viewport,
    transform: ViewTransform,
    stream_info: Option<StreamInfo>,
    /// Frame on screen, redrawn on every paint until a newer one is bound.
    current: Option<BoundTexture>,
}

impl<D: GpuDevice> RenderSurface<D> {
    /// Surface reading from the iceoryx2 frame channel.
    ///
    /// DMA-BUF exports are only requested when `config.zero_copy` is set and
    /// `device` can import them.
    pub fn new(config: SurfaceConfig, device: D) -> Result<Self> {
        let mut settings = ReceiveSettings::from_config(&config);
        settings.zero_copy &= device.capabilities().zero_copy;
        let connector = Arc::new(Iceoryx2FrameSource::new(settings));
        Self::with_connector(config, device, connector)
    }

    pub fn with_connector(
        config: SurfaceConfig,
        device: D,
        connector: Arc<dyn FrameSourceConnector>,
    ) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let gpu = GpuResources::new(device, config.image_cache_capacity);
        tracing::debug!("[{}] RenderSurface created (zoomed={})", endpoint, config.zoomed);

        Ok(Self {
            config,
            endpoint,
            connector,
            shared: Arc::new(WorkerShared::new()),
            worker: None,
            gpu,
            graphics: Graphics::Uninitialized,
            visible: false,
            viewport: Viewport::default(),
            transform: ViewTransform::new(),
            stream_info: None,
            current: None,
        })
    }

    pub fn state(&self) -> SurfaceState {
        match self.graphics {
            Graphics::Uninitialized => SurfaceState::Uninitialized,
            Graphics::Failed => SurfaceState::Failed,
            Graphics::Ready if self.current.is_some() || self.shared.slot.has_frame() => {
                SurfaceState::GraphicsReady(FrameState::HasFrame)
            }
            Graphics::Ready => SurfaceState::GraphicsReady(FrameState::Idle),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection_state()
    }

    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.stream_info
    }

    pub fn background_color(&self) -> Rgba {
        self.config.background
    }

    pub fn is_zoomed(&self) -> bool {
        self.config.zoomed
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_receiving(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    /// Id of the frame currently on screen.
    pub fn displayed_frame_id(&self) -> Option<u64> {
        self.current.map(|bound| bound.frame_id)
    }

    pub fn view_matrix(&self) -> &Mat4 {
        self.transform.matrix()
    }

    pub fn resources(&self) -> &GpuResources<D> {
        &self.gpu
    }

    pub fn subscribe(&self) -> Receiver<SurfaceNotification> {
        self.shared.notifier.subscribe()
    }

    pub fn set_repaint_callback(&self, callback: Option<RepaintCallback>) {
        self.shared.notifier.set_repaint_callback(callback);
    }

    /// Switch to another stream of the same producer.
    ///
    /// The current connection is stopped and joined, every frame of the old
    /// stream is discarded and, if visible, a connection to the new stream is
    /// started. The surface shows the background until the new stream's first
    /// frame arrives.
    pub fn set_stream_type(&mut self, stream_type: StreamType) -> Result<()> {
        if stream_type == self.endpoint.stream_type() {
            return Ok(());
        }
        tracing::info!("[{}] Switching to stream type {}", self.endpoint, stream_type);

        self.stop_worker();
        self.forget_frames();
        self.endpoint = self.endpoint.with_stream_type(stream_type);
        self.config.stream_type = stream_type;

        if self.visible {
            self.start_worker()?;
        }
        self.shared.notifier.request_repaint();
        Ok(())
    }

    pub fn set_background_color(&mut self, color: Rgba) {
        if self.config.background != color {
            self.config.background = color;
            self.shared.notifier.request_repaint();
        }
    }

    pub fn set_zoomed(&mut self, zoomed: bool) {
        if self.config.zoomed != zoomed {
            self.config.zoomed = zoomed;
            self.update_transform();
            self.shared.notifier.request_repaint();
        }
    }

    fn start_worker(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let worker = ReceiveWorker::spawn(
            Arc::clone(&self.connector),
            self.endpoint.clone(),
            self.config.retry.clone(),
            Arc::clone(&self.shared),
        )?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop and join the worker. No connection remains once this returns.
    fn stop_worker(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop_and_join();
        }
    }

    fn forget_frames(&mut self) {
        if self.shared.slot.clear() {
            tracing::debug!("[{}] Discarded pending frame", self.endpoint);
        }
        self.current = None;
        self.stream_info = None;
        self.transform.invalidate();
    }

    fn update_transform(&mut self) {
        if let Some(bound) = self.current {
            self.transform
                .update(self.viewport, bound.width, bound.height, self.config.zoomed);
        }
    }
}

impl<D: GpuDevice> SurfaceEventHandler for RenderSurface<D> {
    fn initialize_graphics(&mut self) -> Result<()> {
        match self.graphics {
            Graphics::Ready => return Ok(()),
            Graphics::Failed | Graphics::Uninitialized => {}
        }

        if let Err(e) = self.gpu.initialize() {
            tracing::error!("[{}] Graphics initialization failed: {}", self.endpoint, e);
            self.graphics = Graphics::Failed;
            return Err(e);
        }
        self.graphics = Graphics::Ready;
        tracing::debug!("[{}] Graphics ready", self.endpoint);

        if let Some(info) = self.stream_info {
            if let Err(e) = self.gpu.prepare_stream(&info) {
                tracing::warn!("[{}] Could not pre-size textures: {}", self.endpoint, e);
            }
        }
        if self.visible {
            self.start_worker()?;
        }
        Ok(())
    }

    fn paint(&mut self) -> Result<()> {
        if self.graphics != Graphics::Ready {
            return Ok(());
        }

        let update = self.shared.slot.take();
        if let Some(info) = update.info {
            if let Err(e) = self.gpu.prepare_stream(&info) {
                tracing::warn!("[{}] Could not pre-size textures: {}", self.endpoint, e);
            }
            self.stream_info = Some(info);
            self.transform.invalidate();
        }

        if let Some(frame) = update.frame {
            match self.gpu.bind(&frame) {
                Ok(bound) => {
                    self.current = Some(bound);
                }
                Err(e) if e.severity() == ErrorSeverity::PerFrame => {
                    tracing::warn!(
                        "[{}] Skipping frame {}: {}",
                        self.endpoint,
                        frame.frame_id(),
                        e
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "[{}] Binding frame {} failed: {}",
                        self.endpoint,
                        frame.frame_id(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        if self.viewport.is_empty() {
            return Ok(());
        }

        let background = self.config.background;
        match self.current {
            Some(bound) => {
                self.update_transform();
                if self.transform.is_drawable() {
                    self.gpu
                        .draw(&bound, self.transform.matrix(), self.viewport, background)?;
                } else {
                    self.gpu.clear(self.viewport, background);
                }
            }
            None => self.gpu.clear(self.viewport, background),
        }
        Ok(())
    }

    fn resize(&mut self, width: i32, height: i32) {
        self.viewport = Viewport::new(width, height);
        self.update_transform();
        tracing::trace!("[{}] Resized to {}x{}", self.endpoint, width, height);
    }

    fn show(&mut self) -> Result<()> {
        self.visible = true;
        if self.graphics == Graphics::Failed {
            tracing::debug!("[{}] Shown with failed graphics, not receiving", self.endpoint);
            return Ok(());
        }
        self.start_worker()
    }

    fn hide(&mut self) {
        self.visible = false;
        self.stop_worker();
        self.forget_frames();
    }

    fn pointer_released(&mut self) {
        self.shared.notifier.notify(SurfaceNotification::Clicked);
    }

    fn release_graphics(&mut self) {
        // Joining first guarantees no frame can reference torn-down objects.
        self.stop_worker();
        self.current = None;
        self.gpu.teardown();
        if self.graphics == Graphics::Ready {
            tracing::debug!("[{}] Graphics released", self.endpoint);
        }
        self.graphics = Graphics::Uninitialized;
    }
}

impl<D: GpuDevice> Drop for RenderSurface<D> {
    fn drop(&mut self) {
        self.stop_worker();
        if self.gpu.is_initialized() {
            tracing::warn!(
                "[{}] Dropped without release_graphics; GPU objects are left to the context",
                self.endpoint
            );
        }
    }
}
