// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! iceoryx2 frame source.
//!
//! The producer publishes each frame as a `[u8]` slice sample with a
//! [`FrameHeader`] user header on `camview/{stream_name}/{stream_type}`.
//!
//! Frames flagged with `FRAME_FLAG_DMA_BUF` live in a pool slot the producer
//! also exports as a DMA-BUF. With zero-copy on, the pool's fds are fetched
//! once per connection from the stream's export socket and each frame is
//! handed out as a native descriptor without touching its pixels. Otherwise
//! pixels are copied out of the sample into refcounted [`Bytes`] so the
//! sample can be returned to the producer's pool before the frame is drawn.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use bytes::Bytes;
use camview_ipc_types::FrameHeader;
use iceoryx2::node::Node;
use iceoryx2::port::subscriber::Subscriber;
use iceoryx2::prelude::*;
use iceoryx2::sample::Sample;
use iceoryx2::service::builder::publish_subscribe::PublishSubscribeOpenError;
use iceoryx2::service::port_factory::publish_subscribe::PortFactory;
use iceoryx2::service::port_factory::PortFactory as _;

use super::dmabuf::{socket_path, BufferExports};
use super::{FrameConnection, FrameSourceConnector};
use crate::core::config::SurfaceConfig;
use crate::core::frames::{
    BufferIdentity, FrameBufferHandle, FrameGeometry, StreamEndpoint, StreamInfo,
};
use crate::core::sync::StopSignal;
use crate::core::{Result, ViewError};

type FrameService = PortFactory<ipc::Service, [u8], FrameHeader>;
type FrameSubscriber = Subscriber<ipc::Service, [u8], FrameHeader>;
type FrameSample = Sample<ipc::Service, [u8], FrameHeader>;

/// Receive knobs for [`Iceoryx2FrameSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveSettings {
    /// How long `connect` waits for the first frame, and for the pool's
    /// DMA-BUF exports.
    pub connect_timeout: Duration,
    /// Sleep between subscriber polls.
    pub poll_interval: Duration,
    /// How long the stream may have no publisher before it counts as gone.
    pub liveness_grace: Duration,
    /// Hand out DMA-BUF frames as native descriptors instead of copies.
    pub zero_copy: bool,
    pub export_socket_dir: PathBuf,
}

impl ReceiveSettings {
    pub fn from_config(config: &SurfaceConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            poll_interval: config.receive_poll_interval(),
            liveness_grace: config.liveness_grace(),
            zero_copy: config.zero_copy,
            export_socket_dir: config.export_socket_dir(),
        }
    }
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self::from_config(&SurfaceConfig::default())
    }
}

/// Connects to camview streams over iceoryx2 shared memory.
#[derive(Debug, Clone, Default)]
pub struct Iceoryx2FrameSource {
    settings: ReceiveSettings,
}

impl Iceoryx2FrameSource {
    pub fn new(settings: ReceiveSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ReceiveSettings {
        &self.settings
    }

    /// DMA-BUF exports for a stream whose first frame is `header`.
    ///
    /// Frames that also carry their pixels fall back to copies when the
    /// exports cannot be fetched; DMA-BUF-only streams cannot.
    fn exports_for(
        &self,
        endpoint: &StreamEndpoint,
        header: &FrameHeader,
        payload_len: usize,
    ) -> Result<Option<BufferExports>> {
        if !header.has_dma_buf() {
            return Ok(None);
        }
        let carries_pixels = payload_len >= header.expected_len();
        if !self.settings.zero_copy {
            if carries_pixels {
                return Ok(None);
            }
            return Err(ViewError::NotSupported(format!(
                "{} publishes DMA-BUF frames only and zero-copy is disabled",
                endpoint
            )));
        }

        let path = socket_path(&self.settings.export_socket_dir, endpoint);
        match BufferExports::fetch(&path, self.settings.connect_timeout) {
            Ok(exports) => {
                tracing::debug!(
                    "[{}] Received {} DMA-BUF exports from {}",
                    endpoint,
                    exports.len(),
                    path.display()
                );
                Ok(Some(exports))
            }
            Err(e) if carries_pixels => {
                tracing::warn!(
                    "[{}] DMA-BUF exports unavailable ({}), copying pixels",
                    endpoint,
                    e
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl FrameSourceConnector for Iceoryx2FrameSource {
    fn connect(
        &self,
        endpoint: &StreamEndpoint,
        stop: &StopSignal,
    ) -> Result<Box<dyn FrameConnection>> {
        let node = NodeBuilder::new().create::<ipc::Service>().map_err(|e| {
            ViewError::Disconnected(format!("Failed to create iceoryx2 node: {:?}", e))
        })?;

        let name = endpoint.service_name();
        let service_name: ServiceName = name.as_str().try_into().map_err(|e| {
            ViewError::Configuration(format!("Invalid service name '{}': {:?}", name, e))
        })?;

        let service = node
            .service_builder(&service_name)
            .publish_subscribe::<[u8]>()
            .user_header::<FrameHeader>()
            .open()
            .map_err(|e| match e {
                PublishSubscribeOpenError::DoesNotExist => ViewError::NotFound(name.clone()),
                other => ViewError::Disconnected(format!(
                    "Failed to open service '{}': {:?}",
                    name, other
                )),
            })?;

        let subscriber = service.subscriber_builder().create().map_err(|e| {
            ViewError::Disconnected(format!("Failed to create subscriber: {:?}", e))
        })?;

        tracing::debug!("[{}] Subscribed to '{}', waiting for first frame", endpoint, name);

        let deadline = Instant::now() + self.settings.connect_timeout;
        let first = loop {
            if stop.is_stopped() {
                return Err(ViewError::Cancelled);
            }
            if let Some(sample) = receive_latest(&subscriber)? {
                break sample;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ViewError::Timeout(format!(
                    "no frame on '{}' within {:?}",
                    name, self.settings.connect_timeout
                )));
            }
            stop.wait_timeout(self.settings.poll_interval.min(deadline - now));
        };

        let header = *first.user_header();
        let info = StreamInfo {
            geometry: FrameGeometry::from_header(&header)?,
            pool_size: header.pool_size,
        };
        let exports = self.exports_for(endpoint, &header, first.payload().len())?;

        let mut connection = Iceoryx2Connection {
            endpoint: endpoint.clone(),
            settings: self.settings.clone(),
            info,
            exports,
            last_frame_id: None,
            first: None,
            subscriber,
            service,
            _node: node,
        };
        let frame = connection.frame_from_sample(&first)?;
        drop(first);
        connection.first = Some(frame);

        tracing::info!(
            "[{}] Connected: {}x{} stride {} {:?}, pool of {}, {}",
            endpoint,
            info.geometry.width,
            info.geometry.height,
            info.geometry.stride,
            info.geometry.format,
            info.pool_size,
            if connection.exports.is_some() { "zero-copy" } else { "copying" }
        );
        Ok(Box::new(connection))
    }
}

/// Drain the subscriber and keep only the newest sample.
fn receive_latest(subscriber: &FrameSubscriber) -> Result<Option<FrameSample>> {
    let mut latest = None;
    loop {
        match subscriber.receive() {
            Ok(Some(sample)) => latest = Some(sample),
            Ok(None) => return Ok(latest),
            Err(e) => return Err(ViewError::Disconnected(format!("Receive failed: {:?}", e))),
        }
    }
}

// Drop order matters: ports before the service, the service before the node.
struct Iceoryx2Connection {
    endpoint: StreamEndpoint,
    settings: ReceiveSettings,
    info: StreamInfo,
    exports: Option<BufferExports>,
    last_frame_id: Option<u64>,
    /// Frame consumed during connect, handed out by the first `receive_next`.
    first: Option<FrameBufferHandle>,
    subscriber: FrameSubscriber,
    service: FrameService,
    _node: Node<ipc::Service>,
}

impl Iceoryx2Connection {
    fn frame_from_sample(&mut self, sample: &FrameSample) -> Result<FrameBufferHandle> {
        let header = *sample.user_header();
        let geometry = FrameGeometry::from_header(&header)?;
        if geometry != self.info.geometry {
            return Err(ViewError::Disconnected(format!(
                "stream {} reconfigured from {}x{} to {}x{}",
                self.endpoint,
                self.info.geometry.width,
                self.info.geometry.height,
                geometry.width,
                geometry.height
            )));
        }
        if let Some(last) = self.last_frame_id {
            if header.frame_id <= last {
                return Err(ViewError::Stale(format!(
                    "frame {} is not newer than {}",
                    header.frame_id, last
                )));
            }
        }

        let identity = BufferIdentity(header.buffer_index);
        let native = match &self.exports {
            Some(exports) if header.has_dma_buf() => exports.get(identity),
            _ => None,
        };
        let frame = match native {
            Some(native) => FrameBufferHandle::from_native(
                header.frame_id,
                header.timestamp_ns,
                geometry,
                identity,
                native.clone(),
            )?,
            None => {
                let payload = sample.payload();
                let Some(pixels) = payload.get(..header.expected_len()) else {
                    return Err(ViewError::Stale(format!(
                        "frame {} carries {} bytes, expected {}, and buffer {} is not exported",
                        header.frame_id,
                        payload.len(),
                        header.expected_len(),
                        identity.0
                    )));
                };
                FrameBufferHandle::new(
                    header.frame_id,
                    header.timestamp_ns,
                    geometry,
                    identity,
                    Bytes::copy_from_slice(pixels),
                )?
            }
        };
        self.last_frame_id = Some(header.frame_id);
        Ok(frame)
    }
}

impl FrameConnection for Iceoryx2Connection {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn receive_next(&mut self, stop: &StopSignal) -> Result<FrameBufferHandle> {
        if let Some(frame) = self.first.take() {
            return Ok(frame);
        }

        let mut absent_since: Option<Instant> = None;
        loop {
            if stop.is_stopped() {
                return Err(ViewError::Cancelled);
            }
            if let Some(sample) = receive_latest(&self.subscriber)? {
                return self.frame_from_sample(&sample);
            }

            if self.service.dynamic_config().number_of_publishers() == 0 {
                let since = *absent_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.settings.liveness_grace {
                    return Err(ViewError::Disconnected(format!(
                        "no publisher on {} for {:?}",
                        self.endpoint, self.settings.liveness_grace
                    )));
                }
            } else {
                absent_since = None;
            }

            stop.wait_timeout(self.settings.poll_interval);
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixListener;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::JoinHandle;

    use camview_ipc_types::{PixelFormat, StreamType, FRAME_FLAG_DMA_BUF};
    use camview_surface_client::{send_buffers, BufferExport};

    use super::*;

    const WIDTH: u32 = 4;
    const HEIGHT: u32 = 2;
    const STRIDE: u32 = 16;
    const POOL: u32 = 3;
    const FRAME_LEN: usize = (STRIDE * HEIGHT) as usize;

    fn unique_endpoint(tag: &str) -> StreamEndpoint {
        let name = format!("test-{}-{}", tag, std::process::id());
        StreamEndpoint::new(name, StreamType::Road).unwrap()
    }

    fn fast_settings(export_socket_dir: &Path) -> ReceiveSettings {
        ReceiveSettings {
            connect_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(1),
            liveness_grace: Duration::from_millis(200),
            zero_copy: true,
            export_socket_dir: export_socket_dir.to_path_buf(),
        }
    }

    struct Publisher {
        running: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
    }

    impl Drop for Publisher {
        fn drop(&mut self) {
            self.running.store(false, Ordering::Relaxed);
            if let Some(thread) = self.thread.take() {
                thread.join().unwrap();
            }
        }
    }

    /// Publish frames cycling through a pool of `POOL` slots until dropped.
    /// `payload_len` is either `FRAME_LEN` or 0 for DMA-BUF-only frames.
    fn publish(endpoint: &StreamEndpoint, flags: u32, payload_len: usize) -> Publisher {
        let name: ServiceName = endpoint.service_name().as_str().try_into().unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = {
            let running = Arc::clone(&running);
            std::thread::spawn(move || {
                let node = NodeBuilder::new().create::<ipc::Service>().unwrap();
                let service = node
                    .service_builder(&name)
                    .publish_subscribe::<[u8]>()
                    .user_header::<FrameHeader>()
                    .create()
                    .unwrap();
                let publisher = service
                    .publisher_builder()
                    .initial_max_slice_len(FRAME_LEN)
                    .create()
                    .unwrap();
                ready_tx.send(()).unwrap();

                let mut frame_id = 0u64;
                while running.load(Ordering::Relaxed) {
                    frame_id += 1;
                    let mut sample = publisher.loan_slice_uninit(payload_len).unwrap();
                    *sample.user_header_mut() = FrameHeader {
                        frame_id,
                        width: WIDTH,
                        height: HEIGHT,
                        stride: STRIDE,
                        format: PixelFormat::Rgba8 as u32,
                        buffer_index: (frame_id % POOL as u64) as u32,
                        pool_size: POOL,
                        flags,
                        ..Default::default()
                    };
                    let sample = sample.write_from_slice(&vec![frame_id as u8; payload_len]);
                    sample.send().unwrap();
                    std::thread::sleep(Duration::from_millis(5));
                }
            })
        };

        ready_rx.recv().unwrap();
        Publisher {
            running,
            thread: Some(thread),
        }
    }

    /// Serve the pool's exports to one consumer.
    fn serve_exports(dir: &Path, endpoint: &StreamEndpoint) -> JoinHandle<()> {
        let listener = UnixListener::bind(socket_path(dir, endpoint)).unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let files: Vec<_> = (0..POOL)
                .map(|_| {
                    let mut file = tempfile::tempfile().unwrap();
                    file.write_all(&[0u8; FRAME_LEN]).unwrap();
                    file
                })
                .collect();
            let pool: Vec<_> = files
                .iter()
                .enumerate()
                .map(|(i, file)| {
                    let export = BufferExport {
                        buffer_index: i as u32,
                        fourcc: 0x3432_4241,
                        offset: 0,
                        pitch: STRIDE,
                        modifier: None,
                    };
                    (export, file.as_fd())
                })
                .collect();
            send_buffers(&stream, &pool).unwrap();
        })
    }

    #[test]
    fn settings_follow_config() {
        let config = SurfaceConfig {
            connect_timeout_ms: 250,
            receive_poll_interval_us: 100,
            liveness_grace_ms: 900,
            zero_copy: false,
            export_socket_dir: Some(PathBuf::from("/run/camview")),
            ..SurfaceConfig::default()
        };
        let settings = ReceiveSettings::from_config(&config);
        assert_eq!(settings.connect_timeout, Duration::from_millis(250));
        assert_eq!(settings.poll_interval, Duration::from_micros(100));
        assert_eq!(settings.liveness_grace, Duration::from_millis(900));
        assert!(!settings.zero_copy);
        assert_eq!(settings.export_socket_dir, PathBuf::from("/run/camview"));
    }

    #[test]
    #[ignore] // Requires shared memory (/dev/shm)
    fn connect_without_producer_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = Iceoryx2FrameSource::new(fast_settings(dir.path()));
        let result = source.connect(&unique_endpoint("absent"), &StopSignal::new());
        assert!(matches!(result, Err(ViewError::NotFound(_))));
    }

    #[test]
    #[ignore] // Requires shared memory (/dev/shm)
    fn receives_frames_from_publisher() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = unique_endpoint("live");
        let _publisher = publish(&endpoint, 0, FRAME_LEN);

        let source = Iceoryx2FrameSource::new(fast_settings(dir.path()));
        let stop = StopSignal::new();
        let mut connection = source.connect(&endpoint, &stop).unwrap();
        assert_eq!(connection.info().pool_size, POOL);
        assert_eq!(connection.info().geometry.width, WIDTH);

        let first = connection.receive_next(&stop).unwrap();
        let second = connection.receive_next(&stop).unwrap();
        assert!(second.frame_id() > first.frame_id());
        assert_eq!(second.pixels().len(), FRAME_LEN);
        assert!(second.native().is_none());
    }

    #[test]
    #[ignore] // Requires shared memory (/dev/shm)
    fn dma_buf_frames_arrive_as_native_buffers() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = unique_endpoint("dmabuf");
        let _publisher = publish(&endpoint, FRAME_FLAG_DMA_BUF, FRAME_LEN);
        let exporter = serve_exports(dir.path(), &endpoint);

        let source = Iceoryx2FrameSource::new(fast_settings(dir.path()));
        let stop = StopSignal::new();
        let mut connection = source.connect(&endpoint, &stop).unwrap();
        exporter.join().unwrap();

        let mut fds = std::collections::HashSet::new();
        for _ in 0..POOL * 2 {
            let frame = connection.receive_next(&stop).unwrap();
            let native = frame.native().expect("frame should carry its DMA-BUF");
            assert!(!frame.has_pixels());
            assert_eq!(native.pitch, STRIDE);
            fds.insert((frame.identity(), native.raw_fd()));
        }
        // One fd per pool slot, reused for every frame in that slot.
        let slots: std::collections::HashSet<_> = fds.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(fds.len(), slots.len());
    }

    #[test]
    #[ignore] // Requires shared memory (/dev/shm)
    fn missing_exports_fall_back_to_copies() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = unique_endpoint("fallback");
        let _publisher = publish(&endpoint, FRAME_FLAG_DMA_BUF, FRAME_LEN);

        let source = Iceoryx2FrameSource::new(fast_settings(dir.path()));
        let stop = StopSignal::new();
        let mut connection = source.connect(&endpoint, &stop).unwrap();

        let frame = connection.receive_next(&stop).unwrap();
        assert!(frame.native().is_none());
        assert_eq!(frame.pixels().len(), FRAME_LEN);
    }

    #[test]
    #[ignore] // Requires shared memory (/dev/shm)
    fn dma_buf_only_stream_needs_zero_copy() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = unique_endpoint("dmabuf-only");
        let _publisher = publish(&endpoint, FRAME_FLAG_DMA_BUF, 0);

        let settings = ReceiveSettings {
            zero_copy: false,
            ..fast_settings(dir.path())
        };
        let result = Iceoryx2FrameSource::new(settings).connect(&endpoint, &StopSignal::new());
        assert!(matches!(result, Err(ViewError::NotSupported(_))));
    }
}
