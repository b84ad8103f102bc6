// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! DMA-BUF exports of a producer's buffer pool.
//!
//! Fetched once per connection from the producer's export socket; frames
//! then refer to their buffer by `buffer_index` only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camview_ipc_types::export_socket_name;

use crate::core::frames::{BufferIdentity, NativeBuffer, StreamEndpoint};
use crate::core::{Result, ViewError};

/// Directory export sockets live in when none is configured.
pub fn default_socket_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Export socket of `endpoint` inside `dir`.
pub fn socket_path(dir: &Path, endpoint: &StreamEndpoint) -> PathBuf {
    dir.join(export_socket_name(endpoint.name(), endpoint.stream_type()))
}

/// Native descriptors of every exported pool slot.
#[derive(Debug, Default)]
pub struct BufferExports {
    buffers: HashMap<BufferIdentity, NativeBuffer>,
}

impl BufferExports {
    pub fn get(&self, identity: BufferIdentity) -> Option<&NativeBuffer> {
        self.buffers.get(&identity)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Connect to the export socket at `path` and receive the whole pool.
    #[cfg(target_os = "linux")]
    pub fn fetch(path: &Path, timeout: Duration) -> Result<Self> {
        use std::os::unix::net::UnixStream;

        let stream = UnixStream::connect(path).map_err(|e| socket_error(path, e))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| socket_error(path, e))?;
        let received =
            camview_surface_client::receive_buffers(&stream).map_err(|e| socket_error(path, e))?;

        let buffers = received
            .into_iter()
            .map(|buffer| {
                let export = buffer.export;
                let native = NativeBuffer::new(
                    buffer.fd,
                    export.fourcc,
                    export.offset,
                    export.pitch,
                    export.modifier,
                );
                (BufferIdentity(export.buffer_index), native)
            })
            .collect();
        Ok(Self { buffers })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn fetch(path: &Path, _timeout: Duration) -> Result<Self> {
        Err(ViewError::NotSupported(format!(
            "DMA-BUF export socket {} on a non-Linux target",
            path.display()
        )))
    }
}

fn socket_error(path: &Path, e: std::io::Error) -> ViewError {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused => {
            ViewError::NotFound(path.display().to_string())
        }
        ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            ViewError::Timeout(format!("export socket {}: {}", path.display(), e))
        }
        _ => ViewError::Disconnected(format!("export socket {}: {}", path.display(), e)),
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use std::fs::File;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixListener;

    use camview_ipc_types::StreamType;
    use camview_surface_client::{send_buffers, BufferExport};

    use super::*;

    #[test]
    fn fetch_maps_pool_by_buffer_index() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = StreamEndpoint::new("camerad", StreamType::Road).unwrap();
        let path = socket_path(dir.path(), &endpoint);
        let listener = UnixListener::bind(&path).unwrap();

        let producer = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let files: Vec<File> = (0..3)
                .map(|_| {
                    let mut file = tempfile::tempfile().unwrap();
                    file.write_all(b"pixels").unwrap();
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
                        pitch: 2560 + i as u32,
                        modifier: None,
                    };
                    (export, file.as_fd())
                })
                .collect();
            send_buffers(&stream, &pool).unwrap();
        });

        let exports = BufferExports::fetch(&path, Duration::from_secs(2)).unwrap();
        producer.join().unwrap();

        assert_eq!(exports.len(), 3);
        assert_eq!(exports.get(BufferIdentity(2)).unwrap().pitch, 2562);
        assert!(exports.get(BufferIdentity(3)).is_none());
        let first = exports.get(BufferIdentity(0)).unwrap();
        let second = exports.get(BufferIdentity(1)).unwrap();
        assert_ne!(first.raw_fd(), second.raw_fd());
    }

    #[test]
    fn missing_socket_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");
        let result = BufferExports::fetch(&path, Duration::from_millis(50));
        assert!(matches!(result, Err(ViewError::NotFound(_))));
    }

    #[test]
    fn silent_producer_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.sock");
        let _listener = UnixListener::bind(&path).unwrap();

        let result = BufferExports::fetch(&path, Duration::from_millis(50));
        assert!(matches!(result, Err(ViewError::Timeout(_))));
    }

    #[test]
    fn socket_path_uses_stream_naming() {
        let endpoint = StreamEndpoint::new("camerad", StreamType::WideRoad).unwrap();
        assert_eq!(
            socket_path(Path::new("/run/user/1000"), &endpoint),
            PathBuf::from("/run/user/1000/camview-camerad-wide_road.sock")
        );
    }
}
