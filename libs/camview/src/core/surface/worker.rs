// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Background connect/receive thread.
//!
//! The worker never touches GPU state. It connects, receives frames into the
//! shared [`FrameSlot`] and reconnects with backoff until it is stopped or the
//! retry policy gives up.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use super::frame_slot::FrameSlot;
use super::notifications::{Notifier, SurfaceNotification};
use crate::core::config::RetryPolicy;
use crate::core::frames::StreamEndpoint;
use crate::core::source::{FrameConnection, FrameSourceConnector};
use crate::core::sync::StopSignal;
use crate::core::{ErrorSeverity, Result, ViewError};

/// Connection state as seen by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// State shared between the worker and the render thread.
#[derive(Default)]
pub struct WorkerShared {
    pub slot: FrameSlot,
    pub notifier: Notifier,
    state: Mutex<ConnectionState>,
}

impl WorkerShared {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

/// Handle to a running receive thread. Dropping it stops and joins the thread.
pub struct ReceiveWorker {
    endpoint: StreamEndpoint,
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
}

impl ReceiveWorker {
    pub fn spawn(
        connector: Arc<dyn FrameSourceConnector>,
        endpoint: StreamEndpoint,
        retry: RetryPolicy,
        shared: Arc<WorkerShared>,
    ) -> Result<Self> {
        let stop = StopSignal::new();
        let handle = {
            let stop = stop.clone();
            let endpoint = endpoint.clone();
            std::thread::Builder::new()
                .name(format!("camview-recv-{}", endpoint.stream_type()))
                .spawn(move || run(connector.as_ref(), &endpoint, &retry, &shared, &stop))?
        };
        tracing::debug!("[{}] Receive worker started", endpoint);
        Ok(Self {
            endpoint,
            stop,
            handle: Some(handle),
        })
    }

    /// True once the thread has exited on its own (retries exhausted).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal the thread and wait for it. Returns once no connection to the
    /// endpoint remains.
    pub fn stop_and_join(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("[{}] Receive worker panicked", self.endpoint);
            } else {
                tracing::debug!("[{}] Receive worker joined", self.endpoint);
            }
        }
    }
}

impl Drop for ReceiveWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run(
    connector: &dyn FrameSourceConnector,
    endpoint: &StreamEndpoint,
    retry: &RetryPolicy,
    shared: &WorkerShared,
    stop: &StopSignal,
) {
    let mut failures = 0u32;

    while !stop.is_stopped() {
        shared.set_state(ConnectionState::Connecting);
        match connector.connect(endpoint, stop) {
            Ok(mut connection) => {
                failures = 0;
                let info = connection.info();
                shared.set_state(ConnectionState::Connected);
                shared.slot.announce(info);
                shared.notifier.notify(SurfaceNotification::Connected(info));
                shared.notifier.request_repaint();

                let reason = receive_frames(connection.as_mut(), shared, stop);
                drop(connection);
                shared.set_state(ConnectionState::Disconnected);

                if matches!(reason, ViewError::Cancelled) {
                    break;
                }
                if reason.requires_reconnect() {
                    tracing::info!("[{}] Connection lost: {}", endpoint, reason);
                } else {
                    tracing::warn!("[{}] Connection ended on error: {}", endpoint, reason);
                }
                shared.notifier.notify(SurfaceNotification::Disconnected);
            }
            Err(ViewError::Cancelled) => break,
            Err(e) if e.severity() == ErrorSeverity::Fatal => {
                tracing::error!("[{}] Cannot connect: {}", endpoint, e);
                shared.set_state(ConnectionState::Disconnected);
                shared
                    .notifier
                    .notify(SurfaceNotification::ConnectionFailed { attempts: failures + 1 });
                break;
            }
            Err(e) => {
                failures += 1;
                shared.set_state(ConnectionState::Disconnected);
                if retry.exhausted(failures) {
                    tracing::warn!("[{}] Giving up after {} attempts: {}", endpoint, failures, e);
                    shared
                        .notifier
                        .notify(SurfaceNotification::ConnectionFailed { attempts: failures });
                    break;
                }

                let delay = retry.delay(failures);
                if failures == 1 {
                    tracing::warn!(
                        "[{}] Connect failed ({}), retrying in {:?}",
                        endpoint,
                        e,
                        delay
                    );
                } else {
                    tracing::debug!(
                        "[{}] Connect attempt {} failed ({}), retrying in {:?}",
                        endpoint,
                        failures,
                        e,
                        delay
                    );
                }
                if stop.wait_timeout(delay) {
                    break;
                }
            }
        }
    }

    shared.set_state(ConnectionState::Disconnected);
    tracing::debug!("[{}] Receive worker exiting", endpoint);
}

/// Receive until the connection ends. Returns why it ended.
///
/// A stale or late frame only costs that frame; anything else ends the
/// connection.
fn receive_frames(
    connection: &mut dyn FrameConnection,
    shared: &WorkerShared,
    stop: &StopSignal,
) -> ViewError {
    loop {
        match connection.receive_next(stop) {
            Ok(frame) => {
                let frame_id = frame.frame_id();
                if let Some(dropped) = shared.slot.post(frame) {
                    tracing::trace!(
                        "Frame {} superseded by {} before display",
                        dropped.frame_id(),
                        frame_id
                    );
                }
                shared.notifier.notify(SurfaceNotification::FrameReceived { frame_id });
                shared.notifier.request_repaint();
            }
            Err(e @ (ViewError::Stale(_) | ViewError::Timeout(_))) => {
                tracing::debug!("Skipping frame: {}", e);
            }
            Err(e) => return e,
        }
    }
}
