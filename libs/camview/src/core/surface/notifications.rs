// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Notifications posted to the host.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::core::frames::StreamInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceNotification {
    /// A connection was established; sent before its first frame.
    Connected(StreamInfo),
    /// A frame was handed to the render thread.
    FrameReceived { frame_id: u64 },
    /// An established connection was lost. The worker reconnects.
    Disconnected,
    /// The worker gave up after `attempts` failed connects.
    ConnectionFailed { attempts: u32 },
    /// The pointer was released over the surface.
    Clicked,
}

/// Notifications a subscriber can hold before new ones are dropped.
pub const SUBSCRIBER_CAPACITY: usize = 64;

/// `FrameReceived` is only queued while a subscriber holds fewer than this
/// many notifications, keeping room for the rarer events.
pub const FRAME_NOTIFICATION_LIMIT: usize = SUBSCRIBER_CAPACITY / 2;

/// Called from the receive worker when the surface needs a repaint.
pub type RepaintCallback = Arc<dyn Fn() + Send + Sync>;

/// Fan-out of notifications to every subscriber, plus the repaint hook.
#[derive(Clone, Default)]
pub struct Notifier {
    subscribers: Arc<Mutex<Vec<Sender<SurfaceNotification>>>>,
    repaint: Arc<Mutex<Option<RepaintCallback>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receiver of every notification from now on. A subscriber that does
    /// not keep up loses `FrameReceived` first; nothing ever queues beyond
    /// [`SUBSCRIBER_CAPACITY`].
    pub fn subscribe(&self) -> Receiver<SurfaceNotification> {
        let (tx, rx) = bounded(SUBSCRIBER_CAPACITY);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn set_repaint_callback(&self, callback: Option<RepaintCallback>) {
        *self.repaint.lock() = callback;
    }

    /// Send to all subscribers without blocking, forgetting those whose
    /// receiver is gone.
    pub fn notify(&self, notification: SurfaceNotification) {
        let per_frame = matches!(notification, SurfaceNotification::FrameReceived { .. });
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| {
            if per_frame && tx.len() >= FRAME_NOTIFICATION_LIMIT {
                return true;
            }
            match tx.try_send(notification.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(dropped)) => {
                    tracing::debug!("Subscriber is full, dropping {:?}", dropped);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }

    pub fn request_repaint(&self) {
        // Clone out so the callback never runs under the lock.
        let callback = self.repaint.lock().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscriber_count())
            .field("repaint", &self.repaint.lock().is_some())
            .finish()
    }
}
