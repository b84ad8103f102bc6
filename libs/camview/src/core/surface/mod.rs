// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod controller;
mod frame_slot;
mod notifications;
mod worker;

pub use controller::{FrameState, RenderSurface, SurfaceEventHandler, SurfaceState};
pub use frame_slot::{FrameSlot, SlotUpdate};
pub use notifications::{
    Notifier, RepaintCallback, SurfaceNotification, FRAME_NOTIFICATION_LIMIT, SUBSCRIBER_CAPACITY,
};
pub use worker::{ConnectionState, ReceiveWorker, WorkerShared};
