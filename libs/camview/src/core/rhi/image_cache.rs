// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Fixed-size map from buffer identity to imported image.
//!
//! Buffer identity `i` always lives in slot `i % capacity`, so with capacity
//! equal to the producer's pool size each identity owns its own slot and an
//! entry is only ever replaced when its identity is reused for a different
//! buffer. The cache hands evicted images back to the caller, which owns
//! destroying them on the render thread.

use super::ImageId;
use crate::core::frames::{BufferIdentity, NativeBuffer};

struct CachedImage {
    identity: BufferIdentity,
    /// Kept alive so the descriptor cannot be recycled while the image exists.
    source: NativeBuffer,
    image: ImageId,
}

pub struct ImageCache {
    slots: Vec<Option<CachedImage>>,
}

impl ImageCache {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity.max(1), || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, identity: BufferIdentity) -> usize {
        identity.0 as usize % self.slots.len()
    }

    /// Image previously imported for exactly this identity and descriptor.
    pub fn lookup(&self, identity: BufferIdentity, source: &NativeBuffer) -> Option<ImageId> {
        match &self.slots[self.slot(identity)] {
            Some(cached)
                if cached.identity == identity
                    && cached.source.fingerprint() == source.fingerprint() =>
            {
                Some(cached.image)
            }
            _ => None,
        }
    }

    /// Store `image`, returning whatever occupied the slot before.
    pub fn insert(
        &mut self,
        identity: BufferIdentity,
        source: NativeBuffer,
        image: ImageId,
    ) -> Option<ImageId> {
        let slot = self.slot(identity);
        let previous = self.slots[slot].replace(CachedImage {
            identity,
            source,
            image,
        });
        previous.map(|evicted| {
            tracing::trace!(
                "ImageCache: buffer {} replaces buffer {} in slot {}",
                identity.0,
                evicted.identity.0,
                slot
            );
            evicted.image
        })
    }

    /// Empty the cache, returning every image it held.
    pub fn drain(&mut self) -> Vec<ImageId> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.take().map(|cached| cached.image))
            .collect()
    }

    /// Empty the cache and change its capacity.
    pub fn reset(&mut self, capacity: usize) -> Vec<ImageId> {
        let images = self.drain();
        self.slots.resize_with(capacity.max(1), || None);
        images
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
