// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Surface configuration, loadable from `camview.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::frames::{Rgba, StreamEndpoint, StreamType};
use crate::core::{Result, ViewError};

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Give up after this many consecutive failed connects. `None` retries
    /// until the surface is hidden.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let ms = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Everything needed to construct a render surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub stream_name: String,
    #[serde(with = "stream_type_name")]
    pub stream_type: StreamType,
    /// Fill the viewport and crop instead of letterboxing.
    pub zoomed: bool,
    pub background: Rgba,
    pub retry: RetryPolicy,
    /// How long `connect` waits for the first frame.
    pub connect_timeout_ms: u64,
    /// Sleep between polls of the shared-memory subscriber.
    pub receive_poll_interval_us: u64,
    /// How long the producer may be absent before the stream counts as disconnected.
    pub liveness_grace_ms: u64,
    /// Imported-image cache size used when the producer does not announce its pool size.
    pub image_cache_capacity: usize,
    /// Import the producer's DMA-BUF exports instead of copying pixels, when
    /// the GPU device supports it.
    pub zero_copy: bool,
    /// Directory holding the producer's export sockets. Defaults to
    /// `$XDG_RUNTIME_DIR`, else `/tmp`.
    pub export_socket_dir: Option<PathBuf>,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            stream_name: "camerad".to_string(),
            stream_type: StreamType::Road,
            zoomed: false,
            background: Rgba::BLACK,
            retry: RetryPolicy::default(),
            connect_timeout_ms: 1_000,
            receive_poll_interval_us: 500,
            liveness_grace_ms: 2_000,
            image_cache_capacity: 8,
            zero_copy: true,
            export_socket_dir: None,
            log_filter: "info".to_string(),
        }
    }
}

impl SurfaceConfig {
    pub const FILE_NAME: &'static str = "camview.toml";

    pub fn new(stream_name: impl Into<String>, stream_type: StreamType, zoomed: bool) -> Self {
        Self {
            stream_name: stream_name.into(),
            stream_type,
            zoomed,
            ..Self::default()
        }
    }

    /// Load from a file. Errors if the file is missing, unparseable or invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ViewError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            ViewError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;

        tracing::info!("Loaded surface config from {}", path.display());
        Ok(config)
    }

    /// Load from a file, falling back to defaults when it is missing or bad.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!("No {} found, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;
        if self.receive_poll_interval_us == 0 {
            return Err(ViewError::Configuration(
                "receive_poll_interval_us must be > 0".into(),
            ));
        }
        if self.image_cache_capacity == 0 {
            return Err(ViewError::Configuration(
                "image_cache_capacity must be > 0".into(),
            ));
        }
        if self
            .export_socket_dir
            .as_ref()
            .is_some_and(|dir| !dir.is_absolute())
        {
            return Err(ViewError::Configuration(
                "export_socket_dir must be an absolute path".into(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ViewError::Configuration(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(ViewError::Configuration(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<StreamEndpoint> {
        StreamEndpoint::new(self.stream_name.clone(), self.stream_type)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn receive_poll_interval(&self) -> Duration {
        Duration::from_micros(self.receive_poll_interval_us)
    }

    pub fn liveness_grace(&self) -> Duration {
        Duration::from_millis(self.liveness_grace_ms)
    }

    pub fn export_socket_dir(&self) -> PathBuf {
        self.export_socket_dir
            .clone()
            .unwrap_or_else(crate::core::source::default_socket_dir)
    }
}

mod stream_type_name {
    use super::StreamType;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &StreamType, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StreamType, D::Error> {
        let name = String::deserialize(deserializer)?;
        StreamType::parse(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown stream type {:?}", name)))
    }
}
