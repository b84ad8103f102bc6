// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

/// How an error is handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The surface cannot render. Reported to the host, never retried.
    Fatal,
    /// Connection-level failure. The receive worker retries with backoff.
    Transient,
    /// One frame could not be bound. The previous frame stays on screen.
    PerFrame,
    /// Not a failure from the user's point of view. Having no frame yet is
    /// not an error at all: the surface is simply idle.
    Benign,
}

#[derive(Error, Debug)]
pub enum ViewError {
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("GPU operation failed: {0}")]
    GpuError(String),

    #[error("Image import failed for buffer {identity}: {reason}")]
    ImportFailed { identity: u32, reason: String },

    #[error("Texture upload failed: {0}")]
    UploadFailed(String),

    #[error("Stream not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Stream disconnected: {0}")]
    Disconnected(String),

    #[error("Stale frame: {0}")]
    Stale(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ViewError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ViewError::ShaderCompilation(_)
            | ViewError::GpuError(_)
            | ViewError::Configuration(_)
            | ViewError::NotSupported(_)
            | ViewError::Other(_) => ErrorSeverity::Fatal,
            ViewError::NotFound(_)
            | ViewError::Timeout(_)
            | ViewError::Disconnected(_)
            | ViewError::Stale(_)
            | ViewError::Io(_) => ErrorSeverity::Transient,
            ViewError::ImportFailed { .. } | ViewError::UploadFailed(_) => ErrorSeverity::PerFrame,
            ViewError::Cancelled => ErrorSeverity::Benign,
        }
    }

    /// True when the connection must be re-established rather than the
    /// receive retried.
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, ViewError::Disconnected(_) | ViewError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ViewError>;
