// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use camview_ipc_types::{service_name, StreamType, MAX_STREAM_NAME_LEN};

use crate::core::{Result, ViewError};

/// Identifies one logical video stream offered by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamEndpoint {
    name: String,
    stream_type: StreamType,
}

impl StreamEndpoint {
    pub fn new(name: impl Into<String>, stream_type: StreamType) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_STREAM_NAME_LEN {
            return Err(ViewError::Configuration(format!(
                "stream name must be 1..={} bytes, got {:?}",
                MAX_STREAM_NAME_LEN, name
            )));
        }
        if name.contains('/') {
            return Err(ViewError::Configuration(format!(
                "stream name must not contain '/': {:?}",
                name
            )));
        }
        Ok(Self { name, stream_type })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    /// Same stream name, different stream type.
    pub fn with_stream_type(&self, stream_type: StreamType) -> Self {
        Self {
            name: self.name.clone(),
            stream_type,
        }
    }

    /// iceoryx2 service this endpoint is published on.
    pub fn service_name(&self) -> String {
        service_name(&self.name, self.stream_type)
    }
}

impl std::fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.stream_type)
    }
}
