use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Startup cannot proceed: bad settings, or the device refused to open or
    /// rejected the format descriptor.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to write frame to {}: {source}", path.display())]
    DeviceIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("frame buffer size mismatch: got {actual} bytes, device expects {expected}")]
    FrameSize { expected: usize, actual: usize },
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    /// Whether reopening the device could clear this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::DeviceIo { .. })
    }
}
