use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GreinError {
    #[error("invalid count mode: {0} (expected RAW or NORMALIZED)")]
    InvalidMode(String),

    #[error("invalid dataset identifier: {0:?}")]
    InvalidDatasetId(String),

    #[error("failed to contact GREIN at {url}: {message}")]
    Connection { url: String, message: String },

    #[error("streaming request failed: {0}")]
    Streaming(String),

    #[error("streaming endpoint returned status {status}: {message}")]
    StreamingStatus { status: u16, message: String },

    #[error("no frame received from the streaming channel within {0:?}")]
    ReadTimeout(std::time::Duration),

    #[error("fetch deadline exceeded")]
    DeadlineExceeded,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("{resource} request failed: {message}")]
    DataFetch { resource: String, message: String },

    #[error("{resource} returned status {status}: {message}")]
    DataStatus {
        resource: String,
        status: u16,
        message: String,
    },

    #[error("unexpected payload: {0}")]
    Format(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("{step} failed")]
    Step {
        step: &'static str,
        #[source]
        source: Box<GreinError>,
    },
}

/// Coarse error category, stable across step wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Connection,
    Streaming,
    Protocol,
    DataFetch,
    Format,
    Cancelled,
    Config,
    Filesystem,
}

impl GreinError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GreinError::InvalidMode(_) | GreinError::InvalidDatasetId(_) => ErrorKind::Validation,
            GreinError::Connection { .. } => ErrorKind::Connection,
            GreinError::Streaming(_)
            | GreinError::StreamingStatus { .. }
            | GreinError::ReadTimeout(_)
            | GreinError::DeadlineExceeded => ErrorKind::Streaming,
            GreinError::Protocol(_) => ErrorKind::Protocol,
            GreinError::DataFetch { .. } | GreinError::DataStatus { .. } => ErrorKind::DataFetch,
            GreinError::Format(_) => ErrorKind::Format,
            GreinError::Cancelled => ErrorKind::Cancelled,
            GreinError::ConfigRead(_) | GreinError::ConfigParse(_) | GreinError::InvalidConfig(_) => {
                ErrorKind::Config
            }
            GreinError::Filesystem(_) => ErrorKind::Filesystem,
            GreinError::Step { source, .. } => source.kind(),
        }
    }

    /// The innermost error, with every step wrapper removed.
    pub fn root(&self) -> &GreinError {
        match self {
            GreinError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn step(&self) -> Option<&'static str> {
        match self {
            GreinError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

pub trait StepContext<T> {
    fn step(self, step: &'static str) -> Result<T, GreinError>;
}

impl<T> StepContext<T> for Result<T, GreinError> {
    fn step(self, step: &'static str) -> Result<T, GreinError> {
        self.map_err(|err| match err {
            // keep the innermost step name
            err @ GreinError::Step { .. } => err,
            err => GreinError::Step {
                step,
                source: Box::new(err),
            },
        })
    }
}
