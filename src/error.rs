use std::fmt;
use thiserror::Error;

use crate::parsers::Format;

/// Failure kinds produced while staging, detecting or counting a job.
#[derive(Debug, Error)]
pub enum PdlError {
    #[error("input file is empty")]
    EmptyInput { input: String },

    #[error("unsupported file format (analysis of first data block failed)")]
    UnrecognizedFormat { input: String },

    /// A candidate parser rejected the signature windows. The dispatcher
    /// recovers from this one; it only escapes when a single parser is
    /// bound explicitly.
    #[error("invalid file format for {format} parser")]
    InvalidFormat { format: Format },

    #[error("{helper} is missing or not usable: {reason}")]
    MissingDependency { helper: String, reason: String },

    #[error("malformed {format} document at byte {offset}: {reason}")]
    MalformedDocument {
        format: Format,
        offset: u64,
        reason: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EmptyInput,
    UnrecognizedFormat,
    InvalidFormat,
    MissingDependency,
    MalformedDocument,
    IoFailure,
}

impl PdlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PdlError::EmptyInput { .. } => ErrorKind::EmptyInput,
            PdlError::UnrecognizedFormat { .. } => ErrorKind::UnrecognizedFormat,
            PdlError::InvalidFormat { .. } => ErrorKind::InvalidFormat,
            PdlError::MissingDependency { .. } => ErrorKind::MissingDependency,
            PdlError::MalformedDocument { .. } => ErrorKind::MalformedDocument,
            PdlError::Io { .. } => ErrorKind::IoFailure,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PdlError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn malformed(format: Format, offset: u64, reason: impl Into<String>) -> Self {
        PdlError::MalformedDocument {
            format,
            offset,
            reason: reason.into(),
        }
    }
}

/// Extension for attaching a short context string to raw I/O results.
pub trait IoContext<T> {
    fn io_context<C: fmt::Display>(self, context: C) -> std::result::Result<T, PdlError>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<C: fmt::Display>(self, context: C) -> std::result::Result<T, PdlError> {
        self.map_err(|e| PdlError::io(context.to_string(), e))
    }
}

/// A [`PdlError`] tagged with the identity of the input it belongs to.
#[derive(Debug, Error)]
#[error("{input}: {error}")]
pub struct AnalysisError {
    pub input: String,
    #[source]
    pub error: PdlError,
}

impl AnalysisError {
    pub fn new(input: impl Into<String>, error: PdlError) -> Self {
        Self {
            input: input.into(),
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

pub type Result<T> = std::result::Result<T, PdlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_context_wraps_error_and_keeps_ok() {
        let ok: std::io::Result<u8> = Ok(7);
        assert_eq!(ok.io_context("read").unwrap(), 7);

        let failed: std::io::Result<u8> = Err(std::io::Error::other("disk gone"));
        let err = failed.io_context(format_args!("read {}", "job.prn")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert_eq!(err.to_string(), "read job.prn: disk gone");
    }
}
