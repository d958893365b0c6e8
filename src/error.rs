//! Error types produced while parsing and processing an upload.

use thiserror::Error;

/// Errors raised by the multipart reader, the bounded copy loop, or the
/// downstream file handler.
///
/// The orchestrator collapses most of these to a generic wire response;
/// only [`FileTooLarge`](UploadError::FileTooLarge) gets a dedicated one.
/// Every kind is logged with full context before the response is emitted.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UploadError {
    /// Non-file form values exceeded the value budget.
    #[error("multipart: message too large")]
    MessageTooLarge,

    /// The file part exceeded the resolved per-route size ceiling.
    #[error("file exceeds the allowed size limit")]
    FileTooLarge,

    /// The body carried more than one file part.
    #[error("just upload one file")]
    MultipleFiles,

    /// The body carried no file part at all.
    #[error("multipart body has no file part")]
    MissingFile,

    /// A sink reported zero bytes written for a non-empty chunk.
    #[error("invalid write result")]
    InvalidWrite,

    /// A sink accepted fewer bytes than it was handed.
    #[error("short write")]
    ShortWrite,

    /// The multipart stream itself was malformed or truncated.
    #[error("multipart stream: {0}")]
    Multipart(String),

    /// Temp file creation, disk writes, or body reads failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The downstream file handler rejected the upload.
    #[error("file handler failed: {0}")]
    Handler(#[source] anyhow::Error),
}
