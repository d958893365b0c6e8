//! Size-governed single-file multipart uploads.
//!
//! This crate parses `multipart/form-data` request bodies under two
//! independent byte budgets: a memory budget that decides when file content
//! spills to a temp file, and a per-route size ceiling resolved from a
//! configurable rule table. Around the parser sits an upload pipeline that
//! authenticates the caller, enforces the resolved ceiling while the body
//! streams, hands the parsed form to an application-supplied handler, and
//! guarantees temp-file cleanup on every exit path.
//!
//! The typical embedding wires three collaborators into an
//! [`UploadConfig`] — an [`UploadAuth`], a [`FileHandler`], and a
//! [`SizeProvider`] (usually [`SizeRules`] loaded from YAML) — and mounts
//! [`handle_request`] behind a wildcard route. The optional `server` feature
//! adds a ready-made axum server with request-id propagation and graceful
//! shutdown.

pub mod config;
pub mod copy;
pub mod error;
pub mod limits;
pub mod multipart;
pub mod output;
pub mod trace;
pub mod upload;

#[cfg(feature = "server")]
pub mod server;

pub use config::{FileHandler, UploadAuth, UploadConfig};
pub use error::UploadError;
pub use limits::{SizeProvider, SizeRules};
pub use multipart::{FileContent, FilePart, RawForm, read_form};
pub use output::{JsonOutput, ResultOutput, WireResult};
pub use upload::{
    ParsedUpload, ProcessFileResult, UploadOutcome, UploadedFile, handle_request, handle_upload,
};
