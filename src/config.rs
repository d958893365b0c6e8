//! Upload processing configuration and injected collaborators.
//!
//! [`UploadConfig`] is built once during process startup and passed by
//! shared reference into every request; all collaborators are read-only
//! after construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::request::Parts;

use crate::limits::SizeProvider;
use crate::output::{JsonOutput, ResultOutput};
use crate::upload::{ParsedUpload, ProcessFileResult};

/// Default byte ceiling below which file content stays in memory.
pub const DEFAULT_MEMORY_LIMIT: i64 = 512 * 1024;

/// Memory budget substituted when the configured one is non-positive.
pub const FALLBACK_MEMORY_LIMIT: u64 = 10 * 1024;

/// File-size ceiling substituted when the resolved limit is non-positive.
pub const FALLBACK_SIZE_LIMIT: i64 = 4 * 1024 * 1024;

/// Authentication callback, invoked before any body byte is read.
///
/// Returns the caller's identity; `0` denotes an unauthenticated request.
/// Only the request head is available, so implementations cannot consume
/// the body.
#[async_trait]
pub trait UploadAuth: Send + Sync {
    async fn authenticate(&self, head: &Parts) -> i64;
}

/// Downstream consumer of a parsed upload. Opaque to the core.
#[async_trait]
pub trait FileHandler: Send + Sync {
    async fn process(
        &self,
        upload: &ParsedUpload,
        user_id: i64,
    ) -> anyhow::Result<ProcessFileResult>;
}

/// Immutable per-process upload configuration.
pub struct UploadConfig {
    memory_limit: i64,
    spill_dir: PathBuf,
    auth: Arc<dyn UploadAuth>,
    handler: Arc<dyn FileHandler>,
    sizes: Arc<dyn SizeProvider>,
    output: Arc<dyn ResultOutput>,
}

impl UploadConfig {
    /// Build a configuration with the default memory limit and the
    /// reference JSON output.
    pub fn new(
        auth: Arc<dyn UploadAuth>,
        handler: Arc<dyn FileHandler>,
        sizes: Arc<dyn SizeProvider>,
    ) -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            spill_dir: std::env::temp_dir(),
            auth,
            handler,
            sizes,
            output: Arc::new(JsonOutput),
        }
    }

    /// Override the in-memory budget for file content.
    pub fn with_memory_limit(mut self, limit: i64) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Override the directory receiving spilled file content.
    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = dir.into();
        self
    }

    /// Substitute the wire rendering of outcomes.
    pub fn with_output(mut self, output: Arc<dyn ResultOutput>) -> Self {
        self.output = output;
        self
    }

    pub fn auth(&self) -> &dyn UploadAuth {
        self.auth.as_ref()
    }

    pub fn handler(&self) -> &dyn FileHandler {
        self.handler.as_ref()
    }

    pub fn sizes(&self) -> &dyn SizeProvider {
        self.sizes.as_ref()
    }

    pub fn output(&self) -> &dyn ResultOutput {
        self.output.as_ref()
    }

    pub fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }

    /// Memory budget with the non-positive misconfiguration case mapped to
    /// the fallback.
    pub fn effective_memory_limit(&self) -> u64 {
        if self.memory_limit <= 0 {
            FALLBACK_MEMORY_LIMIT
        } else {
            self.memory_limit as u64
        }
    }
}
