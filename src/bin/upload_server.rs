//! Demo upload server.
//!
//! Authenticates via the `x-user-id` header and stores nothing: the file
//! handler just logs what it was given and echoes a generated target name.
//! Size limits come from the YAML rule table named in the server config.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::request::Parts;

use sized_upload::config::{FileHandler, UploadAuth, UploadConfig};
use sized_upload::limits;
use sized_upload::server::{ServerConfig, init_tracing, start_server};
use sized_upload::upload::{ParsedUpload, ProcessFileResult};

/// Trusts the numeric `x-user-id` header. Demo only.
struct HeaderAuth;

#[async_trait]
impl UploadAuth for HeaderAuth {
    async fn authenticate(&self, head: &Parts) -> i64 {
        head.headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(0)
    }
}

struct EchoHandler;

#[async_trait]
impl FileHandler for EchoHandler {
    async fn process(
        &self,
        upload: &ParsedUpload,
        user_id: i64,
    ) -> anyhow::Result<ProcessFileResult> {
        tracing::info!(
            user_id,
            file = %upload.file.original_name,
            size = upload.file.size,
            in_memory = upload.file.source_path.is_none(),
            fields = upload.form.len(),
            "received upload"
        );
        Ok(ProcessFileResult {
            id: user_id,
            target_file_name: format!("{}-{}", uuid::Uuid::new_v4(), upload.file.original_name),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;
    init_tracing(&config);

    let rules = limits::shared_from_file(&config.size_rules_path)?;
    let upload = UploadConfig::new(Arc::new(HeaderAuth), Arc::new(EchoHandler), rules)
        .with_memory_limit(config.memory_limit);

    start_server(config, Arc::new(upload)).await
}
