//! Upload orchestration: the per-request entry point.
//!
//! [`handle_upload`] sequences content-kind detection, authentication,
//! size-limit resolution, streaming parsing, temp-file cleanup, and the
//! downstream file handler, producing exactly one [`UploadOutcome`] per
//! request. [`handle_request`] additionally renders the outcome through the
//! configured [`ResultOutput`](crate::output::ResultOutput).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{Method, header};
use axum::response::Response;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::{FALLBACK_SIZE_LIMIT, UploadConfig};
use crate::error::UploadError;
use crate::multipart::{FileContent, RawForm, read_form};
use crate::trace;

/// Result handed back by the downstream file handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFileResult {
    pub id: i64,
    pub target_file_name: String,
}

/// The single uploaded file, unpacked for the downstream handler.
///
/// `content` is empty when the file was spilled to disk; `source_path` then
/// points at the temp file. The temp file stays owned by the parse-side form
/// and is deleted when request processing finishes, so handlers must consume
/// it before returning.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub size: u64,
    pub content: Bytes,
    pub source_path: Option<PathBuf>,
}

/// Normalized, read-only view of a parsed multipart form.
#[derive(Debug, Clone)]
pub struct ParsedUpload {
    /// First value per form field name.
    pub form: HashMap<String, String>,
    pub file: UploadedFile,
}

impl ParsedUpload {
    /// Build the normalized view from a parsed form.
    ///
    /// A body without a file part is an error; the invariant that at most
    /// one file part exists was already enforced during parsing.
    pub fn from_form(form: &RawForm) -> Result<Self, UploadError> {
        let part = form
            .files
            .values()
            .find_map(|parts| parts.first())
            .ok_or(UploadError::MissingFile)?;

        let (content, source_path) = match part.content() {
            FileContent::InMemory(bytes) => (bytes.clone(), None),
            FileContent::OnDisk(path) => (Bytes::new(), Some(path.to_path_buf())),
        };

        let mut values = HashMap::with_capacity(form.values.len());
        for (name, all) in &form.values {
            if let Some(first) = all.first() {
                values.insert(name.clone(), first.clone());
            }
        }

        Ok(Self {
            form: values,
            file: UploadedFile {
                original_name: part.file_name.clone(),
                size: part.size,
                content,
                source_path,
            },
        })
    }
}

/// Terminal outcome of one upload request.
#[derive(Debug)]
pub enum UploadOutcome {
    Success(ProcessFileResult),
    Unauthenticated,
    SizeExceeded,
    /// Not a multipart form submission; rendered as a generic 404.
    NotApplicable,
    Failed(UploadError),
}

impl UploadOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            UploadOutcome::Success(_) => "success",
            UploadOutcome::Unauthenticated => "unauthenticated",
            UploadOutcome::SizeExceeded => "size_exceeded",
            UploadOutcome::NotApplicable => "not_applicable",
            UploadOutcome::Failed(_) => "failed",
        }
    }
}

/// Handle one upload request end to end.
///
/// Authentication runs against the request head before any body byte is
/// consumed, so unauthenticated uploads cost no bandwidth. Every temp file
/// produced by parsing is deleted before this function returns, whatever
/// the branch taken.
pub async fn handle_upload(cfg: &UploadConfig, req: Request, route_key: &str) -> UploadOutcome {
    let started = Instant::now();
    let trace_id = trace::trace_id(req.headers());

    if !is_multipart_post(&req) {
        tracing::info!(
            trace_id = %trace_id,
            route = route_key,
            method = %req.method(),
            "not a multipart form submission"
        );
        return UploadOutcome::NotApplicable;
    }

    let (parts, body) = req.into_parts();
    let user_id = cfg.auth().authenticate(&parts).await;
    if user_id == 0 {
        tracing::info!(trace_id = %trace_id, route = route_key, "rejected unauthenticated upload");
        return UploadOutcome::Unauthenticated;
    }

    let mut limit = cfg.sizes().size_for(route_key);
    if limit <= 0 {
        tracing::warn!(
            trace_id = %trace_id,
            route = route_key,
            limit,
            "non-positive size limit resolved, substituting fallback"
        );
        limit = FALLBACK_SIZE_LIMIT;
    }

    let req = Request::from_parts(parts, body);
    let mut multipart = match Multipart::from_request(req, &()).await {
        Ok(multipart) => multipart,
        Err(err) => {
            tracing::error!(
                trace_id = %trace_id,
                route = route_key,
                user_id,
                error = %err,
                "failed to open multipart stream"
            );
            return UploadOutcome::Failed(UploadError::Multipart(err.to_string()));
        }
    };

    let outcome = match read_form(
        &mut multipart,
        cfg.effective_memory_limit(),
        limit as u64,
        cfg.spill_dir(),
    )
    .await
    {
        Ok(mut form) => {
            let outcome = process_form(cfg, &form, user_id, &trace_id, route_key).await;
            // Unconditional: parse-side temp files go away whether the
            // handler succeeded or not.
            form.release();
            outcome
        }
        Err(UploadError::FileTooLarge) => UploadOutcome::SizeExceeded,
        Err(err) => UploadOutcome::Failed(err),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        UploadOutcome::Failed(err) => tracing::error!(
            trace_id = %trace_id,
            route = route_key,
            user_id,
            elapsed_ms,
            error = %err,
            "upload failed"
        ),
        other => tracing::info!(
            trace_id = %trace_id,
            route = route_key,
            user_id,
            elapsed_ms,
            outcome = other.label(),
            "upload finished"
        ),
    }
    outcome
}

/// Handle one request and render its outcome to a response.
///
/// `route_key` is the limit-lookup key, normally the wildcard remainder the
/// router captured; when absent the full URI path is used.
pub async fn handle_request(
    cfg: &UploadConfig,
    route_key: Option<&str>,
    req: Request,
) -> Response {
    let route_key = match route_key {
        Some(key) if !key.is_empty() => key.to_owned(),
        _ => req.uri().path().to_owned(),
    };
    let outcome = handle_upload(cfg, req, &route_key).await;
    cfg.output().render(&outcome)
}

async fn process_form(
    cfg: &UploadConfig,
    form: &RawForm,
    user_id: i64,
    trace_id: &str,
    route_key: &str,
) -> UploadOutcome {
    let upload = match ParsedUpload::from_form(form) {
        Ok(upload) => upload,
        Err(err) => return UploadOutcome::Failed(err),
    };

    let started = Instant::now();
    match cfg.handler().process(&upload, user_id).await {
        Ok(result) => {
            tracing::info!(
                trace_id = %trace_id,
                route = route_key,
                user_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "file handler finished"
            );
            UploadOutcome::Success(result)
        }
        Err(err) => {
            tracing::error!(
                trace_id = %trace_id,
                route = route_key,
                user_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %err,
                "file handler failed"
            );
            UploadOutcome::Failed(UploadError::Handler(err))
        }
    }
}

/// Whether the request is a POST carrying `multipart/form-data`.
///
/// An absent or unparsable content type is treated as a plain
/// non-multipart request, per RFC 7231 §3.1.1.5.
fn is_multipart_post(req: &Request) -> bool {
    if req.method() != Method::POST {
        return false;
    }
    let Some(content_type) = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    content_type
        .parse::<mime::Mime>()
        .map(|media| media.type_() == mime::MULTIPART && media.subtype() == mime::FORM_DATA)
        .unwrap_or(false)
}
