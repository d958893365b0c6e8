//! Streaming multipart form reader with bounded memory and disk spillover.
//!
//! Parts are consumed one at a time; the body is never materialized. Form
//! values share a memory budget with a small fixed reserve. The single
//! allowed file part is kept in memory while it fits the memory budget and
//! spills to a temp file otherwise, with the per-route size ceiling enforced
//! by [`copy_bounded`] during the spill.
//!
//! Temp files are held as [`tempfile::TempPath`], so any early exit drops
//! and deletes them; [`RawForm::release`] is the explicit, logged variant
//! the orchestrator runs at end of request.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use axum::extract::Multipart;
use axum::extract::multipart::Field;
use axum::http::HeaderMap;
use bytes::Bytes;
use futures::stream;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::copy::copy_bounded;
use crate::error::UploadError;

/// Fixed reserve added to the memory budget for non-file field data.
pub const VALUE_RESERVE_BYTES: i64 = 10 * 1024;

/// Where a file part's content lives. Exactly one representation exists at
/// a time by construction.
#[derive(Debug)]
pub enum FileContent {
    /// Content fit within the memory budget.
    InMemory(Bytes),
    /// Content was spilled to a temp file, deleted when the path drops or
    /// [`RawForm::release`] runs.
    OnDisk(TempPath),
}

/// A parsed file part.
#[derive(Debug)]
pub struct FilePart {
    /// Client-supplied file name.
    pub file_name: String,
    /// Raw part headers.
    pub headers: HeaderMap,
    /// Content length in bytes.
    pub size: u64,
    content: FileContent,
}

impl FilePart {
    pub fn content(&self) -> &FileContent {
        &self.content
    }

    /// In-memory content, if the part was not spilled.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.content {
            FileContent::InMemory(bytes) => Some(bytes),
            FileContent::OnDisk(_) => None,
        }
    }

    /// Temp file path, if the part was spilled.
    pub fn temp_path(&self) -> Option<&Path> {
        match &self.content {
            FileContent::InMemory(_) => None,
            FileContent::OnDisk(path) => Some(path),
        }
    }

    #[cfg(test)]
    pub(crate) fn in_memory_for_tests(file_name: &str, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.to_string(),
            headers: HeaderMap::new(),
            size: bytes.len() as u64,
            content: FileContent::InMemory(bytes),
        }
    }
}

/// Accumulated multipart form: named values plus at most one file part.
///
/// Owns every temp file produced during parsing and is responsible for
/// releasing them.
#[derive(Debug, Default)]
pub struct RawForm {
    pub values: HashMap<String, Vec<String>>,
    pub files: HashMap<String, Vec<FilePart>>,
}

impl RawForm {
    /// Delete every temp file owned by this form.
    ///
    /// Idempotent: parts are drained, so a second call is a no-op. Deletion
    /// failures are logged and never escalated.
    pub fn release(&mut self) {
        for (_, parts) in self.files.drain() {
            for part in parts {
                if let FileContent::OnDisk(path) = part.content {
                    remove_temp(path);
                }
            }
        }
    }
}

fn remove_temp(path: TempPath) {
    let shown = path.to_path_buf();
    if let Err(err) = path.close() {
        tracing::warn!(
            path = %shown.display(),
            error = %err,
            "failed to remove upload temp file"
        );
    }
}

/// Bridge a multipart field's chunk stream into `AsyncRead`.
fn field_reader(field: Field<'_>) -> impl AsyncRead + Unpin {
    StreamReader::new(Box::pin(stream::try_unfold(field, |mut field| async move {
        let chunk = field.chunk().await.map_err(std::io::Error::other)?;
        Ok::<_, std::io::Error>(chunk.map(|bytes| (bytes, field)))
    })))
}

/// Read the whole multipart body into a [`RawForm`].
///
/// `memory_budget` caps how much file content stays in memory before
/// spilling to disk; `file_size_limit` is the byte ceiling enforced while a
/// spilled file streams to disk. A file that fits the memory budget is
/// already under any sane ceiling and is not re-checked. A second file part
/// fails with [`UploadError::MultipleFiles`] before any of its bytes are
/// read. Spilled files are created inside `spill_dir`.
///
/// On error, any temp file already created is deleted before returning
/// (partial forms drop here and their paths clean themselves up).
pub async fn read_form(
    multipart: &mut Multipart,
    memory_budget: u64,
    file_size_limit: u64,
    spill_dir: &Path,
) -> Result<RawForm, UploadError> {
    let mut form = RawForm::default();
    let mut mem_budget = memory_budget;
    let mut value_budget =
        i64::try_from(memory_budget).unwrap_or(i64::MAX).saturating_add(VALUE_RESERVE_BYTES);
    let mut file_parts = 0usize;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::Multipart(err.to_string()))?
    {
        let name = match field.name() {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => continue,
        };

        match field.file_name().map(str::to_owned) {
            None => {
                let value = read_value(field, &mut value_budget).await?;
                form.values.entry(name).or_default().push(value);
            }
            Some(file_name) => {
                file_parts += 1;
                if file_parts > 1 {
                    return Err(UploadError::MultipleFiles);
                }
                let part = read_file_part(
                    field,
                    file_name,
                    &mut mem_budget,
                    &mut value_budget,
                    file_size_limit,
                    spill_dir,
                )
                .await?;
                form.files.entry(name).or_default().push(part);
            }
        }
    }

    Ok(form)
}

/// Read a form value, charging it against the running value budget.
async fn read_value(field: Field<'_>, budget: &mut i64) -> Result<String, UploadError> {
    // Read up to budget + 1 bytes; landing past the budget means the part
    // had more data than allowed.
    let allow = u64::try_from(budget.saturating_add(1)).unwrap_or(0);
    let mut reader = field_reader(field).take(allow);
    let mut buf = Vec::new();
    let n = reader.read_to_end(&mut buf).await?;
    *budget -= n as i64;
    if *budget < 0 {
        return Err(UploadError::MessageTooLarge);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read the file part: in memory while the budget holds, otherwise spill the
/// buffered prefix plus the live remainder into a fresh temp file.
async fn read_file_part(
    field: Field<'_>,
    file_name: String,
    mem_budget: &mut u64,
    value_budget: &mut i64,
    file_size_limit: u64,
    spill_dir: &Path,
) -> Result<FilePart, UploadError> {
    let headers = field.headers().clone();
    let mut reader = field_reader(field);

    let mut prefix = Vec::new();
    let n = (&mut reader)
        .take(mem_budget.saturating_add(1))
        .read_to_end(&mut prefix)
        .await? as u64;

    if n <= *mem_budget {
        *mem_budget -= n;
        *value_budget -= n as i64;
        return Ok(FilePart {
            file_name,
            headers,
            size: n,
            content: FileContent::InMemory(prefix.into()),
        });
    }

    // Too big for memory: stream prefix + remainder to disk under the
    // per-route ceiling.
    let (file, path) = NamedTempFile::with_prefix_in("multipart-", spill_dir)?.into_parts();
    let mut dst = tokio::fs::File::from_std(file);
    let mut src = Cursor::new(prefix).chain(reader);
    match copy_bounded(&mut dst, &mut src, file_size_limit).await {
        Ok(size) => Ok(FilePart {
            file_name,
            headers,
            size,
            content: FileContent::OnDisk(path),
        }),
        Err(err) => {
            remove_temp(path);
            Err(err)
        }
    }
}
