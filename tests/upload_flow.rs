//! End-to-end upload flow tests.
//!
//! These drive the full router with real multipart bodies and verify the
//! wire-level outcome mapping, limit enforcement, and temp-file cleanup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use sized_upload::config::{FileHandler, UploadAuth, UploadConfig};
use sized_upload::limits::SizeRules;
use sized_upload::server::{ServerConfig, build_router};
use sized_upload::upload::{ParsedUpload, ProcessFileResult};

const BOUNDARY: &str = "test-boundary-7f1a9c";

const RULES: &str = "\
global: 1024
configs:
  - bizLine: docs
    maxLength: 2048
    subs:
      - bizLine: /docs/large
        maxLength: 65536
";

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

#[derive(Debug, Clone)]
struct Recorded {
    user_id: i64,
    file_name: String,
    size: u64,
    content: Vec<u8>,
    source_path: Option<PathBuf>,
    fields: HashMap<String, String>,
}

/// Records every invocation; reads spilled files while they still exist.
#[derive(Default)]
struct RecordingHandler {
    fail: bool,
    calls: Mutex<Vec<Recorded>>,
}

impl RecordingHandler {
    fn failing() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileHandler for RecordingHandler {
    async fn process(
        &self,
        upload: &ParsedUpload,
        user_id: i64,
    ) -> anyhow::Result<ProcessFileResult> {
        let content = match &upload.file.source_path {
            Some(path) => tokio::fs::read(path).await?,
            None => upload.file.content.to_vec(),
        };
        self.calls.lock().unwrap().push(Recorded {
            user_id,
            file_name: upload.file.original_name.clone(),
            size: upload.file.size,
            content,
            source_path: upload.file.source_path.clone(),
            fields: upload.form.clone(),
        });
        if self.fail {
            anyhow::bail!("storage backend unavailable");
        }
        Ok(ProcessFileResult {
            id: user_id,
            target_file_name: format!("stored-{}", upload.file.original_name),
        })
    }
}

fn app(handler: Arc<RecordingHandler>, memory_limit: i64) -> Router {
    app_spilling_into(handler, memory_limit, std::env::temp_dir())
}

fn app_spilling_into(
    handler: Arc<RecordingHandler>,
    memory_limit: i64,
    spill_dir: PathBuf,
) -> Router {
    let rules = Arc::new(SizeRules::from_yaml(RULES).expect("rule table parses"));
    let cfg = UploadConfig::new(Arc::new(HeaderAuth), handler, rules)
        .with_memory_limit(memory_limit)
        .with_spill_dir(spill_dir);
    build_router(Arc::new(cfg), &ServerConfig::default())
}

/// Body parts: `(field name, optional file name, content)`.
fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, file_name, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(path: &str, user_id: Option<i64>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id.to_string());
    }
    builder.body(Body::from(body)).expect("request builds")
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("valid json body")
}

#[tokio::test]
async fn unauthenticated_upload_is_denied_before_parsing() {
    let handler = Arc::new(RecordingHandler::default());
    let app = app(handler.clone(), 512 * 1024);

    let body = multipart_body(&[("file", Some("a.bin"), b"hello")]);
    let response = app
        .oneshot(upload_request("/fgw/upload/docs/contract", None, body))
        .await
        .expect("request completes");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], 4009);
    assert!(handler.calls().is_empty());
}

#[tokio::test]
async fn successful_upload_reaches_the_handler() {
    let handler = Arc::new(RecordingHandler::default());
    let app = app(handler.clone(), 512 * 1024);

    let body = multipart_body(&[
        ("kind", None, b"contract"),
        ("file", Some("deal.pdf"), b"pdf bytes here"),
    ]);
    let response = app
        .oneshot(upload_request("/fgw/upload/docs/contract", Some(7), body))
        .await
        .expect("request completes");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["code"], 200);
    assert_eq!(json["data"]["id"], 7);
    assert_eq!(json["data"]["targetFileName"], "stored-deal.pdf");

    let calls = handler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].user_id, 7);
    assert_eq!(calls[0].file_name, "deal.pdf");
    assert_eq!(calls[0].size, 14);
    assert_eq!(calls[0].content, b"pdf bytes here");
    assert_eq!(calls[0].fields["kind"], "contract");
    assert!(calls[0].source_path.is_none());
}

#[tokio::test]
async fn oversized_upload_is_rejected_mid_stream() {
    let handler = Arc::new(RecordingHandler::default());
    let spill = tempfile::tempdir().expect("spill dir");
    // Tiny memory budget: the file spills, so the route ceiling applies
    // while it streams to disk.
    let app = app_spilling_into(handler.clone(), 256, spill.path().to_path_buf());

    // /docs/contract resolves to the `docs` line ceiling of 2048 bytes.
    let body = multipart_body(&[("file", Some("big.bin"), vec![0u8; 4096].as_slice())]);
    let response = app
        .oneshot(upload_request("/fgw/upload/docs/contract", Some(7), body))
        .await
        .expect("request completes");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], 5002);
    assert!(handler.calls().is_empty());

    let leftovers: Vec<_> = std::fs::read_dir(spill.path())
        .expect("spill dir readable")
        .collect();
    assert!(
        leftovers.is_empty(),
        "rejected upload must not leave a partial temp file behind"
    );
}

#[tokio::test]
async fn unmatched_route_uses_the_global_ceiling() {
    let handler = Arc::new(RecordingHandler::default());
    let app = app(handler.clone(), 256);

    // 1500 bytes: over global (1024), under the docs line (2048).
    let body = multipart_body(&[("file", Some("big.bin"), vec![0u8; 1500].as_slice())]);
    let response = app
        .oneshot(upload_request("/fgw/upload/other/route", Some(7), body))
        .await
        .expect("request completes");

    let json = body_json(response).await;
    assert_eq!(json["code"], 5002);
    assert!(handler.calls().is_empty());
}

#[tokio::test]
async fn exact_sub_route_overrides_its_line() {
    let handler = Arc::new(RecordingHandler::default());
    let app = app(handler.clone(), 256);

    // 4096 bytes spilled to disk: over the docs line ceiling (2048), under
    // the /docs/large sub-route ceiling (65536).
    let body = multipart_body(&[("file", Some("big.bin"), vec![1u8; 4096].as_slice())]);
    let response = app
        .oneshot(upload_request("/fgw/upload/docs/large", Some(7), body))
        .await
        .expect("request completes");

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(handler.calls().len(), 1);
    assert_eq!(handler.calls()[0].size, 4096);
}

#[tokio::test]
async fn non_multipart_requests_get_a_bare_404() {
    let handler = Arc::new(RecordingHandler::default());
    let app = app(handler.clone(), 512 * 1024);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/fgw/upload/docs/contract")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-user-id", "7")
                .body(Body::from("{}"))
                .expect("request builds"),
        )
        .await
        .expect("request completes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/somewhere/else")
                .body(Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("request completes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(handler.calls().is_empty());
}

#[tokio::test]
async fn handler_failure_maps_to_internal_error() {
    let handler = Arc::new(RecordingHandler::failing());
    let app = app(handler.clone(), 512 * 1024);

    let body = multipart_body(&[("file", Some("a.bin"), b"hello")]);
    let response = app
        .oneshot(upload_request("/fgw/upload/docs/contract", Some(7), body))
        .await
        .expect("request completes");

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], 5001);
    assert_eq!(handler.calls().len(), 1);
}

#[tokio::test]
async fn spilled_file_is_readable_in_the_handler_and_deleted_after() {
    let handler = Arc::new(RecordingHandler::default());
    // 16-byte memory budget forces any real file to disk.
    let app = app(handler.clone(), 16);

    let content = vec![7u8; 64];
    let body = multipart_body(&[("file", Some("spill.bin"), content.as_slice())]);
    let response = app
        .oneshot(upload_request("/fgw/upload/docs/contract", Some(7), body))
        .await
        .expect("request completes");

    let json = body_json(response).await;
    assert_eq!(json["success"], true);

    let calls = handler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].content, content);
    assert_eq!(calls[0].size, 64);
    let path = calls[0]
        .source_path
        .as_ref()
        .expect("file was spilled to disk");
    assert!(!path.exists(), "temp file must be deleted after the request");
}
