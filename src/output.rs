//! Wire rendering of upload outcomes.
//!
//! The core produces an [`UploadOutcome`]; a [`ResultOutput`] turns it into
//! an HTTP response. [`JsonOutput`] is the reference mapping: everything is
//! an HTTP 200 JSON envelope with an application-level code, except
//! not-applicable requests which get a bare 404.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::upload::{ProcessFileResult, UploadOutcome};

pub const CODE_SUCCESS: i32 = 200;
pub const CODE_INTERNAL: i32 = 5001;
pub const CODE_EXCEED: i32 = 5002;
pub const CODE_NO_AUTH: i32 = 4009;

/// JSON envelope shared by all application-level outcomes.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ProcessFileResult>,
}

/// Pluggable outcome-to-response mapping.
pub trait ResultOutput: Send + Sync {
    fn render(&self, outcome: &UploadOutcome) -> Response;
}

/// Reference JSON rendering.
pub struct JsonOutput;

impl ResultOutput for JsonOutput {
    fn render(&self, outcome: &UploadOutcome) -> Response {
        match outcome {
            UploadOutcome::Success(result) => Json(WireResult {
                success: true,
                code: Some(CODE_SUCCESS),
                message: String::new(),
                data: Some(result.clone()),
            })
            .into_response(),
            UploadOutcome::SizeExceeded => error_body(CODE_EXCEED, "exceed max file"),
            UploadOutcome::Unauthenticated => error_body(CODE_NO_AUTH, "Permission denied"),
            UploadOutcome::Failed(_) => error_body(
                CODE_INTERNAL,
                "The system is out of order, please try again later",
            ),
            UploadOutcome::NotApplicable => StatusCode::NOT_FOUND.into_response(),
        }
    }
}

fn error_body(code: i32, message: &str) -> Response {
    Json(WireResult {
        success: false,
        code: Some(code),
        message: message.to_string(),
        data: None,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploadError;
    use http_body_util::BodyExt;

    async fn rendered(outcome: &UploadOutcome) -> (StatusCode, serde_json::Value) {
        let response = JsonOutput.render(outcome);
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("valid json")
        };
        (status, value)
    }

    #[tokio::test]
    async fn success_envelope() {
        let outcome = UploadOutcome::Success(ProcessFileResult {
            id: 123,
            target_file_name: "stored.png".to_string(),
        });
        let (status, body) = rendered(&outcome).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["code"], 200);
        assert_eq!(body["data"]["id"], 123);
        assert_eq!(body["data"]["targetFileName"], "stored.png");
    }

    #[tokio::test]
    async fn dedicated_error_codes() {
        let (status, body) = rendered(&UploadOutcome::SizeExceeded).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 5002);

        let (_, body) = rendered(&UploadOutcome::Unauthenticated).await;
        assert_eq!(body["code"], 4009);

        let (_, body) = rendered(&UploadOutcome::Failed(UploadError::MessageTooLarge)).await;
        assert_eq!(body["code"], 5001);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn not_applicable_is_a_bare_404() {
        let (status, body) = rendered(&UploadOutcome::NotApplicable).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, serde_json::Value::Null);
    }
}
