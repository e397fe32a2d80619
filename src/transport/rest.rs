use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::config::ApiSettings;
use crate::schemas::{ExamPayload, ExamProgress, StartedExam, SubmissionResult};
use crate::transport::TransportError;

/// Request/response channel to the exam backend.
#[async_trait]
pub trait ExamApi: Send + Sync {
    async fn get_exam(&self, exam_id: &str) -> Result<ExamPayload, TransportError>;

    /// Fails with [`TransportError::NotFound`] while no progress exists.
    async fn get_progress(&self, exam_id: &str) -> Result<ExamProgress, TransportError>;

    async fn start_exam(&self, exam_id: &str) -> Result<StartedExam, TransportError>;

    /// Fails with [`TransportError::NotFound`] while no attempt was graded.
    async fn get_result(&self, exam_id: &str) -> Result<SubmissionResult, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpExamApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpExamApi {
    pub fn from_settings(settings: &ApiSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .context("Failed to build exam API HTTP client")?;

        Ok(Self::with_client(client, &settings.base_url, settings.token.clone()))
    }

    pub fn with_client(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), token }
    }

    /// `exam_id` is pushed as a single encoded path segment.
    fn exam_url(&self, exam_id: &str, action: Option<&str>) -> Result<Url, TransportError> {
        let invalid = |reason: String| {
            TransportError::Network(format!("invalid API base URL '{}': {reason}", self.base_url))
        };
        let mut url = Url::parse(&self.base_url).map_err(|err| invalid(err.to_string()))?;
        {
            let mut segments =
                url.path_segments_mut().map_err(|()| invalid("cannot carry a path".to_string()))?;
            segments.pop_if_empty().push("exams").push(exam_id);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, TransportError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response =
            request.send().await.map_err(|err| TransportError::Network(format!("{what}: {err}")))?;
        let status = response.status();
        let raw_body = response
            .text()
            .await
            .map_err(|err| TransportError::Network(format!("{what}: {err}")))?;
        let parsed = if raw_body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str::<Value>(&raw_body).map_err(|err| {
                TransportError::Malformed(format!(
                    "{what} returned non-JSON body (status {status}): {err}"
                ))
            })?
        };

        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound(extract_error_message(&parsed, what)));
        }
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: extract_error_message(&parsed, what),
            });
        }

        serde_json::from_value(unwrap_envelope(parsed))
            .map_err(|err| TransportError::Malformed(format!("{what}: {err}")))
    }
}

#[async_trait]
impl ExamApi for HttpExamApi {
    async fn get_exam(&self, exam_id: &str) -> Result<ExamPayload, TransportError> {
        self.send(self.client.get(self.exam_url(exam_id, None)?), "exam fetch").await
    }

    async fn get_progress(&self, exam_id: &str) -> Result<ExamProgress, TransportError> {
        self.send(self.client.get(self.exam_url(exam_id, Some("progress"))?), "progress fetch").await
    }

    async fn start_exam(&self, exam_id: &str) -> Result<StartedExam, TransportError> {
        self.send(self.client.post(self.exam_url(exam_id, Some("start"))?), "exam start").await
    }

    async fn get_result(&self, exam_id: &str) -> Result<SubmissionResult, TransportError> {
        self.send(self.client.get(self.exam_url(exam_id, Some("result"))?), "result fetch").await
    }
}

/// Accepts both bare payloads and `{ "success": .., "data": .. }` envelopes.
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map)
            if map.contains_key("data") && (map.len() == 1 || map.contains_key("success")) =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn extract_error_message(value: &Value, what: &str) -> String {
    ["message", "detail", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{what} failed"))
}
