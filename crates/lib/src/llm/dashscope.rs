//! DashScope application API client (https://dashscope.aliyuncs.com/api/v1 by default).
//! Supports a blocking completion and an SSE-streamed completion with incremental output.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::sse::{SseDecoder, SseEvent};
use super::{AppClient, AppOutput, AppRequest};
use crate::session::Message;

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";

/// Where the service documents its error codes; appended to user-facing error text.
pub const ERROR_CODE_DOC_URL: &str =
    "https://help.aliyun.com/zh/model-studio/developer-reference/error-code";

/// Client for the DashScope application completion endpoint.
#[derive(Clone)]
pub struct DashScopeClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum DashScopeError {
    #[error("dashscope request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("dashscope api error {status_code} ({code}): {message} [request {request_id}]")]
    Api {
        request_id: String,
        status_code: u16,
        code: String,
        message: String,
    },
    #[error("dashscope response could not be decoded: {0}")]
    Decode(String),
}

impl DashScopeClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    fn completion_url(&self, app_id: &str) -> String {
        format!("{}/apps/{}/completion", self.base_url, app_id)
    }
}

#[async_trait]
impl AppClient for DashScopeClient {
    /// POST /apps/{app_id}/completion, blocking.
    async fn call(&self, request: &AppRequest) -> Result<AppOutput, DashScopeError> {
        let body = CompletionRequest::new(request, false);
        let res = self
            .client
            .post(self.completion_url(&request.app_id))
            .bearer_auth(&request.api_key)
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &text));
        }
        let data: CompletionResponse =
            serde_json::from_str(&text).map_err(|e| DashScopeError::Decode(e.to_string()))?;
        data.into_output(status.as_u16())
    }

    /// POST /apps/{app_id}/completion with `X-DashScope-SSE: enable` and incremental output.
    async fn call_stream(
        &self,
        request: &AppRequest,
        on_chunk: &mut (dyn FnMut(AppOutput) + Send),
    ) -> Result<(), DashScopeError> {
        let body = CompletionRequest::new(request, true);
        let res = self
            .client
            .post(self.completion_url(&request.app_id))
            .bearer_auth(&request.api_key)
            .header("X-DashScope-SSE", "enable")
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &text));
        }
        let mut stream = res.bytes_stream();
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in decoder.push(&chunk) {
                handle_event(event, on_chunk)?;
            }
        }
        if let Some(event) = decoder.finish() {
            handle_event(event, on_chunk)?;
        }
        Ok(())
    }
}

fn handle_event(
    event: SseEvent,
    on_chunk: &mut (dyn FnMut(AppOutput) + Send),
) -> Result<(), DashScopeError> {
    let status = event.http_status.unwrap_or(200);
    let is_error = event.event.as_deref() == Some("error") || !(200..300).contains(&status);
    if is_error {
        return Err(api_error(status, &event.data));
    }
    if event.data.trim().is_empty() {
        return Ok(());
    }
    let data: CompletionResponse =
        serde_json::from_str(&event.data).map_err(|e| DashScopeError::Decode(e.to_string()))?;
    on_chunk(data.into_output(status)?);
    Ok(())
}

fn api_error(status_code: u16, body: &str) -> DashScopeError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(e) => {
            let code = e.code.unwrap_or_default();
            let message = e
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| code.clone());
            DashScopeError::Api {
                request_id: e.request_id.unwrap_or_default(),
                status_code,
                code,
                message,
            }
        }
        Err(_) => DashScopeError::Api {
            request_id: String::new(),
            status_code,
            code: String::new(),
            message: body.trim().to_string(),
        },
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    input: CompletionInput<'a>,
    parameters: CompletionParameters,
}

#[derive(Debug, Serialize)]
struct CompletionInput<'a> {
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CompletionParameters {
    incremental_output: bool,
}

impl<'a> CompletionRequest<'a> {
    fn new(request: &'a AppRequest, incremental_output: bool) -> Self {
        Self {
            input: CompletionInput {
                messages: &request.messages,
                session_id: request.session_id.as_deref(),
            },
            parameters: CompletionParameters { incremental_output },
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    output: Option<CompletionOutput>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionOutput {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
}

impl CompletionResponse {
    /// A 2xx payload can still carry an error code instead of output.
    fn into_output(self, status_code: u16) -> Result<AppOutput, DashScopeError> {
        if let Some(code) = self.code.filter(|c| !c.is_empty()) {
            return Err(DashScopeError::Api {
                request_id: self.request_id.unwrap_or_default(),
                status_code,
                message: self.message.unwrap_or_else(|| code.clone()),
                code,
            });
        }
        let output = self.output.unwrap_or(CompletionOutput {
            text: None,
            session_id: None,
            finish_reason: None,
        });
        Ok(AppOutput {
            text: output.text.unwrap_or_default(),
            session_id: output.session_id.filter(|s| !s.is_empty()),
            finish_reason: output.finish_reason.filter(|r| r != "null"),
            request_id: self.request_id,
        })
    }
}
