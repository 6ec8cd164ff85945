//! Remote-call boundary and DashScope application client.
//!
//! [`AppClient`] is the seam the dispatcher talks to: one blocking call that returns a full answer,
//! or a streaming call that hands each incremental output to a callback.

mod dashscope;
pub mod sse;

pub use dashscope::{DashScopeClient, DashScopeError, DEFAULT_BASE_URL, ERROR_CODE_DOC_URL};

use crate::session::Message;
use async_trait::async_trait;

/// One call to a remote application.
#[derive(Debug, Clone)]
pub struct AppRequest {
    pub api_key: String,
    pub app_id: String,
    /// Conversation so far, welcome preamble excluded. Never empty.
    pub messages: Vec<Message>,
    /// Continuation token from a previous reply.
    pub session_id: Option<String>,
}

/// Output of a blocking call, or one increment of a streaming call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppOutput {
    /// Full text (blocking) or the new text since the previous increment (streaming).
    pub text: String,
    pub session_id: Option<String>,
    pub finish_reason: Option<String>,
    pub request_id: Option<String>,
}

#[async_trait]
pub trait AppClient: Send + Sync {
    /// Single blocking call returning the whole answer.
    async fn call(&self, request: &AppRequest) -> Result<AppOutput, DashScopeError>;

    /// Streaming call with incremental output. `on_chunk` sees items in arrival order; an error
    /// ends the stream.
    async fn call_stream(
        &self,
        request: &AppRequest,
        on_chunk: &mut (dyn FnMut(AppOutput) + Send),
    ) -> Result<(), DashScopeError>;
}
