//! Request dispatcher: validates a turn, calls the remote application, and reports the outcome as
//! an ordered sequence of [`TurnEvent`]s that always ends with exactly one terminal event.
//!
//! [`Dispatcher::spawn`] runs a turn on its own worker thread and hands back the receiving end
//! of a channel; the UI thread drains it and never touches the network itself.

use std::sync::mpsc;
use std::sync::Arc;

use crate::config::{self, Config};
use crate::llm::{AppClient, AppOutput, AppRequest, DashScopeClient, DashScopeError, ERROR_CODE_DOC_URL};
use crate::models::ModelRegistry;
use crate::session::Message;

pub const MISSING_API_KEY_MESSAGE: &str = "Please enter a valid API key in settings first.";
pub const UNKNOWN_MODEL_MESSAGE: &str = "Please select a valid model.";
pub const EMPTY_REQUEST_MESSAGE: &str = "There are no messages to send.";

/// What the worker reports back to the UI thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// New assistant text, in arrival order.
    Fragment {
        text: String,
        session_id: Option<String>,
    },
    /// The reply is complete.
    Completed { session_id: Option<String> },
    /// The turn failed; `message` is shown to the user.
    Failed {
        message: String,
        session_id: Option<String>,
    },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnEvent::Fragment { .. })
    }

    fn failed(message: impl Into<String>, session_id: Option<String>) -> Self {
        TurnEvent::Failed {
            message: message.into(),
            session_id,
        }
    }
}

/// Which remote-call variant to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseMode {
    #[default]
    Streaming,
    Blocking,
}

/// Everything one turn needs.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub api_key: String,
    pub model: String,
    pub messages: Vec<Message>,
    pub session_id: Option<String>,
}

#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<dyn AppClient>,
    registry: ModelRegistry,
    mode: ResponseMode,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn AppClient>, registry: ModelRegistry, mode: ResponseMode) -> Self {
        Self {
            client,
            registry,
            mode,
        }
    }

    /// DashScope client, model table, and response mode taken from config.
    pub fn from_config(config: &Config) -> Self {
        let mode = if config.stream {
            ResponseMode::Streaming
        } else {
            ResponseMode::Blocking
        };
        Self::new(
            Arc::new(DashScopeClient::new(config.base_url.clone())),
            ModelRegistry::with_overrides(&config.apps),
            mode,
        )
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Build a request from config (API key resolved with env override) and the given history.
    pub fn request_from_config(
        config: &Config,
        messages: Vec<Message>,
        session_id: Option<String>,
    ) -> TurnRequest {
        TurnRequest {
            api_key: config::resolve_api_key(config),
            model: config.selected_model.clone(),
            messages,
            session_id,
        }
    }

    /// Run one turn to completion, emitting events in order. The last event is always terminal.
    /// A missing API key, an unknown model, or an empty history fail without any network call.
    pub async fn run(&self, request: TurnRequest, emit: &mut (dyn FnMut(TurnEvent) + Send)) {
        if request.api_key.trim().is_empty() {
            log::warn!("API key is missing");
            emit(TurnEvent::failed(MISSING_API_KEY_MESSAGE, None));
            return;
        }
        let Some(app_id) = self.registry.app_id(&request.model) else {
            log::warn!("invalid model name: {:?}", request.model);
            emit(TurnEvent::failed(UNKNOWN_MODEL_MESSAGE, None));
            return;
        };
        if request.messages.is_empty() {
            log::warn!("no messages to send after filtering");
            emit(TurnEvent::failed(EMPTY_REQUEST_MESSAGE, None));
            return;
        }

        let app_request = AppRequest {
            api_key: request.api_key.trim().to_string(),
            app_id: app_id.to_string(),
            messages: request.messages,
            session_id: request.session_id,
        };
        log::info!(
            "calling app {} (model {}) with {} messages, session_id: {:?}, mode: {:?}",
            app_request.app_id,
            request.model,
            app_request.messages.len(),
            app_request.session_id,
            self.mode
        );
        match self.mode {
            ResponseMode::Streaming => self.run_streaming(&app_request, emit).await,
            ResponseMode::Blocking => self.run_blocking(&app_request, emit).await,
        }
    }

    async fn run_streaming(
        &self,
        request: &AppRequest,
        emit: &mut (dyn FnMut(TurnEvent) + Send),
    ) {
        let mut session_id = request.session_id.clone();
        let mut received = 0usize;
        let result = self
            .client
            .call_stream(request, &mut |out: AppOutput| {
                if let Some(id) = out.session_id {
                    session_id = Some(id);
                }
                if !out.text.is_empty() {
                    received += out.text.len();
                    emit(TurnEvent::Fragment {
                        text: out.text,
                        session_id: session_id.clone(),
                    });
                }
            })
            .await;
        match result {
            Ok(()) => {
                log::info!(
                    "stream finished, response length: {} bytes, session_id: {:?}",
                    received,
                    session_id
                );
                emit(TurnEvent::Completed { session_id });
            }
            Err(e) => {
                log::error!("stream failed: {}", e);
                emit(TurnEvent::failed(error_text(&e), session_id));
            }
        }
    }

    async fn run_blocking(&self, request: &AppRequest, emit: &mut (dyn FnMut(TurnEvent) + Send)) {
        match self.client.call(request).await {
            Ok(out) => {
                let session_id = out.session_id.or_else(|| request.session_id.clone());
                log::info!(
                    "call finished, response length: {} bytes, session_id: {:?}",
                    out.text.len(),
                    session_id
                );
                if !out.text.is_empty() {
                    emit(TurnEvent::Fragment {
                        text: out.text,
                        session_id: session_id.clone(),
                    });
                }
                emit(TurnEvent::Completed { session_id });
            }
            Err(e) => {
                log::error!("call failed: {}", e);
                emit(TurnEvent::failed(error_text(&e), request.session_id.clone()));
            }
        }
    }

    /// Run the turn on a detached worker thread with its own runtime. Events arrive on the
    /// returned receiver; if the worker dies early the sender is dropped and the receiver
    /// disconnects without a terminal event.
    pub fn spawn(&self, request: TurnRequest) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel();
        let dispatcher = self.clone();
        let spawned = std::thread::Builder::new()
            .name("finch-turn".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        log::error!("failed to start runtime for turn: {}", e);
                        let _ = tx.send(TurnEvent::failed(
                            format!("Request failed, please try again later. Error: {}", e),
                            None,
                        ));
                        return;
                    }
                };
                rt.block_on(dispatcher.run(request, &mut move |event| {
                    let _ = tx.send(event);
                }));
            });
        if let Err(e) = spawned {
            log::error!("failed to spawn turn worker: {}", e);
        }
        rx
    }
}

/// User-facing text for a failed remote call.
pub fn error_text(e: &DashScopeError) -> String {
    match e {
        DashScopeError::Api {
            request_id,
            status_code,
            message,
            ..
        } => format!(
            "Request ID: {}\nStatus code: {}\nMessage: {}\nSee the error code reference: {}",
            request_id, status_code, message, ERROR_CODE_DOC_URL
        ),
        other => format!("Request failed, please try again later. Error: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted outputs, optionally ending with an error, and counts calls.
    #[derive(Default)]
    struct ScriptedClient {
        outputs: Vec<AppOutput>,
        fail_with: Option<(u16, &'static str)>,
        calls: AtomicUsize,
        last_request: Mutex<Option<AppRequest>>,
    }

    impl ScriptedClient {
        fn error(&self) -> Option<DashScopeError> {
            self.fail_with.map(|(status_code, message)| DashScopeError::Api {
                request_id: "req-1".into(),
                status_code,
                code: "Bad".into(),
                message: message.into(),
            })
        }
    }

    #[async_trait]
    impl AppClient for ScriptedClient {
        async fn call(&self, request: &AppRequest) -> Result<AppOutput, DashScopeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            if let Some(e) = self.error() {
                return Err(e);
            }
            Ok(AppOutput {
                text: self.outputs.iter().map(|o| o.text.as_str()).collect(),
                session_id: self.outputs.last().and_then(|o| o.session_id.clone()),
                ..AppOutput::default()
            })
        }

        async fn call_stream(
            &self,
            request: &AppRequest,
            on_chunk: &mut (dyn FnMut(AppOutput) + Send),
        ) -> Result<(), DashScopeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            for out in &self.outputs {
                on_chunk(out.clone());
            }
            match self.error() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    fn out(text: &str, session_id: Option<&str>) -> AppOutput {
        AppOutput {
            text: text.into(),
            session_id: session_id.map(Into::into),
            ..AppOutput::default()
        }
    }

    fn request(api_key: &str, model: &str) -> TurnRequest {
        TurnRequest {
            api_key: api_key.into(),
            model: model.into(),
            messages: vec![Message::user("hello")],
            session_id: None,
        }
    }

    async fn collect(dispatcher: &Dispatcher, request: TurnRequest) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        dispatcher.run(request, &mut |e| events.push(e)).await;
        events
    }

    fn dispatcher(client: Arc<ScriptedClient>, mode: ResponseMode) -> Dispatcher {
        Dispatcher::new(client, ModelRegistry::builtin(), mode)
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_call() {
        let client = Arc::new(ScriptedClient::default());
        let d = dispatcher(client.clone(), ResponseMode::Streaming);
        let events = collect(&d, request("  ", "qwen-plus")).await;
        assert_eq!(
            events,
            vec![TurnEvent::Failed {
                message: MISSING_API_KEY_MESSAGE.into(),
                session_id: None
            }]
        );
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_model_fails_without_call() {
        let client = Arc::new(ScriptedClient::default());
        let d = dispatcher(client.clone(), ResponseMode::Blocking);
        for model in ["", "gpt-4o", "QWEN-PLUS"] {
            let events = collect(&d, request("sk", model)).await;
            assert_eq!(events.len(), 1);
            assert!(matches!(&events[0], TurnEvent::Failed { message, .. } if message == UNKNOWN_MODEL_MESSAGE));
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn streaming_fragments_in_order_then_completed() {
        let client = Arc::new(ScriptedClient {
            outputs: vec![
                out("Hel", Some("s-1")),
                out("", None),
                out("lo", None),
                out(" world", Some("s-2")),
            ],
            ..ScriptedClient::default()
        });
        let d = dispatcher(client.clone(), ResponseMode::Streaming);
        let mut req = request("sk", "qwen-max");
        req.session_id = Some("s-0".into());
        let events = collect(&d, req).await;
        assert_eq!(
            events,
            vec![
                TurnEvent::Fragment {
                    text: "Hel".into(),
                    session_id: Some("s-1".into())
                },
                TurnEvent::Fragment {
                    text: "lo".into(),
                    session_id: Some("s-1".into())
                },
                TurnEvent::Fragment {
                    text: " world".into(),
                    session_id: Some("s-2".into())
                },
                TurnEvent::Completed {
                    session_id: Some("s-2".into())
                },
            ]
        );
        let sent = client.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(sent.app_id, "79602e8ff8564665958c8392b507256a");
        assert_eq!(sent.session_id.as_deref(), Some("s-0"));
    }

    #[tokio::test]
    async fn streaming_error_is_last_event() {
        let client = Arc::new(ScriptedClient {
            outputs: vec![out("partial", Some("s-1"))],
            fail_with: Some((500, "boom")),
            ..ScriptedClient::default()
        });
        let d = dispatcher(client, ResponseMode::Streaming);
        let events = collect(&d, request("sk", "qwen-plus")).await;
        assert_eq!(events.len(), 2);
        assert!(!events[0].is_terminal());
        match &events[1] {
            TurnEvent::Failed {
                message,
                session_id,
            } => {
                assert!(message.contains("Request ID: req-1"));
                assert!(message.contains("Status code: 500"));
                assert!(message.contains("Message: boom"));
                assert!(message.contains(ERROR_CODE_DOC_URL));
                assert_eq!(session_id.as_deref(), Some("s-1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn blocking_mode_emits_full_answer() {
        let client = Arc::new(ScriptedClient {
            outputs: vec![out("a", None), out("b", Some("s-9"))],
            ..ScriptedClient::default()
        });
        let d = dispatcher(client, ResponseMode::Blocking);
        let events = collect(&d, request("sk", "deepseek-r1")).await;
        assert_eq!(
            events,
            vec![
                TurnEvent::Fragment {
                    text: "ab".into(),
                    session_id: Some("s-9".into())
                },
                TurnEvent::Completed {
                    session_id: Some("s-9".into())
                },
            ]
        );
    }

    #[test]
    fn spawn_delivers_over_channel() {
        let client = Arc::new(ScriptedClient {
            outputs: vec![out("x", None), out("y", None)],
            ..ScriptedClient::default()
        });
        let d = dispatcher(client, ResponseMode::Streaming);
        let rx = d.spawn(request("sk", "qwen-plus"));
        let events: Vec<TurnEvent> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        assert!(events.last().unwrap().is_terminal());
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }
}
