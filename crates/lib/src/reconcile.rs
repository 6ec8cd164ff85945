//! Session reconciler: owns the live conversation, the streaming accumulator, the view log, and
//! the transcript list, and applies [`TurnEvent`]s from the worker on the UI thread.
//!
//! Phases run `Idle -> AwaitingResponse -> Streaming* -> Idle`; both success and failure return
//! to `Idle`. Only a successful completion commits assistant text to the conversation.

use chrono::Local;
use std::path::PathBuf;

use crate::dispatch::TurnEvent;
use crate::session::{Conversation, Message, Role, HELP_MESSAGE, WELCOME_MESSAGE};
use crate::transcript::{self, ThemeMode, TranscriptEntry, TranscriptError, TranscriptStore};

pub const BUSY_MESSAGE: &str = "A reply is still on its way. Please wait for it before sending another message.";
pub const SETTINGS_UPDATED_MESSAGE: &str = "Settings updated, you can start chatting now.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingResponse,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// The welcome preamble; never part of the conversation.
    Welcome,
    /// A message of the conversation (live or loaded from a transcript).
    Message,
    /// Errors and command output; shown as assistant text, never saved.
    Notice,
}

/// One block in the chat view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewEntry {
    pub role: Role,
    pub content: String,
    pub kind: EntryKind,
}

impl ViewEntry {
    fn welcome(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            kind: EntryKind::Welcome,
        }
    }

    fn message(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            kind: EntryKind::Message,
        }
    }

    fn notice(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            kind: EntryKind::Notice,
        }
    }
}

/// What the view is showing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewMode {
    /// The live conversation.
    Current,
    /// A saved transcript, read-only. `html` has the current theme applied.
    Historical { file_name: String, html: String },
}

/// A turn ready for the dispatcher: full history (welcome excluded) and the continuation token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub messages: Vec<Message>,
    pub session_id: Option<String>,
}

/// Result of [`Reconciler::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Blank input.
    Ignored,
    /// A turn is already in flight; nothing was appended.
    Busy,
    /// `/reset` or `/new`: the conversation was saved and cleared.
    Reset,
    /// `/help`: a notice was shown.
    Help,
    /// The user message was appended; run this turn.
    Send(PendingTurn),
}

/// Result of [`Reconciler::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Text to append to the streaming display.
    Delta(String),
    /// The reply finished; `committed` is false when it carried no text.
    Completed { committed: bool },
    /// The turn failed and the error was shown.
    Failed,
    /// Arrived while idle (e.g. after a reset) and was dropped.
    Stale,
}

pub struct Reconciler {
    conversation: Conversation,
    store: TranscriptStore,
    welcome: String,
    mode: ThemeMode,
    phase: Phase,
    accumulator: String,
    view: Vec<ViewEntry>,
    viewing: ViewMode,
    history: Vec<TranscriptEntry>,
}

impl Reconciler {
    pub fn new(store: TranscriptStore, mode: ThemeMode) -> Self {
        let mut reconciler = Self {
            conversation: Conversation::new(),
            store,
            welcome: WELCOME_MESSAGE.to_string(),
            mode,
            phase: Phase::Idle,
            accumulator: String::new(),
            view: Vec::new(),
            viewing: ViewMode::Current,
            history: Vec::new(),
        };
        reconciler.reset_view();
        reconciler.refresh_history();
        reconciler
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Text received so far for the in-flight reply.
    pub fn streaming_text(&self) -> Option<&str> {
        self.is_busy().then_some(self.accumulator.as_str())
    }

    pub fn view(&self) -> &[ViewEntry] {
        &self.view
    }

    pub fn viewing(&self) -> &ViewMode {
        &self.viewing
    }

    pub fn is_historical(&self) -> bool {
        matches!(self.viewing, ViewMode::Historical { .. })
    }

    /// Transcripts newest first, as of the last refresh.
    pub fn history(&self) -> &[TranscriptEntry] {
        &self.history
    }

    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    pub fn mode(&self) -> ThemeMode {
        self.mode
    }

    /// Switch theme for future saves and for the transcript on display.
    pub fn set_mode(&mut self, mode: ThemeMode) {
        self.mode = mode;
        if let ViewMode::Historical { html, .. } = &mut self.viewing {
            *html = transcript::apply_mode(html, mode);
        }
    }

    pub fn push_notice(&mut self, text: impl Into<String>) {
        self.view.push(ViewEntry::notice(text));
    }

    /// Tell the user the new settings took effect, if nothing has been said yet.
    pub fn settings_saved(&mut self) {
        if self.conversation.is_empty() && !self.is_historical() {
            self.push_notice(SETTINGS_UPDATED_MESSAGE);
        }
    }

    fn reset_view(&mut self) {
        self.view.clear();
        self.view.push(ViewEntry::welcome(&self.welcome));
    }

    /// Handle text typed by the user: commands, or a new user message that starts a turn.
    pub fn submit(&mut self, text: &str) -> Submission {
        let text = text.trim();
        if text.is_empty() {
            return Submission::Ignored;
        }
        if self.is_historical() {
            self.start_new_session();
        }
        match text.to_ascii_lowercase().as_str() {
            "/reset" | "/new" => {
                self.reset();
                return Submission::Reset;
            }
            "/help" => {
                self.push_notice(HELP_MESSAGE);
                return Submission::Help;
            }
            _ => {}
        }
        if self.is_busy() {
            self.push_notice(BUSY_MESSAGE);
            return Submission::Busy;
        }
        if self.conversation.transcript_file.is_none() && self.conversation.is_empty() {
            let name = self.store.allocate_name(Local::now().naive_local());
            log::info!("new session started, transcript file: {}", name);
            self.conversation.transcript_file = Some(name);
        }
        let message = Message::user(text);
        self.view.push(ViewEntry::message(&message));
        self.conversation.push(message);
        self.accumulator.clear();
        self.phase = Phase::AwaitingResponse;
        Submission::Send(PendingTurn {
            messages: self.conversation.messages.clone(),
            session_id: self.conversation.session_id.clone(),
        })
    }

    /// Apply one worker event. Terminal events save the conversation and refresh the history list.
    pub fn apply(&mut self, event: TurnEvent) -> Applied {
        if self.phase == Phase::Idle {
            log::warn!("ignoring turn event received while idle: {:?}", event);
            return Applied::Stale;
        }
        match event {
            TurnEvent::Fragment { text, session_id } => {
                self.conversation.update_session_id(session_id.as_deref());
                self.phase = Phase::Streaming;
                self.accumulator.push_str(&text);
                Applied::Delta(text)
            }
            TurnEvent::Completed { session_id } => {
                self.conversation.update_session_id(session_id.as_deref());
                let answer = std::mem::take(&mut self.accumulator);
                let committed = !answer.is_empty();
                if committed {
                    log::info!("assistant reply added to conversation ({} bytes)", answer.len());
                    let message = Message::assistant(answer);
                    self.view.push(ViewEntry::message(&message));
                    self.conversation.push(message);
                } else {
                    log::info!("turn finished without reply text");
                }
                self.finish_turn();
                Applied::Completed { committed }
            }
            TurnEvent::Failed {
                message,
                session_id,
            } => {
                self.conversation.update_session_id(session_id.as_deref());
                self.accumulator.clear();
                self.push_notice(message);
                self.finish_turn();
                Applied::Failed
            }
        }
    }

    /// The worker went away without a terminal event.
    pub fn worker_lost(&mut self) -> Applied {
        self.apply(TurnEvent::Failed {
            message: "Request failed, please try again later. Error: the request was interrupted."
                .to_string(),
            session_id: None,
        })
    }

    fn finish_turn(&mut self) {
        self.phase = Phase::Idle;
        self.persist();
        self.refresh_history();
    }

    /// Save the conversation to its transcript, allocating a file name if it has none. Returns
    /// the written path; failures are logged and yield `None`.
    pub fn persist(&mut self) -> Option<PathBuf> {
        if self.conversation.is_empty() {
            log::info!("conversation is empty, nothing to save");
            return None;
        }
        let file_name = match &self.conversation.transcript_file {
            Some(name) => name.clone(),
            None => {
                let name = self.store.allocate_name(Local::now().naive_local());
                log::info!("allocated transcript file for current session: {}", name);
                self.conversation.transcript_file = Some(name.clone());
                name
            }
        };
        match self
            .store
            .save(&file_name, &self.welcome, &self.conversation.messages, self.mode)
        {
            Ok(path) => {
                log::info!("saved conversation to {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::error!("failed to save conversation to {}: {}", file_name, e);
                None
            }
        }
    }

    pub fn refresh_history(&mut self) {
        match self.store.list() {
            Ok(list) => self.history = list,
            Err(e) => log::error!("failed to list transcripts: {}", e),
        }
    }

    /// Leave the current or historical view for a fresh conversation. The live conversation is
    /// saved first; a historical one is already on disk.
    pub fn start_new_session(&mut self) {
        if !self.is_historical() {
            self.persist();
        }
        self.conversation.clear();
        self.accumulator.clear();
        self.phase = Phase::Idle;
        self.viewing = ViewMode::Current;
        self.reset_view();
        log::info!("switched to a new session");
    }

    /// `/reset`: save, clear, and refresh the history list.
    pub fn reset(&mut self) {
        self.start_new_session();
        self.refresh_history();
    }

    /// Show a saved transcript. The live conversation is saved and closed first.
    pub fn open_transcript(&mut self, file_name: &str) -> Result<(), TranscriptError> {
        if !self.is_historical() {
            self.persist();
        }
        let loaded = match self.store.load(file_name) {
            Ok(t) => t,
            Err(e) => {
                log::error!("failed to load transcript {}: {}", file_name, e);
                self.refresh_history();
                return Err(e);
            }
        };
        self.conversation.clear();
        self.accumulator.clear();
        self.phase = Phase::Idle;
        self.reset_view();
        self.view.extend(loaded.messages.iter().map(ViewEntry::message));
        self.viewing = ViewMode::Historical {
            file_name: loaded.file_name,
            html: transcript::apply_mode(&loaded.html, self.mode),
        };
        log::info!("showing transcript {} in {} mode", file_name, self.mode.as_str());
        Ok(())
    }

    /// Delete a transcript. If it is the one on display the view goes back to a fresh
    /// conversation; if it backs the live conversation, the next save writes a new file.
    pub fn delete_transcript(&mut self, file_name: &str) -> Result<(), TranscriptError> {
        let result = self.store.delete(file_name);
        match &result {
            Ok(()) => {
                log::info!("deleted transcript {}", file_name);
                let showing_deleted = matches!(
                    &self.viewing,
                    ViewMode::Historical { file_name: shown, .. } if shown == file_name
                );
                if showing_deleted {
                    self.conversation.clear();
                    self.accumulator.clear();
                    self.phase = Phase::Idle;
                    self.viewing = ViewMode::Current;
                    self.reset_view();
                } else if self.conversation.transcript_file.as_deref() == Some(file_name) {
                    self.conversation.transcript_file = None;
                }
            }
            Err(e) => log::error!("failed to delete transcript {}: {}", file_name, e),
        }
        self.refresh_history();
        result
    }

    /// Final save on exit; a displayed historical transcript is left untouched.
    pub fn shutdown(&mut self) {
        if !self.is_historical() {
            self.persist();
        }
        log::info!("session closed");
    }
}
