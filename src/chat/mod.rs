pub mod history;
pub mod notices;
pub mod stream;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ChatError, TransportError};
use history::{HistoryStore, HistoryWriter};
use stream::{ByteStream, Utf8Decoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    fn greeting() -> Self {
        Self {
            id: "welcome".to_string(),
            ..Self::new(Role::System, notices::GREETING)
        }
    }
}

/// Answer style requested from the assistant. Sent verbatim on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChatMode {
    #[default]
    Professional,
    #[serde(rename = "ELI5")]
    Eli5,
    Negotiator,
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatMode::Professional => write!(f, "Professional"),
            ChatMode::Eli5 => write!(f, "ELI5"),
            ChatMode::Negotiator => write!(f, "Negotiator"),
        }
    }
}

impl FromStr for ChatMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "professional" => Ok(ChatMode::Professional),
            "eli5" => Ok(ChatMode::Eli5),
            "negotiator" => Ok(ChatMode::Negotiator),
            other => anyhow::bail!(
                "unknown mode '{}' (expected Professional, ELI5 or Negotiator)",
                other
            ),
        }
    }
}

/// Body of a streamed question.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest {
    pub query: String,
    pub mode: ChatMode,
    pub context_summary: String,
}

/// The two question endpoints the session talks to.
#[async_trait]
pub trait AskTransport: Send + Sync {
    /// One-shot question; the whole answer arrives at once.
    async fn ask(&self, query: &str) -> Result<String, TransportError>;

    /// Streamed question. Resolves once the response head has arrived with a
    /// success status; the body follows as a stream of chunks.
    async fn ask_stream(&self, request: &StreamRequest) -> Result<ByteStream, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    StreamingResponse,
    Error,
}

/// Everything a view needs to follow the conversation. Delivered through an
/// unbounded channel so no intermediate prefix is ever coalesced away.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    StateChanged(SessionState),
    MessageAppended(ChatMessage),
    /// Full current content of a message that grew.
    ContentUpdated { id: String, content: String },
    /// The log was replaced wholesale (clear).
    Reset(Vec<ChatMessage>),
}

/// How an accepted exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Answered,
    /// The failure has already been recorded in the log.
    Failed,
}

#[derive(Debug, Clone)]
pub struct ChatSnapshot {
    pub state: SessionState,
    pub messages: Vec<ChatMessage>,
    pub active_stream: Option<String>,
}

struct Inner {
    messages: Vec<ChatMessage>,
    state: SessionState,
    active_stream: Option<String>,
    subscribers: Vec<mpsc::UnboundedSender<ChatEvent>>,
}

/// One conversation: message log, in-flight request state, persistence.
///
/// Only one request may be in flight; a second `send` while busy is rejected
/// with [`ChatError::Busy`] rather than queued. State lives behind a plain
/// mutex that is never held across an await point; history writes happen
/// off that lock through a [`HistoryWriter`].
pub struct ChatSession {
    transport: Arc<dyn AskTransport>,
    history: HistoryWriter,
    inner: Mutex<Inner>,
    cancel: CancellationToken,
}

impl ChatSession {
    /// Restore the persisted conversation, or start a fresh one.
    /// Must be called inside a tokio runtime.
    pub fn restore(transport: Arc<dyn AskTransport>, history: Arc<dyn HistoryStore>) -> Self {
        let messages = match history.load() {
            Ok(Some(messages)) if !messages.is_empty() => {
                info!(count = messages.len(), "chat history restored");
                messages
            }
            Ok(_) => vec![ChatMessage::greeting()],
            Err(e) => {
                warn!("Unreadable chat history, starting fresh: {:#}", e);
                vec![ChatMessage::greeting()]
            }
        };

        Self {
            transport,
            history: HistoryWriter::spawn(history),
            inner: Mutex::new(Inner {
                messages,
                state: SessionState::Idle,
                active_stream: None,
                subscribers: Vec::new(),
            }),
            cancel: CancellationToken::new(),
        }
    }

    /// Receive every change from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let inner = self.lock();
        ChatSnapshot {
            state: inner.state,
            messages: inner.messages.clone(),
            active_stream: inner.active_stream.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Ask a question and stream the answer into a new assistant message.
    pub async fn send(
        &self,
        query: &str,
        mode: ChatMode,
        context_summary: &str,
    ) -> Result<SendOutcome, ChatError> {
        let query = self.begin(query)?;
        let request = StreamRequest {
            query,
            mode,
            context_summary: context_summary.to_string(),
        };
        debug!(mode = %request.mode, "opening answer stream");

        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return Err(self.abandon()),
            opened = self.transport.ask_stream(&request) => opened,
        };
        let mut body = match opened {
            Ok(body) => body,
            Err(e) => {
                warn!("Answer stream could not be opened: {}", e);
                self.fail(None);
                return Ok(SendOutcome::Failed);
            }
        };

        let id = self.open_placeholder();
        let mut decoder = Utf8Decoder::default();
        let mut chunks = 0usize;

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Err(self.abandon()),
                next = body.next() => next,
            };
            match next {
                Some(Ok(bytes)) => {
                    let text = decoder.push(&bytes);
                    if !text.is_empty() {
                        chunks += 1;
                        self.append_chunk(&id, &text);
                    }
                }
                Some(Err(e)) => {
                    let tail = decoder.finish();
                    if !tail.is_empty() {
                        self.append_chunk(&id, &tail);
                    }
                    warn!(chunks, "Answer stream failed: {}", e);
                    self.fail(Some(&id));
                    return Ok(SendOutcome::Failed);
                }
                None => {
                    let tail = decoder.finish();
                    if !tail.is_empty() {
                        chunks += 1;
                        self.append_chunk(&id, &tail);
                    }
                    info!(chunks, "answer stream complete");
                    self.finish();
                    return Ok(SendOutcome::Answered);
                }
            }
        }
    }

    /// Non-streaming question: the full answer lands as one message.
    pub async fn ask(&self, query: &str) -> Result<SendOutcome, ChatError> {
        let query = self.begin(query)?;

        let answer = tokio::select! {
            _ = self.cancel.cancelled() => return Err(self.abandon()),
            answer = self.transport.ask(&query) => answer,
        };
        match answer {
            Ok(answer) => {
                let mut inner = self.lock();
                let message = ChatMessage::new(Role::Assistant, answer);
                inner.messages.push(message.clone());
                self.publish(&mut inner, ChatEvent::MessageAppended(message));
                self.set_state(&mut inner, SessionState::Idle);
                self.persist(&inner);
                Ok(SendOutcome::Answered)
            }
            Err(e) => {
                warn!("Question failed: {}", e);
                self.fail(None);
                Ok(SendOutcome::Failed)
            }
        }
    }

    /// Drop the conversation and start over with a single system message.
    pub fn clear(&self) -> Result<(), ChatError> {
        let mut inner = self.lock();
        if self.cancel.is_cancelled() {
            return Err(ChatError::Disposed);
        }
        if inner.state != SessionState::Idle {
            return Err(ChatError::Busy);
        }

        inner.messages = vec![ChatMessage::new(Role::System, notices::CLEARED)];
        let messages = inner.messages.clone();
        self.publish(&mut inner, ChatEvent::Reset(messages));
        self.persist(&inner);
        info!("chat cleared");
        Ok(())
    }

    /// Tear down: cancels any in-flight read and closes every subscriber.
    /// Nothing is published after this returns.
    pub fn dispose(&self) {
        self.cancel.cancel();
        self.lock().subscribers.clear();
        debug!("chat session disposed");
    }

    /// Wait until every change made so far has been written to history.
    pub async fn flush(&self) {
        self.history.flush().await;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, inner: &mut Inner, event: ChatEvent) {
        inner.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        self.publish(inner, ChatEvent::StateChanged(state));
    }

    fn persist(&self, inner: &Inner) {
        self.history.submit(inner.messages.clone());
    }

    fn begin(&self, query: &str) -> Result<String, ChatError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ChatError::EmptyQuery);
        }

        let mut inner = self.lock();
        if self.cancel.is_cancelled() {
            return Err(ChatError::Disposed);
        }
        if inner.state != SessionState::Idle {
            debug!(state = ?inner.state, "send rejected, session busy");
            return Err(ChatError::Busy);
        }

        let message = ChatMessage::new(Role::User, query);
        inner.messages.push(message.clone());
        self.publish(&mut inner, ChatEvent::MessageAppended(message));
        self.set_state(&mut inner, SessionState::Sending);
        self.persist(&inner);
        Ok(query.to_string())
    }

    fn open_placeholder(&self) -> String {
        let mut inner = self.lock();
        let message = ChatMessage::new(Role::Assistant, "");
        let id = message.id.clone();
        inner.messages.push(message.clone());
        inner.active_stream = Some(id.clone());
        self.set_state(&mut inner, SessionState::StreamingResponse);
        self.publish(&mut inner, ChatEvent::MessageAppended(message));
        self.persist(&inner);
        id
    }

    fn append_chunk(&self, id: &str, text: &str) {
        let mut inner = self.lock();
        let Some(message) = inner.messages.iter_mut().rev().find(|m| m.id == id) else {
            return;
        };
        message.content.push_str(text);
        let content = message.content.clone();
        self.publish(
            &mut inner,
            ChatEvent::ContentUpdated {
                id: id.to_string(),
                content,
            },
        );
        self.persist(&inner);
    }

    fn finish(&self) {
        let mut inner = self.lock();
        inner.active_stream = None;
        self.set_state(&mut inner, SessionState::Idle);
        self.persist(&inner);
    }

    /// Record a failure and recover to idle.
    ///
    /// With no placeholder, a notice message is appended. An empty
    /// placeholder is filled with the notice. A partial answer is kept as-is
    /// and followed by a short interruption notice.
    fn fail(&self, placeholder: Option<&str>) {
        let mut inner = self.lock();
        self.set_state(&mut inner, SessionState::Error);

        let existing = placeholder.and_then(|id| inner.messages.iter().position(|m| m.id == id));
        match existing {
            Some(pos) if inner.messages[pos].content.is_empty() => {
                let message = &mut inner.messages[pos];
                message.content = notices::CONNECTION_FAILED.to_string();
                let event = ChatEvent::ContentUpdated {
                    id: message.id.clone(),
                    content: message.content.clone(),
                };
                self.publish(&mut inner, event);
            }
            Some(_) => {
                let notice = ChatMessage::new(Role::Assistant, notices::INTERRUPTED);
                inner.messages.push(notice.clone());
                self.publish(&mut inner, ChatEvent::MessageAppended(notice));
            }
            None => {
                let notice = ChatMessage::new(Role::Assistant, notices::CONNECTION_FAILED);
                inner.messages.push(notice.clone());
                self.publish(&mut inner, ChatEvent::MessageAppended(notice));
            }
        }

        inner.active_stream = None;
        self.set_state(&mut inner, SessionState::Idle);
        self.persist(&inner);
    }

    // Disposal mid-request: keep what arrived, publish nothing further.
    fn abandon(&self) -> ChatError {
        let mut inner = self.lock();
        inner.active_stream = None;
        inner.state = SessionState::Idle;
        self.persist(&inner);
        debug!("in-flight request abandoned on dispose");
        ChatError::Disposed
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
