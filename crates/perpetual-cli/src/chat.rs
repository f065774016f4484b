//! Chat session orchestration
//!
//! Owns the conversation state and drives one turn at a time: build the
//! bounded payload, open the stream, apply deltas to the trailing assistant
//! placeholder, and persist at stable points only (message append, stream
//! completion, stream failure) so a reload never sees a half-written
//! message.

use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;

use perpetual_core::{
    Message, Result, Role, SessionState, StreamEvent, build_payload,
};

use crate::api::{ChatClient, EventStream};
use crate::config::Params;
use crate::storage::{self, BACKUP_FILE_NAME, Store};

/// Seam between the session and the HTTP layer
#[async_trait]
pub trait CompletionTransport {
    /// Open a streaming completion for the payload
    async fn open(&self, model: &str, messages: &[Message]) -> Result<EventStream>;
}

#[async_trait]
impl CompletionTransport for ChatClient {
    async fn open(&self, model: &str, messages: &[Message]) -> Result<EventStream> {
        self.stream(model, messages).await
    }
}

/// Result of one send attempt
#[derive(Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Assistant response streamed to completion
    Completed,
    /// Input was blank or a stream is already in flight
    Rejected,
    /// Stream failed; the reason is user-facing
    Failed(String),
}

/// A chat session: conversation state plus the collaborators that persist
/// it and talk to the API. Exactly one stream may be in flight at a time.
pub struct ChatSession<T> {
    state: SessionState,
    params: Params,
    store: Store,
    transport: T,
    backup_path: PathBuf,
    is_streaming: bool,
}

impl<T: CompletionTransport> ChatSession<T> {
    pub fn new(state: SessionState, params: Params, store: Store, transport: T) -> Self {
        Self {
            state,
            params,
            store,
            transport,
            backup_path: PathBuf::from(BACKUP_FILE_NAME),
            is_streaming: false,
        }
    }

    /// Redirect periodic backup exports
    pub fn with_backup_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_path = path.into();
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn model(&self) -> &str {
        &self.params.model
    }

    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    /// Drop all conversation history and persist
    pub fn clear_messages(&mut self) {
        self.state.messages.clear();
        self.store.save(&self.state);
    }

    /// Update the system prompt and persist
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.state.system_prompt = prompt.into();
        self.store.save(&self.state);
    }

    /// Write a backup document to the given path
    pub fn export(&self, path: &std::path::Path) -> Result<()> {
        self.store.export(&self.state, &self.params.model, path)
    }

    /// Send one user message and stream the assistant response, invoking
    /// `on_delta` for each content fragment as it arrives.
    pub async fn send(&mut self, text: &str, mut on_delta: impl FnMut(&str) + Send) -> TurnOutcome {
        let text = text.trim();
        if self.is_streaming || text.is_empty() {
            return TurnOutcome::Rejected;
        }

        self.state.messages.push(Message::user(text));
        self.store.save(&self.state);

        self.maybe_periodic_backup();

        let payload = build_payload(
            &self.state.system_prompt,
            &self.state.messages,
            self.params.max_messages_for_api,
        );

        // Placeholder the deltas will grow into.
        self.state.messages.push(Message::assistant_empty());
        self.is_streaming = true;

        let mut stream = match self.transport.open(&self.params.model, &payload).await {
            Ok(stream) => stream,
            Err(e) => return self.fail_turn(e.to_string()),
        };

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta(delta) => {
                    if let Some(last) = self.state.messages.last_mut() {
                        last.content.push_str(&delta);
                    }
                    on_delta(&delta);
                }
                StreamEvent::Done => {
                    self.is_streaming = false;
                    self.store.save(&self.state);
                    return TurnOutcome::Completed;
                }
                StreamEvent::Error(reason) => return self.fail_turn(reason),
            }
        }

        // The transport contract guarantees a terminal event; reaching here
        // means the stream was dropped mid-flight.
        self.fail_turn("stream ended unexpectedly".to_string())
    }

    /// Surface a failed turn: discard the placeholder if it never received
    /// content, release the guard, persist the stable state.
    fn fail_turn(&mut self, reason: String) -> TurnOutcome {
        self.is_streaming = false;

        let placeholder_empty = matches!(
            self.state.messages.last(),
            Some(last) if last.role == Role::Assistant && last.content.is_empty()
        );
        if placeholder_empty {
            self.state.messages.pop();
        }

        self.store.save(&self.state);
        TurnOutcome::Failed(reason)
    }

    fn maybe_periodic_backup(&mut self) {
        let now = chrono::Utc::now().timestamp_millis();
        if !storage::should_trigger_periodic_save(
            now,
            self.params.daily_save_period_hours,
            self.state.last_save_timestamp,
        ) {
            return;
        }

        match self
            .store
            .export(&self.state, &self.params.model, &self.backup_path)
        {
            Ok(()) => storage::mark_saved_now(&self.store, &mut self.state),
            Err(e) => tracing::warn!("periodic backup failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perpetual_core::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    fn temp_path(name: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("perpetual-chat-{}-{n}-{name}", std::process::id()))
    }

    /// Transport that replays a scripted event sequence
    struct ScriptedTransport {
        events: Vec<StreamEvent>,
        fail_open: bool,
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn open(&self, _model: &str, _messages: &[Message]) -> Result<EventStream> {
            if self.fail_open {
                return Err(Error::transport("HTTP 401 Unauthorized"));
            }
            Ok(Box::pin(tokio_stream::iter(self.events.clone())))
        }
    }

    fn session(events: Vec<StreamEvent>, fail_open: bool) -> ChatSession<ScriptedTransport> {
        let mut state = SessionState::default();
        // Keep the periodic backup quiet during tests.
        state.last_save_timestamp = chrono::Utc::now().timestamp_millis();

        ChatSession::new(
            state,
            Params::default(),
            Store::new(temp_path("slot.json")),
            ScriptedTransport { events, fail_open },
        )
        .with_backup_path(temp_path("backup.json"))
    }

    #[tokio::test]
    async fn test_send_streams_into_trailing_assistant() {
        let mut session = session(
            vec![
                StreamEvent::Delta("Hel".into()),
                StreamEvent::Delta("lo".into()),
                StreamEvent::Done,
            ],
            false,
        );

        let mut rendered = String::new();
        let outcome = session.send("hi there", |d| rendered.push_str(d)).await;

        assert_eq!(outcome, TurnOutcome::Completed);
        assert_eq!(rendered, "Hello");

        let messages = &session.state().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], Message::user("hi there"));
        assert_eq!(messages[1], Message::assistant("Hello"));
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn test_blank_input_rejected() {
        let mut session = session(vec![], false);
        let outcome = session.send("   ", |_| {}).await;
        assert_eq!(outcome, TurnOutcome::Rejected);
        assert!(session.state().messages.is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_rolls_back_empty_placeholder() {
        let mut session = session(vec![], true);
        let outcome = session.send("hi", |_| {}).await;

        assert_eq!(outcome, TurnOutcome::Failed("HTTP 401 Unauthorized".into()));
        // User message kept, placeholder gone.
        let messages = &session.state().messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn test_midstream_error_keeps_partial_content() {
        let mut session = session(
            vec![
                StreamEvent::Delta("partial".into()),
                StreamEvent::Error("connection reset".into()),
            ],
            false,
        );

        let outcome = session.send("hi", |_| {}).await;
        assert_eq!(outcome, TurnOutcome::Failed("connection reset".into()));

        // The placeholder already has content, so it survives the rollback.
        let messages = &session.state().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1], Message::assistant("partial"));
    }

    #[tokio::test]
    async fn test_state_persisted_after_completion() {
        let slot = temp_path("persist.json");
        let mut state = SessionState::default();
        state.last_save_timestamp = chrono::Utc::now().timestamp_millis();

        let mut session = ChatSession::new(
            state,
            Params::default(),
            Store::new(&slot),
            ScriptedTransport {
                events: vec![StreamEvent::Delta("ok".into()), StreamEvent::Done],
                fail_open: false,
            },
        )
        .with_backup_path(temp_path("backup.json"));

        session.send("hi", |_| {}).await;

        let reloaded = Store::new(&slot).load();
        assert_eq!(reloaded.messages.len(), 2);
        assert_eq!(reloaded.messages[1], Message::assistant("ok"));
        std::fs::remove_file(&slot).ok();
    }
}
