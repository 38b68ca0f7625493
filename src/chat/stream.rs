//! Pull-based streaming bridge.
//!
//! A streaming submit installs a StreamSession; the first poll flips its
//! `started` latch and launches one detached generation task. The task
//! appends provider fragments to an append-only buffer that any number of
//! subsequent polls snapshot. On a clean stream end the accumulated reply
//! is committed to the log before the completion flag flips, so a poller
//! that observes `complete` always finds the message. The task runs to
//! completion whether or not anyone keeps polling; there is no cancel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use crate::clock::unix_ms;
use crate::error::{ChatError, ProviderError};
use crate::provider::CompletionBackend;
use crate::session::Session;
use crate::types::{ChatConfig, ChatMessage, Role};

struct StreamProgress {
    buffer: String,
    complete: bool,
    fragments: u64,
}

pub struct StreamSession {
    pub prompt: String,
    pub created_at: i64,
    started: AtomicBool,
    progress: AsyncMutex<StreamProgress>,
}

impl StreamSession {
    pub fn new(prompt: String) -> Self {
        Self {
            prompt,
            created_at: unix_ms(),
            started: AtomicBool::new(false),
            progress: AsyncMutex::new(StreamProgress {
                buffer: String::new(),
                complete: false,
                fragments: 0,
            }),
        }
    }

    /// Current buffer contents plus the completion flag.
    pub async fn snapshot(&self) -> (String, bool) {
        let progress = self.progress.lock().await;
        (progress.buffer.clone(), progress.complete)
    }
}

pub struct StreamCoordinator {
    backend: Arc<dyn CompletionBackend>,
}

impl StreamCoordinator {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    /// Install a fresh stream session for `prompt`. Rejected while an
    /// earlier stream for this session is still running.
    pub async fn begin(&self, session: &Session, prompt: String) -> Result<(), ChatError> {
        let mut slot = session.stream.lock().await;
        if let Some(current) = slot.as_ref() {
            if current.started.load(Ordering::SeqCst) && !current.snapshot().await.1 {
                return Err(ChatError::StreamInFlight);
            }
        }
        *slot = Some(Arc::new(StreamSession::new(prompt)));
        Ok(())
    }

    /// Return the buffer as accumulated so far and whether the stream is
    /// done. The first poll starts generation; `begin` never does. Returns
    /// None when no streaming exchange exists for the session.
    pub async fn poll(&self, session: &Arc<Session>) -> Option<(String, bool)> {
        let stream = session.stream.lock().await.clone()?;
        if !stream.started.swap(true, Ordering::SeqCst) {
            self.launch(session.clone(), stream.clone()).await;
        }
        Some(stream.snapshot().await)
    }

    async fn launch(&self, session: Arc<Session>, stream: Arc<StreamSession>) {
        let (window, config) = {
            let chat = session.chat.lock().await;
            let len = chat.log.len();
            // the submit handler has already appended the prompt as the last
            // user message; the window must stop just before it
            let anchor = match chat.log.messages().last() {
                Some(m) if m.role == Role::User && m.content == stream.prompt => len - 1,
                _ => len,
            };
            let window = chat.log.window_before(anchor, &chat.config).to_vec();
            (window, chat.config.clone())
        };
        log::info!(target: "chat::stream", "starting generation ({} context messages)", window.len());
        let backend = self.backend.clone();
        tokio::spawn(run_generation(backend, session, stream, window, config));
    }
}

async fn run_generation(
    backend: Arc<dyn CompletionBackend>,
    session: Arc<Session>,
    stream: Arc<StreamSession>,
    window: Vec<ChatMessage>,
    config: ChatConfig,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let producer = {
        let backend = backend.clone();
        let prompt = stream.prompt.clone();
        tokio::spawn(async move { backend.stream(&prompt, &window, &config, tx).await })
    };

    while let Some(fragment) = rx.recv().await {
        let mut progress = stream.progress.lock().await;
        progress.buffer.push_str(&fragment);
        progress.fragments += 1;
    }

    let outcome = match producer.await {
        Ok(result) => result,
        Err(err) => Err(ProviderError::Stream(err.to_string())),
    };

    match outcome {
        Ok(()) => {
            let text = stream.progress.lock().await.buffer.clone();
            if text.trim().is_empty() {
                finish_with_error(&stream, &ProviderError::EmptyResponse).await;
            } else {
                // commit, then flip the flag: completion must never be
                // observable before the message is in the log
                {
                    let mut chat = session.chat.lock().await;
                    chat.log.append(Role::Assistant, text, None);
                }
                let mut progress = stream.progress.lock().await;
                progress.complete = true;
                log::info!(
                    target: "chat::stream",
                    "stream complete after {} fragments",
                    progress.fragments
                );
            }
        }
        Err(err) => {
            log::error!(target: "chat::stream", "stream failed: {err}");
            finish_with_error(&stream, &err).await;
        }
    }
}

async fn finish_with_error(stream: &StreamSession, err: &ProviderError) {
    let mut progress = stream.progress.lock().await;
    progress.buffer.push_str(&format!("Error: {err}"));
    progress.complete = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio::sync::Notify;

    /// Streaming backend that waits for a release signal, emits canned
    /// fragments, then either ends cleanly or fails.
    struct ScriptedStream {
        fragments: Vec<&'static str>,
        error: Option<&'static str>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        windows: std::sync::Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedStream {
        fn emitting(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                error: None,
                calls: AtomicUsize::new(0),
                gate: None,
                windows: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn gated(fragments: Vec<&'static str>, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::emitting(fragments)
            }
        }

        fn failing_after(fragments: Vec<&'static str>, error: &'static str) -> Self {
            Self {
                error: Some(error),
                ..Self::emitting(fragments)
            }
        }

        fn last_window(&self) -> Vec<ChatMessage> {
            self.windows.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedStream {
        async fn complete(
            &self,
            _prompt: &str,
            _window: &[ChatMessage],
            _config: &ChatConfig,
        ) -> Result<String, ProviderError> {
            unreachable!("streaming tests never call complete")
        }

        async fn stream(
            &self,
            _prompt: &str,
            window: &[ChatMessage],
            _config: &ChatConfig,
            sink: UnboundedSender<String>,
        ) -> Result<(), ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.windows.lock().unwrap().push(window.to_vec());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            for fragment in &self.fragments {
                let _ = sink.send(fragment.to_string());
            }
            match self.error {
                Some(message) => Err(ProviderError::Stream(message.to_string())),
                None => Ok(()),
            }
        }
    }

    fn setup(backend: Arc<ScriptedStream>) -> (StreamCoordinator, Arc<Session>) {
        let store = SessionStore::new(ChatConfig::default(), true);
        let (session, _) = store.get_or_create(None);
        (StreamCoordinator::new(backend), session)
    }

    async fn poll_until_complete(
        coordinator: &StreamCoordinator,
        session: &Arc<Session>,
    ) -> String {
        for _ in 0..400 {
            if let Some((buffer, true)) = coordinator.poll(session).await {
                return buffer;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("stream never completed");
    }

    #[tokio::test]
    async fn poll_without_a_stream_returns_none() {
        let (coordinator, session) = setup(Arc::new(ScriptedStream::emitting(vec![])));
        assert!(coordinator.poll(&session).await.is_none());
    }

    #[tokio::test]
    async fn begin_does_not_start_generation() {
        let backend = Arc::new(ScriptedStream::emitting(vec!["x"]));
        let (coordinator, session) = setup(backend.clone());

        coordinator
            .begin(&session, "hello".to_string())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        // first poll flips the latch
        coordinator.poll(&session).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn early_polls_see_an_empty_incomplete_buffer() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedStream::gated(vec!["later"], gate.clone()));
        let (coordinator, session) = setup(backend);

        coordinator.begin(&session, "hi".to_string()).await.unwrap();
        let (buffer, complete) = coordinator.poll(&session).await.unwrap();
        assert_eq!(buffer, "");
        assert!(!complete);

        gate.notify_one();
        let buffer = poll_until_complete(&coordinator, &session).await;
        assert_eq!(buffer, "later");
    }

    #[tokio::test]
    async fn completion_commits_exactly_one_assistant_message() {
        let backend = Arc::new(ScriptedStream::emitting(vec!["Hel", "lo"]));
        let (coordinator, session) = setup(backend);
        {
            let mut chat = session.chat.lock().await;
            chat.log.append(Role::User, "greet me".to_string(), None);
        }

        coordinator
            .begin(&session, "greet me".to_string())
            .await
            .unwrap();
        let buffer = poll_until_complete(&coordinator, &session).await;
        assert_eq!(buffer, "Hello");

        // polling after completion must not commit again
        for _ in 0..5 {
            let (buffer, complete) = coordinator.poll(&session).await.unwrap();
            assert_eq!(buffer, "Hello");
            assert!(complete);
        }

        let chat = session.chat.lock().await;
        let replies: Vec<&ChatMessage> = chat
            .log
            .messages()
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, "Hello");
        assert_eq!(chat.log.len(), 2);
    }

    #[tokio::test]
    async fn window_excludes_the_pending_prompt_entry() {
        // log: [U a, A b, U c] where "c" is the pending prompt; the stream
        // task must see [a, b] as context, not "c" twice
        let backend = Arc::new(ScriptedStream::emitting(vec!["d"]));
        let (coordinator, session) = setup(backend.clone());
        {
            let mut chat = session.chat.lock().await;
            chat.log.append(Role::User, "a".to_string(), None);
            chat.log.append(Role::Assistant, "b".to_string(), None);
            chat.log.append(Role::User, "c".to_string(), None);
        }

        coordinator.begin(&session, "c".to_string()).await.unwrap();
        poll_until_complete(&coordinator, &session).await;

        let window: Vec<String> = backend
            .last_window()
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(window, vec!["a", "b"]);

        let chat = session.chat.lock().await;
        assert_eq!(chat.log.len(), 4);
        assert_eq!(chat.log.messages()[3].content, "d");
    }

    #[tokio::test]
    async fn failure_appends_error_text_and_completes_without_commit() {
        let backend = Arc::new(ScriptedStream::failing_after(vec!["part"], "connection reset"));
        let (coordinator, session) = setup(backend);

        coordinator.begin(&session, "hi".to_string()).await.unwrap();
        let buffer = poll_until_complete(&coordinator, &session).await;
        assert!(buffer.starts_with("part"));
        assert!(buffer.contains("Error:"));
        assert!(buffer.contains("connection reset"));

        // the partial text is visible but never committed to the log
        assert!(session.chat.lock().await.log.is_empty());
    }

    #[tokio::test]
    async fn empty_stream_output_is_reported_as_an_error() {
        let backend = Arc::new(ScriptedStream::emitting(vec![]));
        let (coordinator, session) = setup(backend);

        coordinator.begin(&session, "hi".to_string()).await.unwrap();
        let buffer = poll_until_complete(&coordinator, &session).await;
        assert!(buffer.starts_with("Error:"));
        assert!(session.chat.lock().await.log.is_empty());
    }

    #[tokio::test]
    async fn second_begin_while_running_is_rejected() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedStream::gated(vec!["x"], gate.clone()));
        let (coordinator, session) = setup(backend);

        coordinator
            .begin(&session, "first".to_string())
            .await
            .unwrap();
        coordinator.poll(&session).await.unwrap();

        let err = coordinator
            .begin(&session, "second".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::StreamInFlight));

        gate.notify_one();
        poll_until_complete(&coordinator, &session).await;

        // once complete, a new exchange may start
        coordinator
            .begin(&session, "third".to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn begin_before_first_poll_may_be_replaced() {
        // a NotStarted session was never launched; replacing it leaks no task
        let backend = Arc::new(ScriptedStream::emitting(vec!["y"]));
        let (coordinator, session) = setup(backend.clone());

        coordinator
            .begin(&session, "draft".to_string())
            .await
            .unwrap();
        coordinator
            .begin(&session, "final".to_string())
            .await
            .unwrap();

        let buffer = poll_until_complete(&coordinator, &session).await;
        assert_eq!(buffer, "y");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
