//! Blocking conversation turns against the completion provider.
//!
//! Provider failures never propagate out of a turn: the user message stays
//! in the log and a fixed apology is inserted where the reply would go, so
//! the conversation remains consistent while the provider is down.

use std::sync::Arc;

use crate::error::ChatError;
use crate::provider::CompletionBackend;
use crate::session::Session;
use crate::types::Role;

pub const TURN_FALLBACK: &str =
    "Sorry, I encountered an error while processing your request. Please try again.";
pub const REGENERATE_FALLBACK: &str =
    "Sorry, I encountered an error while regenerating your request. Please try again.";

pub struct ChatEngine {
    backend: Arc<dyn CompletionBackend>,
}

impl ChatEngine {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    /// Append the user turn, request a reply, append it, return both ids.
    pub async fn process_turn(
        &self,
        session: &Session,
        prompt: String,
        image: Option<String>,
    ) -> Result<(String, String), ChatError> {
        if prompt.trim().is_empty() {
            return Err(ChatError::InvalidInput("prompt must not be empty".to_string()));
        }

        let (user_id, window, config) = {
            let mut chat = session.chat.lock().await;
            let config = chat.config.clone();
            let user_id = chat
                .log
                .append(Role::User, prompt.clone(), image)
                .id
                .clone();
            let anchor = chat.log.len() - 1;
            let window = chat.log.window_before(anchor, &config).to_vec();
            (user_id, window, config)
        };

        let reply = match self.backend.complete(&prompt, &window, &config).await {
            Ok(text) => text,
            Err(err) => {
                log::error!(target: "chat::engine", "completion failed: {err}");
                TURN_FALLBACK.to_string()
            }
        };

        let assistant_id = {
            let mut chat = session.chat.lock().await;
            chat.log.append(Role::Assistant, reply, None).id.clone()
        };
        log::info!(target: "chat::engine", "turn complete ({user_id} -> {assistant_id})");
        Ok((user_id, assistant_id))
    }

    /// Re-answer the user message with the given id: the assistant reply
    /// directly after it (if any) is replaced, everything else stays put.
    pub async fn regenerate(&self, session: &Session, message_id: &str) -> Result<String, ChatError> {
        let (prompt, window, config) = {
            let mut chat = session.chat.lock().await;
            let idx = chat
                .log
                .position(message_id)
                .filter(|&i| chat.log.messages()[i].role == Role::User)
                .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
            chat.log.remove_reply_after(idx);
            let config = chat.config.clone();
            let prompt = chat.log.messages()[idx].content.clone();
            let window = chat.log.window_before(idx, &config).to_vec();
            (prompt, window, config)
        };

        let reply = match self.backend.complete(&prompt, &window, &config).await {
            Ok(text) => text,
            Err(err) => {
                log::error!(target: "chat::engine", "regeneration failed: {err}");
                REGENERATE_FALLBACK.to_string()
            }
        };

        let mut chat = session.chat.lock().await;
        // re-resolve: the anchor may have moved while the provider ran
        let idx = chat
            .log
            .position(message_id)
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
        Ok(chat.log.insert_after(idx, Role::Assistant, reply).id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::session::SessionStore;
    use crate::types::{ChatConfig, ChatMessage};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc::UnboundedSender;

    /// Backend that replays a canned reply (or failure) and records the
    /// windows it was called with.
    struct ScriptedBackend {
        reply: Option<String>,
        windows: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        fn replying(text: &str) -> Self {
            Self {
                reply: Some(text.to_string()),
                windows: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                windows: Mutex::new(Vec::new()),
            }
        }

        fn last_window(&self) -> Vec<ChatMessage> {
            self.windows.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(
            &self,
            _prompt: &str,
            window: &[ChatMessage],
            _config: &ChatConfig,
        ) -> Result<String, ProviderError> {
            self.windows.lock().unwrap().push(window.to_vec());
            match &self.reply {
                Some(text) => Ok(text.clone()),
                None => Err(ProviderError::EmptyResponse),
            }
        }

        async fn stream(
            &self,
            _prompt: &str,
            _window: &[ChatMessage],
            _config: &ChatConfig,
            _sink: UnboundedSender<String>,
        ) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn session_with(backend: Arc<ScriptedBackend>) -> (ChatEngine, Arc<crate::session::Session>) {
        let store = SessionStore::new(ChatConfig::default(), true);
        let (session, _) = store.get_or_create(None);
        (ChatEngine::new(backend), session)
    }

    #[tokio::test]
    async fn process_turn_appends_both_messages_in_order() {
        let backend = Arc::new(ScriptedBackend::replying("pong"));
        let (engine, session) = session_with(backend);

        let (user_id, assistant_id) = engine
            .process_turn(&session, "ping".to_string(), None)
            .await
            .unwrap();

        let chat = session.chat.lock().await;
        assert_eq!(chat.log.len(), 2);
        assert_eq!(chat.log.get(&user_id).unwrap().content, "ping");
        assert_eq!(chat.log.get(&assistant_id).unwrap().content, "pong");
        assert_eq!(chat.log.position(&assistant_id), Some(1));
    }

    #[tokio::test]
    async fn provider_failure_becomes_an_apology_reply() {
        let backend = Arc::new(ScriptedBackend::failing());
        let (engine, session) = session_with(backend);

        let (_, assistant_id) = engine
            .process_turn(&session, "ping".to_string(), None)
            .await
            .unwrap();

        let chat = session.chat.lock().await;
        assert_eq!(chat.log.len(), 2);
        assert_eq!(chat.log.get(&assistant_id).unwrap().content, TURN_FALLBACK);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_without_touching_the_log() {
        let backend = Arc::new(ScriptedBackend::replying("pong"));
        let (engine, session) = session_with(backend);

        let err = engine
            .process_turn(&session, "   ".to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
        assert!(session.chat.lock().await.log.is_empty());
    }

    #[tokio::test]
    async fn window_holds_exactly_the_prior_turns() {
        // maxHistoryTurns=1 and log [U a, A b, U c, A d]: submitting "e"
        // must dispatch exactly [U c, A d] as context
        let backend = Arc::new(ScriptedBackend::replying("f"));
        let (engine, session) = session_with(backend.clone());
        {
            let mut chat = session.chat.lock().await;
            chat.config.max_history_turns = 1;
            chat.log.append(Role::User, "a".to_string(), None);
            chat.log.append(Role::Assistant, "b".to_string(), None);
            chat.log.append(Role::User, "c".to_string(), None);
            chat.log.append(Role::Assistant, "d".to_string(), None);
        }

        engine
            .process_turn(&session, "e".to_string(), None)
            .await
            .unwrap();

        let window = backend.last_window();
        let contents: Vec<&str> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn history_disabled_sends_no_context() {
        let backend = Arc::new(ScriptedBackend::replying("reply"));
        let (engine, session) = session_with(backend.clone());
        {
            let mut chat = session.chat.lock().await;
            chat.config.history_enabled = false;
            chat.log.append(Role::User, "a".to_string(), None);
            chat.log.append(Role::Assistant, "b".to_string(), None);
        }

        engine
            .process_turn(&session, "c".to_string(), None)
            .await
            .unwrap();
        assert!(backend.last_window().is_empty());
    }

    #[tokio::test]
    async fn regenerate_replaces_the_following_reply_in_place() {
        let backend = Arc::new(ScriptedBackend::replying("better"));
        let (engine, session) = session_with(backend);
        {
            let mut chat = session.chat.lock().await;
            chat.log.append(Role::User, "q1".to_string(), None);
            chat.log.append(Role::Assistant, "a1".to_string(), None);
            chat.log.append(Role::User, "q2".to_string(), None);
            chat.log.append(Role::Assistant, "a2".to_string(), None);
        }

        let new_id = engine.regenerate(&session, "msg-1").await.unwrap();

        let chat = session.chat.lock().await;
        assert_eq!(chat.log.len(), 4);
        assert_eq!(chat.log.position("msg-1"), Some(0));
        assert_eq!(chat.log.position(&new_id), Some(1));
        assert_eq!(chat.log.get(&new_id).unwrap().content, "better");
        assert_eq!(chat.log.get(&new_id).unwrap().role, Role::Assistant);
        // the old reply is gone
        assert!(chat.log.get("msg-2").is_none());
    }

    #[tokio::test]
    async fn regenerate_works_without_an_existing_reply() {
        let backend = Arc::new(ScriptedBackend::replying("fresh"));
        let (engine, session) = session_with(backend);
        {
            let mut chat = session.chat.lock().await;
            chat.log.append(Role::User, "q".to_string(), None);
        }

        let new_id = engine.regenerate(&session, "msg-1").await.unwrap();
        let chat = session.chat.lock().await;
        assert_eq!(chat.log.len(), 2);
        assert_eq!(chat.log.position(&new_id), Some(1));
    }

    #[tokio::test]
    async fn regenerate_rejects_assistant_and_unknown_ids() {
        let backend = Arc::new(ScriptedBackend::replying("x"));
        let (engine, session) = session_with(backend);
        {
            let mut chat = session.chat.lock().await;
            chat.log.append(Role::User, "q".to_string(), None);
            chat.log.append(Role::Assistant, "a".to_string(), None);
        }

        for id in ["msg-2", "msg-99"] {
            let err = engine.regenerate(&session, id).await.unwrap_err();
            assert!(matches!(err, ChatError::MessageNotFound(_)));
        }
        assert_eq!(session.chat.lock().await.log.len(), 2);
    }

    #[tokio::test]
    async fn regenerate_failure_inserts_the_fallback_reply() {
        let backend = Arc::new(ScriptedBackend::failing());
        let (engine, session) = session_with(backend);
        {
            let mut chat = session.chat.lock().await;
            chat.log.append(Role::User, "q".to_string(), None);
            chat.log.append(Role::Assistant, "a".to_string(), None);
        }

        let new_id = engine.regenerate(&session, "msg-1").await.unwrap();
        let chat = session.chat.lock().await;
        assert_eq!(chat.log.get(&new_id).unwrap().content, REGENERATE_FALLBACK);
        assert_eq!(chat.log.position(&new_id), Some(1));
    }
}
