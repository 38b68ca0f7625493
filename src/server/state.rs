use std::sync::Arc;

use crate::chat::{ChatEngine, StreamCoordinator};
use crate::config::ServerArgs;
use crate::models::ModelCatalog;
use crate::provider::CompletionBackend;
use crate::session::SessionStore;
use crate::tokens::LinkTokenStore;

/// Everything the request handlers share. Conversation state lives inside
/// the sessions; the token store is process-wide.
pub struct AppState {
    pub sessions: SessionStore,
    pub tokens: LinkTokenStore,
    pub engine: ChatEngine,
    pub streams: StreamCoordinator,
    pub catalog: Arc<ModelCatalog>,
    pub issuer_key: String,
    pub link_valid_minutes: i64,
    pub api_key_configured: bool,
}

impl AppState {
    pub fn new(
        args: &ServerArgs,
        backend: Arc<dyn CompletionBackend>,
        catalog: Arc<ModelCatalog>,
    ) -> Self {
        Self {
            sessions: SessionStore::new(args.chat_defaults(), args.no_auth),
            tokens: LinkTokenStore::new(),
            engine: ChatEngine::new(backend.clone()),
            streams: StreamCoordinator::new(backend),
            catalog,
            issuer_key: args.issuer_key.clone(),
            link_valid_minutes: args.link_valid_minutes,
            api_key_configured: !args.api_key.trim().is_empty(),
        }
    }
}
