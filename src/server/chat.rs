//! Chat endpoint handlers.
//!
//! Every failure path resolves into a redirect with an encoded reason or an
//! inserted placeholder message; handlers never surface a raw error page.

use std::sync::Arc;

use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};

use crate::clock::unix_ms;
use crate::server::http::{
    attachment, form_value, html, json, json_error, parse_form, query_param, read_body, redirect,
    BoxBody,
};
use crate::server::pages::{self, ChatPage};
use crate::server::state::AppState;
use crate::session::Session;
use crate::types::{ImportedMessage, Role};

/// Redirect unauthenticated sessions to the magic-link issuance page.
fn require_auth(session: &Session) -> Option<Response<BoxBody>> {
    if session.is_authenticated() {
        None
    } else {
        Some(redirect("/magic-link/request"))
    }
}

fn error_redirect(reason: &str) -> Response<BoxBody> {
    redirect(&format!(
        "/?error={}#chat-bottom",
        urlencoding::encode(reason)
    ))
}

#[derive(Default)]
struct PageOptions {
    error: Option<String>,
    show_config_menu: bool,
    show_data_menu: bool,
    editing_id: Option<String>,
    streaming_prompt: Option<String>,
    selected_provider: Option<String>,
    selected_model: Option<String>,
}

async fn render_page(
    state: &AppState,
    session: &Session,
    opts: PageOptions,
) -> Response<BoxBody> {
    let (messages, config) = {
        let chat = session.chat.lock().await;
        (chat.log.messages().to_vec(), chat.config.clone())
    };

    let mut page = ChatPage::new(&messages, &config);
    page.error = opts.error.as_deref();
    page.show_config_menu = opts.show_config_menu;
    page.show_data_menu = opts.show_data_menu;
    page.editing_id = opts.editing_id.as_deref();
    page.streaming_prompt = opts.streaming_prompt.as_deref();

    if opts.show_config_menu {
        // fall back to the session's current model for the selection
        let mut selected_provider = opts.selected_provider.clone();
        let mut selected_model = opts.selected_model.clone();
        if selected_provider.is_none() || selected_model.is_none() {
            if let Some((provider, _)) = config.model.split_once('/') {
                selected_provider.get_or_insert_with(|| provider.to_string());
                selected_model.get_or_insert_with(|| config.model.clone());
            }
        }
        page.providers = state.catalog.providers();
        if let Some(provider) = selected_provider.as_deref() {
            page.provider_models = state.catalog.models_for_provider(provider);
        }
        page.selected_provider = selected_provider;
        page.selected_model = selected_model;
    }

    let model_in_view = page
        .selected_model
        .clone()
        .unwrap_or_else(|| config.model.clone());
    page.images_accepted = state.catalog.accepts_images(&model_in_view);

    html(pages::render_chat_page(&page))
}

pub async fn handle_page(
    state: Arc<AppState>,
    session: Arc<Session>,
    req: Request<Incoming>,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    let error = query_param(req.uri(), "error");
    render_page(
        &state,
        &session,
        PageOptions {
            error,
            ..PageOptions::default()
        },
    )
    .await
}

pub async fn handle_config_menu(
    state: Arc<AppState>,
    session: Arc<Session>,
    req: Request<Incoming>,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    let selected_provider = query_param(req.uri(), "provider").filter(|p| !p.is_empty());
    let selected_model = query_param(req.uri(), "model").filter(|m| !m.is_empty());
    render_page(
        &state,
        &session,
        PageOptions {
            show_config_menu: true,
            selected_provider,
            selected_model,
            ..PageOptions::default()
        },
    )
    .await
}

pub async fn handle_data_menu(
    state: Arc<AppState>,
    session: Arc<Session>,
    _req: Request<Incoming>,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    render_page(
        &state,
        &session,
        PageOptions {
            show_data_menu: true,
            ..PageOptions::default()
        },
    )
    .await
}

/// Non-streaming submit: one blocking turn, then redirect to the bottom.
pub async fn handle_submit(
    state: Arc<AppState>,
    session: Arc<Session>,
    req: Request<Incoming>,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    let body = read_body(req).await;
    let pairs = parse_form(&String::from_utf8_lossy(&body));
    let prompt = form_value(&pairs, "prompt").unwrap_or("").trim().to_string();
    let image = form_value(&pairs, "image")
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    if prompt.is_empty() {
        log::warn!(target: "server::chat", "empty prompt received");
        return error_redirect("Please enter a valid message");
    }

    match state.engine.process_turn(&session, prompt, image).await {
        Ok(_) => redirect("/#chat-bottom"),
        Err(err) => error_redirect(&err.to_string()),
    }
}

/// Streaming submit: append the user turn, install the stream session, and
/// return the page with the polling iframe. Generation does not start here.
pub async fn handle_stream_submit(
    state: Arc<AppState>,
    session: Arc<Session>,
    req: Request<Incoming>,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    let body = read_body(req).await;
    let pairs = parse_form(&String::from_utf8_lossy(&body));
    let prompt = form_value(&pairs, "prompt").unwrap_or("").trim().to_string();
    let image = form_value(&pairs, "image")
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    if prompt.is_empty() {
        return error_redirect("Please enter a valid message");
    }

    {
        let mut chat = session.chat.lock().await;
        if chat.log.has_user_message(&prompt) {
            log::warn!(target: "server::chat", "duplicate prompt, not appending again");
        } else {
            chat.log.append(Role::User, prompt.clone(), image);
        }
    }

    if let Err(err) = state.streams.begin(&session, prompt.clone()).await {
        return error_redirect(&err.to_string());
    }

    render_page(
        &state,
        &session,
        PageOptions {
            streaming_prompt: Some(prompt),
            ..PageOptions::default()
        },
    )
    .await
}

/// Poll endpoint driven by the frame's meta refresh. The first poll starts
/// generation; `t`/`c` query parameters are advisory and ignored.
pub async fn handle_stream_frame(
    state: Arc<AppState>,
    session: Arc<Session>,
    _req: Request<Incoming>,
) -> Response<BoxBody> {
    match state.streams.poll(&session).await {
        None => html(pages::render_empty_frame()),
        Some((buffer, complete)) => {
            let rate = session.chat.lock().await.config.streaming_update_rate;
            html(pages::render_stream_frame(&buffer, complete, rate))
        }
    }
}

pub async fn handle_edit(
    state: Arc<AppState>,
    session: Arc<Session>,
    id: &str,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    let exists = session.chat.lock().await.log.get(id).is_some();
    if !exists {
        return error_redirect("Message not found");
    }
    render_page(
        &state,
        &session,
        PageOptions {
            editing_id: Some(id.to_string()),
            ..PageOptions::default()
        },
    )
    .await
}

pub async fn handle_view(
    state: Arc<AppState>,
    session: Arc<Session>,
    _id: &str,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    render_page(&state, &session, PageOptions::default()).await
}

pub async fn handle_save(
    state: Arc<AppState>,
    session: Arc<Session>,
    id: &str,
    req: Request<Incoming>,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    let body = read_body(req).await;
    let pairs = parse_form(&String::from_utf8_lossy(&body));
    let prompt = form_value(&pairs, "prompt").unwrap_or("").to_string();
    let image = form_value(&pairs, "image")
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let mut chat = session.chat.lock().await;
    let updated = chat.log.update(id, prompt, image).map(|_| ());
    match updated {
        Ok(()) => {
            let turn = chat.log.position(id);
            match turn {
                Some(turn) => redirect(&format!("/#turn-{turn}")),
                None => redirect("/#chat-bottom"),
            }
        }
        Err(err) => {
            log::error!(target: "server::chat", "saving message failed: {err}");
            error_redirect("An error occurred while saving the message")
        }
    }
}

pub async fn handle_delete(
    _state: Arc<AppState>,
    session: Arc<Session>,
    id: &str,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    let deleted = session.chat.lock().await.log.delete(id);
    if deleted {
        redirect("/#chat-bottom")
    } else {
        error_redirect("Message not found or could not be deleted.")
    }
}

pub async fn handle_regenerate(
    state: Arc<AppState>,
    session: Arc<Session>,
    id: &str,
    req: Request<Incoming>,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    let body = read_body(req).await;
    let pairs = parse_form(&String::from_utf8_lossy(&body));
    let anchor = form_value(&pairs, "anchor")
        .filter(|a| !a.is_empty())
        .unwrap_or("#chat-bottom")
        .to_string();

    match state.engine.regenerate(&session, id).await {
        Ok(_) => redirect(&format!("/{anchor}")),
        Err(err) => {
            log::error!(target: "server::chat", "regeneration failed: {err}");
            error_redirect("An error occurred while regenerating the message")
        }
    }
}

pub async fn handle_clear(_state: Arc<AppState>, session: Arc<Session>) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    session.chat.lock().await.log.clear();
    log::info!(target: "server::chat", "cleared conversation for session {}", session.id);
    redirect("/#chat-bottom")
}

/// Download the full ordered log as a JSON document.
pub async fn handle_export(_state: Arc<AppState>, session: Arc<Session>) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    let messages = session.chat.lock().await.log.messages().to_vec();
    match serde_json::to_vec_pretty(&messages) {
        Ok(bytes) => attachment("chat-export.json", bytes),
        Err(err) => {
            log::error!(target: "server::chat", "export failed: {err}");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "export_failed",
                "Failed to export chat history",
            )
        }
    }
}

/// Replace the log with an uploaded document. Accepts either a raw JSON
/// array body or a form with the document in the `file` field.
pub async fn handle_import(
    _state: Arc<AppState>,
    session: Arc<Session>,
    req: Request<Incoming>,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    let body = read_body(req).await;
    let raw = String::from_utf8_lossy(&body).into_owned();

    let parsed: Result<Vec<ImportedMessage>, serde_json::Error> = serde_json::from_str(&raw)
        .or_else(|raw_err| {
            let pairs = parse_form(&raw);
            match form_value(&pairs, "file") {
                Some(document) if !document.trim().is_empty() => serde_json::from_str(document),
                _ => Err(raw_err),
            }
        });

    match parsed {
        Ok(imported) => {
            let count = imported.len();
            session.chat.lock().await.log.import(imported);
            log::info!(target: "server::chat", "imported {count} messages");
            redirect("/#chat-bottom")
        }
        Err(err) => {
            log::error!(target: "server::chat", "import failed: {err}");
            error_redirect(&format!("Failed to import chat history: {err}"))
        }
    }
}

/// Partial update of the session's generation config: absent fields stay
/// untouched, unparseable values are dropped with a warning.
pub async fn handle_config_update(
    _state: Arc<AppState>,
    session: Arc<Session>,
    req: Request<Incoming>,
) -> Response<BoxBody> {
    if let Some(resp) = require_auth(&session) {
        return resp;
    }
    let body = read_body(req).await;
    let pairs = parse_form(&String::from_utf8_lossy(&body));

    let mut chat = session.chat.lock().await;
    let config = &mut chat.config;
    if let Some(value) = form_value(&pairs, "historyEnabled") {
        config.history_enabled = value == "true";
    }
    if let Some(value) = form_value(&pairs, "maxHistoryTurns") {
        match value.parse() {
            Ok(parsed) => config.max_history_turns = parsed,
            Err(_) => log::warn!(target: "server::chat", "ignoring bad maxHistoryTurns: {value}"),
        }
    }
    if let Some(value) = form_value(&pairs, "aiModel") {
        if !value.is_empty() {
            config.model = value.to_string();
        }
    }
    if let Some(value) = form_value(&pairs, "temperature") {
        match value.parse() {
            Ok(parsed) => config.temperature = parsed,
            Err(_) => log::warn!(target: "server::chat", "ignoring bad temperature: {value}"),
        }
    }
    if let Some(value) = form_value(&pairs, "maxTokens") {
        match value.parse() {
            Ok(parsed) => config.max_tokens = parsed,
            Err(_) => log::warn!(target: "server::chat", "ignoring bad maxTokens: {value}"),
        }
    }
    if let Some(value) = form_value(&pairs, "streamingEnabled") {
        config.streaming_enabled = value == "true";
    }
    if let Some(value) = form_value(&pairs, "streamingUpdateRate") {
        match value.parse() {
            Ok(parsed) => config.streaming_update_rate = parsed,
            Err(_) => {
                log::warn!(target: "server::chat", "ignoring bad streamingUpdateRate: {value}")
            }
        }
    }
    if let Some(value) = form_value(&pairs, "systemPrompt") {
        config.system_prompt = value.to_string();
    }

    log::info!(
        target: "server::chat",
        "config updated: history={}, turns={}, model={}, streaming={}",
        config.history_enabled,
        config.max_history_turns,
        config.model,
        config.streaming_enabled
    );
    drop(chat);
    redirect("/#chat-bottom")
}

pub async fn handle_health(state: Arc<AppState>) -> Response<BoxBody> {
    let (key_status, message) = if state.api_key_configured {
        ("CONFIGURED", "API key is configured")
    } else {
        ("NOT_CONFIGURED", "Set the provider API key")
    };
    json(
        StatusCode::OK,
        serde_json::json!({
            "status": "UP",
            "timestamp": unix_ms(),
            "api_key": key_status,
            "message": message,
        }),
    )
}

pub async fn handle_logout(state: Arc<AppState>, session: Arc<Session>) -> Response<BoxBody> {
    state.sessions.invalidate(&session.id);
    redirect("/magic-link/request")
}
