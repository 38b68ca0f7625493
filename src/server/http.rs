//! Request dispatch.
//!
//! A hand-rolled router over hyper: resolve the session from the `sid`
//! cookie, match on method and path, hand off to the chat or magic-link
//! handlers. Response helpers at the bottom keep the handlers short.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use hyper::{Method, Request, Response, StatusCode, Uri};
use tower_service::Service;

use crate::server::chat;
use crate::server::magic_link;
use crate::server::state::AppState;
use crate::session::Session;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, Infallible>;

#[derive(Clone)]
pub struct Router {
    state: Arc<AppState>,
}

impl Router {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl Service<Request<Incoming>> for Router {
    type Response = Response<BoxBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Incoming>) -> Self::Future {
        let state = self.state.clone();
        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            log::info!(target: "server::http", "{} {}", method, path);

            let sid = cookie_value(req.headers(), "sid");
            let (session, fresh) = state.sessions.get_or_create(sid.as_deref());

            let mut response = dispatch(state, session.clone(), req, method.clone(), &path).await;

            if fresh {
                if let Ok(value) = HeaderValue::from_str(&format!(
                    "sid={}; Path=/; HttpOnly; SameSite=Lax",
                    session.id
                )) {
                    response.headers_mut().insert(SET_COOKIE, value);
                }
            }

            let status = response.status();
            if status.is_client_error() {
                log::warn!(target: "server::http", "{} {} -> {}", method, path, status);
            } else if status.is_server_error() {
                log::error!(target: "server::http", "{} {} -> {}", method, path, status);
            }
            Ok(response)
        })
    }
}

async fn dispatch(
    state: Arc<AppState>,
    session: Arc<Session>,
    req: Request<Incoming>,
    method: Method,
    path: &str,
) -> Response<BoxBody> {
    match (method.clone(), path) {
        (Method::GET, "/") => chat::handle_page(state, session, req).await,
        (Method::GET, "/config") => chat::handle_config_menu(state, session, req).await,
        (Method::GET, "/data") => chat::handle_data_menu(state, session, req).await,
        (Method::POST, "/chat") => chat::handle_submit(state, session, req).await,
        (Method::POST, "/chat/stream") | (Method::POST, "/chat/stream/") => {
            chat::handle_stream_submit(state, session, req).await
        }
        (Method::GET, "/chat/stream-frame") => {
            chat::handle_stream_frame(state, session, req).await
        }
        (Method::POST, "/chat/clear") => chat::handle_clear(state, session).await,
        (Method::POST, "/chat/export") => chat::handle_export(state, session).await,
        (Method::POST, "/chat/import") => chat::handle_import(state, session, req).await,
        (Method::POST, "/config/ai") => chat::handle_config_update(state, session, req).await,
        (Method::GET, "/api/health") => chat::handle_health(state).await,
        (Method::GET, "/magic-link/request") => magic_link::handle_request(state, req).await,
        (Method::GET, "/magic-link/consume") => {
            magic_link::handle_consume(state, session, req).await
        }
        (Method::POST, "/logout") => chat::handle_logout(state, session).await,
        _ => {
            if let Some((id, action)) = message_route(path) {
                let id = id.to_string();
                match (method, action) {
                    (Method::GET, "edit") => chat::handle_edit(state, session, &id).await,
                    (Method::GET, "view") => chat::handle_view(state, session, &id).await,
                    (Method::POST, "save") => chat::handle_save(state, session, &id, req).await,
                    (Method::POST, "delete") => chat::handle_delete(state, session, &id).await,
                    (Method::POST, "regenerate") => {
                        chat::handle_regenerate(state, session, &id, req).await
                    }
                    _ => not_found(),
                }
            } else {
                not_found()
            }
        }
    }
}

/// Extract `(id, action)` from `/chat/message/{id}/{action}`, tolerating a
/// trailing slash.
fn message_route(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("/chat/message/")?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    let (id, action) = rest.rsplit_once('/')?;
    if id.is_empty() || id.contains('/') {
        None
    } else {
        Some((id, action))
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub(crate) fn cookie_value(headers: &hyper::HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        if let Some((key, value)) = pair.trim().split_once('=') {
            if key == name {
                return Some(value.to_string());
            }
        }
    }
    None
}

pub(crate) fn query_param(uri: &Uri, name: &str) -> Option<String> {
    uri.query()?
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((form_decode(key), form_decode(value)))
        })
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}

/// Parse a `application/x-www-form-urlencoded` body into key/value pairs.
pub(crate) fn parse_form(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            if key.is_empty() {
                return None;
            }
            let value = parts.next().unwrap_or("");
            Some((form_decode(key), form_decode(value)))
        })
        .collect()
}

pub(crate) fn form_value<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn form_decode(raw: &str) -> String {
    let plussed = raw.replace('+', " ");
    match urlencoding::decode(&plussed) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => plussed,
    }
}

pub(crate) async fn read_body(req: Request<Incoming>) -> Bytes {
    match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            log::warn!(target: "server::http", "failed to read request body: {err}");
            Bytes::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

pub fn html(body: String) -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Full::new(Bytes::from(body)).boxed())
        .unwrap()
}

pub fn redirect(location: &str) -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, location)
        .body(Full::new(Bytes::new()).boxed())
        .unwrap()
}

pub fn json(status: StatusCode, payload: serde_json::Value) -> Response<BoxBody> {
    let body = serde_json::to_vec(&payload).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)).boxed())
        .unwrap()
}

pub fn json_error(status: StatusCode, code: &str, message: &str) -> Response<BoxBody> {
    json(
        status,
        serde_json::json!({
            "error": {
                "code": code,
                "message": message
            }
        }),
    )
}

pub fn attachment(filename: &str, body: Vec<u8>) -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(Full::new(Bytes::from(body)).boxed())
        .unwrap()
}

pub fn not_found() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from_static(b"not found")).boxed())
        .unwrap()
}
