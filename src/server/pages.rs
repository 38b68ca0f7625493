//! HTML rendering for the chat page and the streaming frame.
//!
//! Pages are assembled by hand into a String; everything user-supplied goes
//! through `escape_html` first. The streaming frame carries the meta-refresh
//! directive that makes the client re-poll while generation is running.

use crate::clock::unix_ms;
use crate::models::ProviderModel;
use crate::types::{ChatConfig, ChatMessage, Role};

pub struct ChatPage<'a> {
    pub messages: &'a [ChatMessage],
    pub config: &'a ChatConfig,
    pub error: Option<&'a str>,
    pub show_config_menu: bool,
    pub show_data_menu: bool,
    pub editing_id: Option<&'a str>,
    pub streaming_prompt: Option<&'a str>,
    pub images_accepted: bool,
    pub providers: Vec<String>,
    pub selected_provider: Option<String>,
    pub selected_model: Option<String>,
    pub provider_models: Vec<ProviderModel>,
}

impl<'a> ChatPage<'a> {
    pub fn new(messages: &'a [ChatMessage], config: &'a ChatConfig) -> Self {
        Self {
            messages,
            config,
            error: None,
            show_config_menu: false,
            show_data_menu: false,
            editing_id: None,
            streaming_prompt: None,
            images_accepted: false,
            providers: Vec::new(),
            selected_provider: None,
            selected_model: None,
            provider_models: Vec::new(),
        }
    }
}

const PAGE_STYLE: &str = "\
body{font-family:sans-serif;max-width:52rem;margin:0 auto;padding:1rem;}\
.msg{padding:.5rem .75rem;margin:.5rem 0;border-radius:.5rem;white-space:pre-wrap;}\
.msg.user{background:#e8f0fe;}\
.msg.assistant{background:#f1f3f4;}\
.msg img{max-width:16rem;display:block;margin-top:.5rem;}\
.controls{font-size:.8rem;margin-top:.25rem;}\
.error{background:#fde8e8;padding:.5rem .75rem;border-radius:.5rem;}\
.menu{background:#fafafa;border:1px solid #ddd;padding:.75rem;margin:.5rem 0;}\
iframe{width:100%;height:14rem;border:1px solid #ddd;}\
textarea{width:100%;}";

pub fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render_chat_page(page: &ChatPage) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"/>");
    out.push_str("<title>driftchat</title>");
    out.push_str(&format!("<style>{PAGE_STYLE}</style>"));
    out.push_str("</head><body>\n");

    out.push_str("<h1>driftchat</h1>\n");
    out.push_str(
        "<nav><a href=\"/\">chat</a> | <a href=\"/config\">settings</a> | \
         <a href=\"/data\">data</a></nav>\n",
    );

    if let Some(error) = page.error {
        out.push_str(&format!(
            "<div class=\"error\">{}</div>\n",
            escape_html(error)
        ));
    }

    if page.show_config_menu {
        render_config_menu(&mut out, page);
    }
    if page.show_data_menu {
        render_data_menu(&mut out);
    }

    out.push_str("<div id=\"messages\">\n");
    for (turn, msg) in page.messages.iter().enumerate() {
        render_message(&mut out, turn, msg, page.editing_id);
    }
    out.push_str("</div>\n");

    if let Some(prompt) = page.streaming_prompt {
        out.push_str(&format!(
            "<div class=\"msg user\">{}</div>\n",
            escape_html(prompt)
        ));
        out.push_str("<iframe src=\"/chat/stream-frame\" title=\"reply\"></iframe>\n");
    }

    render_prompt_form(&mut out, page);

    out.push_str("<div id=\"chat-bottom\"></div>\n");
    out.push_str("<form method=\"post\" action=\"/logout\"><button>Log out</button></form>\n");
    out.push_str("</body></html>\n");
    out
}

fn render_message(out: &mut String, turn: usize, msg: &ChatMessage, editing_id: Option<&str>) {
    let class = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    out.push_str(&format!("<div id=\"turn-{turn}\" class=\"msg {class}\">"));

    if editing_id == Some(msg.id.as_str()) {
        out.push_str(&format!(
            "<form method=\"post\" action=\"/chat/message/{id}/save\">\
             <textarea name=\"prompt\" rows=\"4\">{content}</textarea>\
             <input type=\"hidden\" name=\"image\" value=\"\"/>\
             <button>Save</button> \
             <a href=\"/chat/message/{id}/view\">Cancel</a></form>",
            id = msg.id,
            content = escape_html(&msg.content),
        ));
    } else {
        out.push_str(&escape_html(&msg.content));
        if let Some(image) = &msg.image {
            out.push_str(&format!(
                "<img src=\"data:image/png;base64,{image}\" alt=\"attachment\"/>"
            ));
        }
        out.push_str("<div class=\"controls\">");
        out.push_str(&format!(
            "<a href=\"/chat/message/{}/edit\">edit</a> ",
            msg.id
        ));
        if msg.role == Role::User {
            out.push_str(&format!(
                "<form style=\"display:inline\" method=\"post\" \
                 action=\"/chat/message/{}/regenerate\">\
                 <input type=\"hidden\" name=\"anchor\" value=\"#turn-{turn}\"/>\
                 <button>regenerate</button></form> ",
                msg.id
            ));
        }
        out.push_str(&format!(
            "<form style=\"display:inline\" method=\"post\" \
             action=\"/chat/message/{}/delete\"><button>delete</button></form>",
            msg.id
        ));
        out.push_str("</div>");
    }
    out.push_str("</div>\n");
}

fn render_prompt_form(out: &mut String, page: &ChatPage) {
    let action = if page.config.streaming_enabled {
        "/chat/stream"
    } else {
        "/chat"
    };
    out.push_str(&format!(
        "<form method=\"post\" action=\"{action}\">\
         <textarea name=\"prompt\" rows=\"3\" placeholder=\"Say something\"></textarea>"
    ));
    if page.images_accepted {
        out.push_str(
            "<input type=\"text\" name=\"image\" \
             placeholder=\"optional image (base64)\"/>",
        );
    }
    out.push_str("<button>Send</button></form>\n");
}

fn render_config_menu(out: &mut String, page: &ChatPage) {
    let config = page.config;
    out.push_str("<div class=\"menu\"><h2>Settings</h2>\n");

    // provider picker re-renders the page with ?provider=...
    out.push_str("<form method=\"get\" action=\"/config\">provider: <select name=\"provider\">");
    out.push_str("<option value=\"\"></option>");
    for provider in &page.providers {
        let selected = if page.selected_provider.as_deref() == Some(provider.as_str()) {
            " selected"
        } else {
            ""
        };
        out.push_str(&format!(
            "<option value=\"{0}\"{selected}>{0}</option>",
            escape_html(provider)
        ));
    }
    out.push_str("</select><button>Pick</button></form>\n");

    out.push_str("<form method=\"post\" action=\"/config/ai\">");
    out.push_str("model: <select name=\"aiModel\">");
    for model in &page.provider_models {
        let selected = if page.selected_model.as_deref() == Some(model.id.as_str()) {
            " selected"
        } else {
            ""
        };
        out.push_str(&format!(
            "<option value=\"{0}\"{selected}>{1}</option>",
            escape_html(&model.id),
            escape_html(&model.name)
        ));
    }
    if !page.provider_models.iter().any(|m| m.id == config.model) {
        out.push_str(&format!(
            "<option value=\"{0}\" selected>{0}</option>",
            escape_html(&config.model)
        ));
    }
    out.push_str("</select><br/>");

    out.push_str(&format!(
        "history: <input name=\"historyEnabled\" value=\"{}\"/> \
         turns: <input name=\"maxHistoryTurns\" value=\"{}\"/><br/>\
         temperature: <input name=\"temperature\" value=\"{}\"/> \
         max tokens: <input name=\"maxTokens\" value=\"{}\"/><br/>\
         streaming: <input name=\"streamingEnabled\" value=\"{}\"/> \
         update rate: <input name=\"streamingUpdateRate\" value=\"{}\"/><br/>\
         system prompt: <textarea name=\"systemPrompt\" rows=\"2\">{}</textarea><br/>\
         <button>Apply</button></form></div>\n",
        config.history_enabled,
        config.max_history_turns,
        config.temperature,
        config.max_tokens,
        config.streaming_enabled,
        config.streaming_update_rate,
        escape_html(&config.system_prompt),
    ));
}

fn render_data_menu(out: &mut String) {
    out.push_str(
        "<div class=\"menu\"><h2>Data</h2>\
         <form method=\"post\" action=\"/chat/clear\"><button>Clear chat</button></form>\
         <form method=\"post\" action=\"/chat/export\"><button>Export JSON</button></form>\
         <form method=\"post\" action=\"/chat/import\">\
         <textarea name=\"file\" rows=\"4\" placeholder=\"paste exported JSON\"></textarea>\
         <button>Import</button></form></div>\n",
    );
}

/// The polling frame: current buffer plus, while incomplete, a meta-refresh
/// pointing back at this endpoint. The `t`/`c` parameters are advisory
/// cache-busters, not state.
pub fn render_stream_frame(buffer: &str, complete: bool, update_rate: u32) -> String {
    let mut out = String::with_capacity(buffer.len() + 512);
    out.push_str("<!DOCTYPE html>\n<html><head>");
    if !complete {
        out.push_str(&format!(
            "<meta http-equiv=\"refresh\" content=\"{rate};\
             url=/chat/stream-frame?t={now}&c={len}#stream-bottom\"/>",
            rate = update_rate.max(1),
            now = unix_ms(),
            len = buffer.len(),
        ));
    }
    out.push_str(
        "<style>body{margin:0;padding:0;font:inherit;background:transparent;}\
         #ai-stream{white-space:pre-wrap;word-wrap:break-word;}</style>",
    );
    out.push_str("</head><body><div id=\"ai-stream\">");
    out.push_str(&escape_html(buffer).replace('\n', "<br/>"));
    out.push_str("</div><div id=\"stream-bottom\"></div></body></html>\n");
    out
}

/// An empty frame for polls that arrive when no stream session exists.
pub fn render_empty_frame() -> String {
    "<!DOCTYPE html>\n<html><head></head><body></body></html>\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_neutralizes_markup() {
        assert_eq!(
            escape_html("<b>&\"x\"</b>"),
            "&lt;b&gt;&amp;&quot;x&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn incomplete_frames_carry_a_refresh_directive() {
        let frame = render_stream_frame("partial", false, 2);
        assert!(frame.contains("http-equiv=\"refresh\""));
        assert!(frame.contains("content=\"2;"));
        assert!(frame.contains("partial"));
    }

    #[test]
    fn complete_frames_stop_refreshing() {
        let frame = render_stream_frame("done", true, 2);
        assert!(!frame.contains("http-equiv"));
        assert!(frame.contains("done"));
    }

    #[test]
    fn message_content_is_escaped_in_the_page() {
        let config = ChatConfig::default();
        let messages = vec![ChatMessage {
            id: "msg-1".to_string(),
            role: Role::User,
            content: "<script>alert(1)</script>".to_string(),
            image: None,
            created_at: 0,
        }];
        let page = render_chat_page(&ChatPage::new(&messages, &config));
        assert!(!page.contains("<script>alert"));
        assert!(page.contains("&lt;script&gt;"));
    }

    #[test]
    fn streaming_page_embeds_the_polling_frame() {
        let config = ChatConfig::default();
        let mut page = ChatPage::new(&[], &config);
        page.streaming_prompt = Some("hi");
        let html = render_chat_page(&page);
        assert!(html.contains("/chat/stream-frame"));
    }
}
