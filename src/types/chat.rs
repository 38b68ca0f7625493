use serde::{Deserialize, Serialize};

/// Who authored a message. Serialized as `USER`/`ASSISTANT` in the export
/// document; `wire_name` gives the lowercase role the provider API expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "ASSISTANT")]
    Assistant,
}

impl Role {
    pub fn wire_name(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn in a conversation log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Base64-encoded image payload. Only user messages carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: i64,
}

/// A message as it appears in an imported document. Ids and timestamps are
/// advisory: import re-assigns ids and fills in missing timestamps.
#[derive(Deserialize)]
pub struct ImportedMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// Per-session generation settings, mutated by the config endpoint.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub history_enabled: bool,
    /// One turn = one user message plus the assistant reply.
    pub max_history_turns: usize,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub streaming_enabled: bool,
    /// Poll interval for the streaming frame, in seconds.
    pub streaming_update_rate: u32,
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_enabled: true,
            max_history_turns: 10,
            model: "google/gemini-flash-1.5-8b".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            streaming_enabled: false,
            streaming_update_rate: 1,
            system_prompt: String::new(),
        }
    }
}
