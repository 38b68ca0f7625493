use std::net::IpAddr;

use clap::Parser;

use crate::types::ChatConfig;

/// Runtime configuration. Every knob can come from the command line or the
/// matching environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "driftchat", about = "Server-rendered chat gated by one-time magic links")]
pub struct ServerArgs {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// TCP port to bind
    #[arg(long, env = "DRIFTCHAT_PORT", default_value_t = 8217)]
    pub port: u16,

    /// Base URL of the OpenAI-compatible provider API
    #[arg(
        long,
        env = "DRIFTCHAT_API_URL",
        default_value = "https://openrouter.ai/api/v1"
    )]
    pub api_url: String,

    /// Provider API key
    #[arg(long, env = "DRIFTCHAT_API_KEY", hide_env_values = true, default_value = "")]
    pub api_key: String,

    /// Static bearer credential required by the magic-link issue endpoint
    #[arg(
        long,
        env = "DRIFTCHAT_ISSUER_KEY",
        hide_env_values = true,
        default_value = ""
    )]
    pub issuer_key: String,

    /// Minutes a freshly issued link token stays valid
    #[arg(long, env = "DRIFTCHAT_LINK_VALID_MINUTES", default_value_t = 60)]
    pub link_valid_minutes: i64,

    /// Skip magic-link authentication entirely (dev/test mode)
    #[arg(long, env = "DRIFTCHAT_NO_AUTH")]
    pub no_auth: bool,

    /// Model preselected for new sessions
    #[arg(
        long,
        env = "DRIFTCHAT_MODEL",
        default_value = "google/gemini-flash-1.5-8b"
    )]
    pub default_model: String,

    /// Sampling temperature for new sessions
    #[arg(long, env = "DRIFTCHAT_TEMPERATURE", default_value_t = 0.7)]
    pub default_temperature: f64,

    /// Output token budget for new sessions
    #[arg(long, env = "DRIFTCHAT_MAX_TOKENS", default_value_t = 4096)]
    pub default_max_tokens: u32,

    /// History turns sent as context for new sessions
    #[arg(long, env = "DRIFTCHAT_HISTORY_TURNS", default_value_t = 10)]
    pub default_history_turns: usize,

    /// System prompt for new sessions
    #[arg(long, env = "DRIFTCHAT_SYSTEM_PROMPT", default_value = "")]
    pub system_prompt: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl ServerArgs {
    /// The ChatConfig a fresh session starts with.
    pub fn chat_defaults(&self) -> ChatConfig {
        ChatConfig {
            model: self.default_model.clone(),
            temperature: self.default_temperature,
            max_tokens: self.default_max_tokens,
            max_history_turns: self.default_history_turns,
            system_prompt: self.system_prompt.clone(),
            ..ChatConfig::default()
        }
    }
}
