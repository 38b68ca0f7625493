pub mod chat;
pub mod openai;

pub use chat::{ChatConfig, ChatMessage, ImportedMessage, Role};
