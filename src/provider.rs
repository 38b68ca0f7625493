//! Client for the OpenAI-compatible completion provider.
//!
//! Two call shapes: a blocking completion that returns the full reply, and
//! an incremental one that feeds fragments into a channel as SSE deltas
//! arrive. Both build the same payload from the context window.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::ProviderError;
use crate::types::openai::{
    CompletionRequest, CompletionResponse, ImageUrlData, StreamResponse, WireContent,
    WireContentPart, WireMessage,
};
use crate::types::{ChatConfig, ChatMessage, Role};

/// The single seam between the conversation engine and the outside world.
/// The HTTP implementation below is the production one; tests substitute
/// scripted backends.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Request a full reply for `prompt` with `window` as prior context.
    async fn complete(
        &self,
        prompt: &str,
        window: &[ChatMessage],
        config: &ChatConfig,
    ) -> Result<String, ProviderError>;

    /// Request an incremental reply; every fragment is pushed into `sink`
    /// in arrival order. Returns once the provider closes the stream.
    async fn stream(
        &self,
        prompt: &str,
        window: &[ChatMessage],
        config: &ChatConfig,
        sink: UnboundedSender<String>,
    ) -> Result<(), ProviderError>;
}

pub struct CompletionClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl CompletionClient {
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            api_key,
        }
    }

    fn request(&self, body: &CompletionRequest) -> Result<reqwest::RequestBuilder, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(ProviderError::MissingApiKey);
        }
        Ok(self
            .http
            .post(format!("{}/chat/completions", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body))
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(
        &self,
        prompt: &str,
        window: &[ChatMessage],
        config: &ChatConfig,
    ) -> Result<String, ProviderError> {
        let body = CompletionRequest {
            model: config.model.clone(),
            messages: build_messages(prompt, window, config),
            stream: false,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        log::debug!(target: "provider", "completion request, model={}", config.model);
        let response = self.request(&body)?.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(content)
    }

    async fn stream(
        &self,
        prompt: &str,
        window: &[ChatMessage],
        config: &ChatConfig,
        sink: UnboundedSender<String>,
    ) -> Result<(), ProviderError> {
        let body = CompletionRequest {
            model: config.model.clone(),
            messages: build_messages(prompt, window, config),
            stream: true,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };

        log::debug!(target: "provider", "streaming request, model={}", config.model);
        let mut es = EventSource::new(self.request(&body)?)
            .map_err(|e| ProviderError::Stream(e.to_string()))?;

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }
                    if let Ok(parsed) = serde_json::from_str::<StreamResponse>(&msg.data) {
                        if let Some(choice) = parsed.choices.first() {
                            if let Some(delta) = choice.delta.content.as_deref() {
                                if !delta.is_empty() && sink.send(delta.to_string()).is_err() {
                                    // receiver gone; drain quietly to completion
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    es.close();
                    return Err(ProviderError::Stream(e.to_string()));
                }
            }
        }

        Ok(())
    }
}

/// Assemble the wire payload: system prompt, prior window, then the prompt
/// as the explicit final user turn. When the window already ends with a
/// user message carrying exactly the prompt text, that entry is dropped so
/// the provider never sees the same text twice.
pub fn build_messages(
    prompt: &str,
    window: &[ChatMessage],
    config: &ChatConfig,
) -> Vec<WireMessage> {
    let mut messages = Vec::with_capacity(window.len() + 2);

    if !config.system_prompt.trim().is_empty() {
        messages.push(WireMessage {
            role: "system".to_string(),
            content: WireContent::Text(config.system_prompt.clone()),
        });
    }

    let skip_last = window
        .last()
        .map(|m| m.role == Role::User && m.content == prompt)
        .unwrap_or(false);
    let window = if skip_last {
        &window[..window.len() - 1]
    } else {
        window
    };

    for msg in window {
        let content = match &msg.image {
            None => WireContent::Text(msg.content.clone()),
            Some(image) => {
                let mut parts = Vec::new();
                if !msg.content.is_empty() {
                    parts.push(WireContentPart::Text {
                        text: msg.content.clone(),
                    });
                }
                parts.push(WireContentPart::ImageUrl {
                    image_url: ImageUrlData {
                        url: format!("data:image/png;base64,{}", image),
                    },
                });
                WireContent::Parts(parts)
            }
        };
        messages.push(WireMessage {
            role: msg.role.wire_name().to_string(),
            content,
        });
    }

    messages.push(WireMessage {
        role: "user".to_string(),
        content: WireContent::Text(prompt.to_string()),
    });

    messages
}
