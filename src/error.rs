use thiserror::Error;

/// Failures talking to the completion provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API key is not configured")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("provider returned an empty response")]
    EmptyResponse,

    #[error("stream failed: {0}")]
    Stream(String),
}

/// Failures from conversation operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("a streaming reply is already in progress")]
    StreamInFlight,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Failures from magic-link token consumption.
///
/// The display strings double as the user-visible redirect reasons.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid magic link token.")]
    Invalid,

    #[error("Magic link token already used.")]
    AlreadyUsed,

    #[error("Magic link token expired.")]
    Expired,
}
