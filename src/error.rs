use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {var} (must be a JSON array of strings): {reason}")]
    InvalidList { var: &'static str, reason: String },

    #[error("Invalid {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Unauthorized")]
    Unauthenticated,
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Unknown query set: {0}")]
    UnknownQuerySet(String),

    #[error("Invalid {0} date/time. Use YYYY-MM-DD and HH:MM or HH:MM:SS.")]
    InvalidDateTime(&'static str),

    #[error("Start must not be after end.")]
    InvalidRange,

    #[error("Graylog unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Graylog API error {0}: {1}")]
    BackendError(u16, String),

    #[error("Invalid Graylog response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum RcaError {
    #[error("AI_HOST, AI_API_KEY, and AI_MODEL must be set")]
    NotConfigured,

    #[error("Missing content")]
    EmptySelection,

    #[error("AI endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("AI API error {0}: {1}")]
    UpstreamError(u16, String),

    #[error("Invalid AI API response: {0}")]
    InvalidResponse(String),

    #[error("Invalid key")]
    InvalidKey,

    #[error("Not found")]
    NotFound,

    #[error("Read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Upstream bodies are cut to this many characters before they reach a user.
pub const MAX_ERROR_BODY_CHARS: usize = 500;

pub fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}
