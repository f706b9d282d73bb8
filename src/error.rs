use thiserror::Error;

use crate::provider::ProviderKind;

/// Failures of a single provider call. Nothing in the provider layer retries;
/// callers decide whether the failure is fatal for their phase.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{provider} does not support {operation}")]
    Unsupported {
        provider: ProviderKind,
        operation: &'static str,
    },

    #[error("missing API key for {0}")]
    MissingCredentials(ProviderKind),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum WordPressError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx answer; `message` is what WordPress put in its error body.
    #[error("WordPress API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("invalid WordPress response: {0}")]
    InvalidResponse(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("update requires a resolved post id")]
    MissingPostId,

    #[error("invalid image data for {slot}: {reason}")]
    InvalidImage { slot: String, reason: String },

    #[error(transparent)]
    WordPress(#[from] WordPressError),
}
