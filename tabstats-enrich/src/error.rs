//! Error taxonomy for remote enrichment calls
//!
//! Every remote failure maps to exactly one [`FetchError`] variant. The
//! orchestrator matches on it exhaustively; there is no catch-all
//! variant.

use thiserror::Error;

/// Remote enrichment failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Credential missing or rejected; fatal for the session
    #[error("Invalid API key")]
    InvalidCredential,

    /// Service answered successfully but holds no profile for the identity
    #[error("Profile not found")]
    ProfileNotFound,

    /// Rate limited; `global` means every caller is throttled, not just this key
    #[error("{}", throttle_message(.global))]
    Throttled { global: bool },

    /// Body could not be parsed as structured data
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Transport failure or unsuccessful response without a more specific cause
    #[error("Request failed: {0}")]
    RequestFailed(String),
}

fn throttle_message(global: &bool) -> &'static str {
    if *global {
        "API is throttling all requests"
    } else {
        "API key is being throttled"
    }
}

/// Result type for remote enrichment calls
pub type FetchResult<T> = Result<T, FetchError>;
