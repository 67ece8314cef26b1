//! Error types for the Cadence domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for Cadence operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Empty response from {0}")]
    EmptyResponse(String),
}

impl ProviderError {
    /// Transient failures are worth handing to the next backend.
    /// Misconfiguration is not going to fix itself on retry.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::NotConfigured(_))
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Source unreadable: {path}: {reason}")]
    SourceUnreadable { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failures fetching a linked page.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("HTTP client unavailable: {0}")]
    Client(String),

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("Unreadable body from {url}: {reason}")]
    Body { url: String, reason: String },
}
