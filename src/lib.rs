use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Error taxonomy for the sync engine.
///
/// Recoverable variants describe transient conditions that the retry
/// machinery is allowed to re-attempt; everything else propagates
/// immediately. `Workflow` wraps a failure that has already exhausted its
/// retry budget or aborted a critical step.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Circuit breaker is open: {0}")]
    CircuitOpen(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

/// Message fragments that mark an otherwise unclassified error as transient.
const TRANSIENT_KEYWORDS: &[&str] = &[
    "timeout",
    "network",
    "connection",
    "rate limit",
    "temporarily unavailable",
];

impl SyncError {
    /// Whether this error is transient and eligible for retry.
    ///
    /// Timeouts, unavailable services, external service failures, and open
    /// circuits clear on their own; other kinds are retried only if their
    /// message matches a known transient keyword.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        match self {
            SyncError::Timeout(_)
            | SyncError::ServiceUnavailable(_)
            | SyncError::ExternalService(_)
            | SyncError::CircuitOpen(_) => true,
            SyncError::Validation(_) | SyncError::NotFound(_) | SyncError::Config(_) => false,
            _ => {
                let message = self.to_string().to_lowercase();
                TRANSIENT_KEYWORDS.iter().any(|kw| message.contains(kw))
            }
        }
    }

    /// Short stable label for error ledger records and job results.
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Validation(_) => "validation",
            SyncError::NotFound(_) => "not_found",
            SyncError::Timeout(_) => "timeout",
            SyncError::ServiceUnavailable(_) => "service_unavailable",
            SyncError::ExternalService(_) => "external_service",
            SyncError::CircuitOpen(_) => "circuit_open",
            SyncError::Workflow(_) => "workflow",
            SyncError::Config(_) => "config",
            SyncError::Io(_) => "io",
            SyncError::Unknown(_) => "unknown",
        }
    }
}

pub mod chunking;
pub mod config;
pub mod engine;
pub mod executor;
pub mod jobs;
pub mod pipeline;
pub mod recovery;
pub mod services;
pub mod sync;
