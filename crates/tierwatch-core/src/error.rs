use crate::ticket::TicketId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TierwatchError {
    #[error("not initialized: run 'tierwatch init'")]
    NotInitialized,

    #[error("ticket not found: {0}")]
    TicketNotFound(TicketId),

    #[error("invalid priority '{0}': must be low, medium, high, or urgent")]
    InvalidPriority(String),

    #[error("invalid status '{0}': must be open, in_progress, resolved, or closed")]
    InvalidStatus(String),

    #[error("invalid tier '{0}': must be L1, L2, L3, or L4")]
    InvalidTier(String),

    #[error("invalid category '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidCategory(String),

    #[error("invalid escalation policy: {0}")]
    InvalidPolicy(String),

    #[error("ticket store error: {0}")]
    Store(String),

    #[error("notification error: {0}")]
    Notify(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TierwatchError>;
