//! Common error types for Nodegate components.

use thiserror::Error;

/// Common errors across Nodegate components
#[derive(Debug, Error)]
pub enum NodegateError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Join token missing or wrong
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Node already holds a block in the other role's ledger
    #[error("Role conflict: {0}")]
    RoleConflict(String),

    /// No free subnet left in a pool
    #[error("Address pool exhausted: {0}")]
    PoolExhausted(String),

    /// Ledger read/write failure
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Cluster control plane call failed
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Object or resource not (yet) visible
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bounded wait expired
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl NodegateError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::InvalidInput(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::RoleConflict(_) => 409,
            Self::PoolExhausted(_) => 500,
            Self::Ledger(_) => 500,
            Self::Cluster(_) => 500,
            Self::NotFound(_) => 404,
            Self::Timeout(_) => 504,
        }
    }

    /// Short machine-readable kind, used as the `error` field of responses
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized(_) => "unauthorized",
            Self::RoleConflict(_) => "role_conflict",
            Self::PoolExhausted(_) => "pool_exhausted",
            Self::Ledger(_) => "ledger",
            Self::Cluster(_) => "cluster",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
        }
    }
}
