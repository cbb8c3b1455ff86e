//! Error types for the tunnel module.

use std::io;
use thiserror::Error;

use crate::process::ProcessError;

/// Result type for tunnel operations.
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Errors that abort a tunnel run.
///
/// Only precondition failures (privileges, engine discovery, artifact
/// creation) and an exhausted activation chain surface here; verification,
/// diagnostics, supervision and teardown report through structured outcomes.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Subprocess error
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The process is not running with elevated privileges
    #[error("Elevated privileges required: {0}")]
    PrivilegeRequired(String),

    /// No tunnel engine installation could be found
    #[error("WireGuard engine not found\n{remediation}")]
    EngineNotFound { remediation: String },

    /// The configuration artifact could not be written
    #[error("Failed to write configuration artifact: {0}")]
    Artifact(io::Error),

    /// Every activation strategy failed
    #[error("Failed to start tunnel with all methods: {0}")]
    ActivationExhausted(String),

    /// Invalid state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),
}
