//! Error types for the executor crate.

use std::path::PathBuf;
use std::time::Duration;

use ferry_core::{CoreError, MigrationStatus, Role};

/// Errors that can occur while driving a migration test case.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// A host capability the test case depends on is missing.
    ///
    /// This is a skip, not a failure.
    #[error("{capability} unavailable: {reason}")]
    CapabilityUnavailable { capability: String, reason: String },

    /// A migration URI could not be built.
    #[error(transparent)]
    Transport(#[from] CoreError),

    /// VM binary not found at the configured path or on `PATH`.
    #[error("VM binary not found at {path}")]
    BinaryNotFound { path: PathBuf },

    /// A VM process failed to start or never became ready.
    #[error("{role} instance failed to launch: {reason}")]
    LaunchFailed { role: Role, reason: String },

    /// The VM answered a command with an error reply.
    #[error("command '{command}' failed: {class}: {desc}")]
    Qmp { command: String, class: String, desc: String },

    /// The control channel produced something that is not valid QMP.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The control channel cannot carry file descriptors.
    #[error("descriptor transfer unsupported: {0}")]
    DescriptorTransferUnsupported(String),

    /// Migration did not reach a terminal state within the bound.
    #[error("migration still '{last_status}' after {waited:?}")]
    TimedOut { waited: Duration, last_status: MigrationStatus },

    /// The source reported `failed`.
    #[error("migration failed: {reason}")]
    MigrationFailed { reason: String },

    /// A terminal status field did not match the post-migration contract.
    #[error("{role} {field}: expected '{expected}', got '{actual}'")]
    AssertionMismatch { role: Role, field: &'static str, expected: String, actual: String },

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// Whether this error means the test case should be skipped.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::CapabilityUnavailable { .. })
    }
}

impl From<nix::Error> for ExecutorError {
    fn from(errno: nix::Error) -> Self {
        Self::Io(errno.into())
    }
}
