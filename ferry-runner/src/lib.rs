//! Command-line runner for the Ferry migration scenario matrix.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod cli;
pub mod report;

pub use cli::Cli;
pub use report::{write_json_lines, Summary};

/// Errors surfaced by the runner binary.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// `--only` named a scenario that does not exist.
    #[error("unknown scenario '{0}' (see --list)")]
    UnknownScenario(String),

    /// A record could not be serialized.
    #[error("failed to encode record: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing the report failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
