use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::RecordId;
use crate::transport::Transport;
use crate::uri::MigrationUri;

/// A complete record of a single migration test case.
///
/// Records are immutable once created and are what the runner reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct MigrationRecord {
    /// Unique identifier for this run.
    pub id: RecordId,
    /// Scenario name, e.g. `"migration_with_tcp_localhost"`.
    pub scenario: String,
    /// Transport under test.
    pub transport: Transport,
    /// URI passed to the destination's `-incoming`, if one was built.
    pub destination_uri: Option<MigrationUri>,
    /// URI passed to the source's `migrate`, if one was built.
    pub source_uri: Option<MigrationUri>,
    /// When the test case began.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the test case.
    pub duration: Duration,
    /// Final verdict.
    pub outcome: TestOutcome,
}

impl MigrationRecord {
    /// Create a new record without URIs.
    #[must_use]
    pub fn new(
        scenario: impl Into<String>,
        transport: Transport,
        started_at: DateTime<Utc>,
        duration: Duration,
        outcome: TestOutcome,
    ) -> Self {
        Self {
            id: RecordId::new(),
            scenario: scenario.into(),
            transport,
            destination_uri: None,
            source_uri: None,
            started_at,
            duration,
            outcome,
        }
    }

    /// Attach the URIs the test case used.
    #[must_use]
    pub fn with_uris(mut self, destination: MigrationUri, source: MigrationUri) -> Self {
        self.destination_uri = Some(destination);
        self.source_uri = Some(source);
        self
    }
}

/// The verdict of one test case.
///
/// `Skipped` is deliberately distinct from `Failed`: a missing host
/// capability is not a defect in the VM under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
#[non_exhaustive]
pub enum TestOutcome {
    /// Migration completed and all four status fields matched.
    Passed,
    /// A required capability was missing; nothing was launched.
    Skipped {
        /// Which capability was missing and why.
        reason: String,
    },
    /// Migration or one of its assertions failed.
    Failed {
        /// Human-readable description of the failure.
        reason: String,
    },
}

impl TestOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => f.write_str("PASS"),
            Self::Skipped { reason } => write!(f, "SKIP ({reason})"),
            Self::Failed { reason } => write!(f, "FAIL ({reason})"),
        }
    }
}
