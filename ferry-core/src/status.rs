//! Migration and run states reported by `query-migrate` / `query-status`.
//!
//! Both are transient snapshots: they are re-fetched on every poll and
//! never cached.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Migration progress as reported by `query-migrate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationStatus {
    /// No migration has been started (also an empty `query-migrate` reply).
    #[default]
    None,
    Setup,
    Cancelling,
    Cancelled,
    Active,
    PostcopyActive,
    PostcopyPaused,
    PostcopyRecover,
    Completed,
    Failed,
    Colo,
    PreSwitchover,
    Device,
    WaitUnplug,
    /// A status this harness does not know about.
    #[serde(other)]
    Unknown,
}

impl MigrationStatus {
    /// `completed` and `failed` end a migration attempt.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The wire name of this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Setup => "setup",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Active => "active",
            Self::PostcopyActive => "postcopy-active",
            Self::PostcopyPaused => "postcopy-paused",
            Self::PostcopyRecover => "postcopy-recover",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Colo => "colo",
            Self::PreSwitchover => "pre-switchover",
            Self::Device => "device",
            Self::WaitUnplug => "wait-unplug",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// VM run state as reported by `query-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Debug,
    Inmigrate,
    InternalError,
    IoError,
    Paused,
    Postmigrate,
    Prelaunch,
    FinishMigrate,
    RestoreVm,
    Running,
    SaveVm,
    Shutdown,
    Suspended,
    Watchdog,
    GuestPanicked,
    Colo,
    /// A run state this harness does not know about.
    #[serde(other)]
    Unknown,
}

impl RunState {
    /// The wire name of this run state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Inmigrate => "inmigrate",
            Self::InternalError => "internal-error",
            Self::IoError => "io-error",
            Self::Paused => "paused",
            Self::Postmigrate => "postmigrate",
            Self::Prelaunch => "prelaunch",
            Self::FinishMigrate => "finish-migrate",
            Self::RestoreVm => "restore-vm",
            Self::Running => "running",
            Self::SaveVm => "save-vm",
            Self::Shutdown => "shutdown",
            Self::Suspended => "suspended",
            Self::Watchdog => "watchdog",
            Self::GuestPanicked => "guest-panicked",
            Self::Colo => "colo",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subset of a `query-migrate` reply the harness reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct MigrationInfo {
    /// Absent before any migration was started.
    #[serde(default)]
    pub status: MigrationStatus,
    /// Human-readable failure reason, present when `status` is `failed`.
    #[serde(rename = "error-desc", default, skip_serializing_if = "Option::is_none")]
    pub error_desc: Option<String>,
}

impl MigrationInfo {
    #[must_use]
    pub fn new(status: MigrationStatus) -> Self {
        Self { status, error_desc: None }
    }

    /// Attach the failure reason reported alongside `failed`.
    #[must_use]
    pub fn with_error_desc(mut self, desc: impl Into<String>) -> Self {
        self.error_desc = Some(desc.into());
        self
    }
}

/// The subset of a `query-status` reply the harness reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct StatusInfo {
    /// Current run state.
    pub status: RunState,
    /// Whether vCPUs are executing.
    #[serde(default)]
    pub running: bool,
}

impl StatusInfo {
    #[must_use]
    pub fn new(status: RunState, running: bool) -> Self {
        Self { status, running }
    }
}
