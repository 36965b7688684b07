//! Harness configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long a migration may take before the attempt is reported as timed out.
pub const DEFAULT_MIGRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between `query-migrate` polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration shared by every instance a harness launches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct HarnessConfig {
    /// Path to the VM binary (absolute, or a bare name looked up on `PATH`).
    pub binary: PathBuf,

    /// `-machine` value, if any.
    pub machine: Option<String>,

    /// `-accel` value, if any.
    pub accel: Option<String>,

    /// Pass `-nodefaults` so no default devices are created.
    pub nodefaults: bool,

    /// Extra arguments appended to every instance's command line.
    pub extra_args: Vec<String>,

    /// Directory under which per-instance runtime directories are created.
    pub runtime_dir: PathBuf,

    /// Maximum time from spawn until the monitor connection is ready.
    pub launch_timeout: Duration,

    /// Maximum time for a single control-channel round trip.
    pub command_timeout: Duration,

    /// Maximum time to wait for a migration to reach a terminal state.
    pub migration_timeout: Duration,

    /// Interval between `query-migrate` polls.
    pub poll_interval: Duration,

    /// Time to wait for a graceful `quit` before killing the process.
    pub shutdown_grace: Duration,
}

impl HarnessConfig {
    /// Create a config for the given binary with sensible defaults.
    #[must_use]
    pub fn new(binary: PathBuf) -> Self {
        Self {
            binary,
            machine: None,
            accel: None,
            nodefaults: true,
            extra_args: Vec::new(),
            runtime_dir: default_runtime_dir(),
            launch_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            migration_timeout: DEFAULT_MIGRATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_grace: Duration::from_secs(3),
        }
    }

    /// Create a config using the host architecture's system emulator,
    /// e.g. `qemu-system-x86_64`, looked up on `PATH`.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(PathBuf::from(default_binary_name()))
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// `<tmp>/ferry-<uid>`, so users sharing a host never collide on one
/// directory another user owns.
#[must_use]
pub fn default_runtime_dir() -> PathBuf {
    std::env::temp_dir().join(format!("ferry-{}", nix::unistd::getuid()))
}

/// `qemu-system-<arch>` for the host architecture.
#[must_use]
pub fn default_binary_name() -> String {
    format!("qemu-system-{}", std::env::consts::ARCH)
}
