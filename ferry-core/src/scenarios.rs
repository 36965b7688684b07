//! The standard migration scenario matrix.
//!
//! One scenario per transport. Each scenario migrates an idle VM from a
//! source to a destination instance on the same host.

use serde::{Deserialize, Serialize};

use crate::transport::Transport;

/// A named migration test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Scenario {
    /// Stable name used in reports and for `--only` filtering.
    pub name: String,
    /// Transport the migration stream uses.
    pub transport: Transport,
    /// One-line description.
    pub description: String,
}

impl Scenario {
    /// Create a scenario.
    pub fn new(name: impl Into<String>, transport: Transport, description: impl Into<String>) -> Self {
        Self { name: name.into(), transport, description: description.into() }
    }
}

/// Returns the canonical scenarios, one per transport.
#[must_use]
pub fn standard_scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            "migration_with_tcp_localhost",
            Transport::Tcp,
            "Migrate over a TCP connection to a free localhost port.",
        ),
        Scenario::new(
            "migration_with_unix",
            Transport::Unix,
            "Migrate over a UNIX socket in a private temporary directory.",
        ),
        Scenario::new(
            "migration_with_exec",
            Transport::Exec,
            "Migrate through a pair of netcat processes.",
        ),
        Scenario::new(
            "migration_with_fd",
            Transport::Fd,
            "Migrate over a socket pair; the source end is passed via SCM_RIGHTS.",
        ),
        Scenario::new(
            "migration_with_rdma_localhost",
            Transport::Rdma,
            "Migrate over RDMA using the address of an active soft-RoCE link.",
        ),
    ]
}

/// Look up a standard scenario by name.
#[must_use]
pub fn find_scenario(name: &str) -> Option<Scenario> {
    standard_scenarios().into_iter().find(|s| s.name == name)
}
