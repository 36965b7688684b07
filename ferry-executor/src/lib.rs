//! VM process control and migration test execution for Ferry.
//!
//! Launches QEMU instances over QMP, hands migration transports to them,
//! and checks that a live migration between two instances completes.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod assertion;
pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod fd_channel;
pub mod instance;
pub mod poll;
pub mod probe;
pub mod qemu;
pub mod qmp;
pub mod scenario;

#[cfg(test)]
mod testing;

pub use assertion::{assert_migration, verify_migration};
pub use backend::VmmBackend;
pub use config::{HarnessConfig, DEFAULT_MIGRATION_TIMEOUT, DEFAULT_POLL_INTERVAL};
pub use driver::{migrate, MigrationDriver, MigrationPlan, ReadyDestination, FD_TAG};
pub use error::ExecutorError;
pub use fd_channel::{DescriptorChannel, DescriptorPair, ScmRightsChannel};
pub use instance::{QemuInstance, VmInstance};
pub use poll::{await_completion, wait_for, AttemptState};
pub use probe::{Availability, Capability};
pub use qemu::QemuBackend;
pub use qmp::QmpClient;
pub use scenario::MigrationTest;
