//! VMM backend abstraction trait.
//!
//! The migration driver and test orchestration only see this trait, so
//! they run unchanged against QEMU or a scripted stand-in.

use async_trait::async_trait;

use ferry_core::Role;

use crate::probe::Capability;
use crate::{ExecutorError, VmInstance};

/// Virtual Machine Manager abstraction.
///
/// Implementations must be `Send + Sync` to allow use across async tasks.
///
/// # Cancel Safety
/// Dropping a `launch` future kills any process it already spawned.
#[async_trait]
pub trait VmmBackend: Send + Sync {
    /// The instance type this backend launches.
    type Instance: VmInstance;

    /// Start a VM with `args` appended to the base command line and block
    /// until it accepts control commands.
    ///
    /// # Errors
    /// Returns [`ExecutorError::BinaryNotFound`] if the VM binary is missing.
    /// Returns [`ExecutorError::LaunchFailed`] if the process exits or does
    /// not become ready in time.
    async fn launch(&self, role: Role, args: &[String]) -> Result<Self::Instance, ExecutorError>;

    /// Stop a VM and clean up its resources.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Io`] if the process cannot be killed.
    async fn terminate(&self, instance: Self::Instance) -> Result<(), ExecutorError>;

    /// Check if the backend is available and properly configured.
    ///
    /// # Errors
    /// Returns [`ExecutorError::BinaryNotFound`] if the environment is not ready.
    async fn health_check(&self) -> Result<(), ExecutorError>;

    /// Host capabilities every instance of this backend needs.
    ///
    /// Test cases probe these before launching anything.
    fn requirements(&self) -> Vec<Capability> {
        Vec::new()
    }
}
