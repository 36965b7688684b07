//! VM instances: a live process plus its control channel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tempfile::TempDir;

use ferry_core::{InstanceId, MigrationInfo, MigrationUri, Role, StatusInfo};

use crate::fd_channel::DescriptorChannel;
use crate::qmp::{QmpClient, QmpEvent};
use crate::ExecutorError;

/// A launched VM that accepts control commands.
///
/// Commands are synchronous request/response: a reply is never partial
/// and never belongs to another request.
#[async_trait]
pub trait VmInstance: Send {
    /// Unique identifier of this instance.
    fn id(&self) -> InstanceId;

    /// Which side of the migration this instance plays.
    fn role(&self) -> Role;

    /// Execute a control command and return its result payload.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Qmp`] if the VM rejects the command.
    async fn command(&mut self, name: &str, arguments: Option<Value>)
        -> Result<Value, ExecutorError>;

    /// The channel descriptors can be sent over, if the control socket
    /// supports it.
    fn descriptor_channel(&mut self) -> Option<&mut dyn DescriptorChannel> {
        None
    }

    /// `query-migrate`.
    ///
    /// # Errors
    /// Propagates command errors; returns [`ExecutorError::Protocol`] if the
    /// reply has an unexpected shape.
    async fn query_migrate(&mut self) -> Result<MigrationInfo, ExecutorError> {
        let reply = self.command("query-migrate", None).await?;
        serde_json::from_value(reply)
            .map_err(|e| ExecutorError::Protocol(format!("malformed query-migrate reply: {e}")))
    }

    /// `query-status`.
    ///
    /// # Errors
    /// Propagates command errors; returns [`ExecutorError::Protocol`] if the
    /// reply has an unexpected shape.
    async fn query_status(&mut self) -> Result<StatusInfo, ExecutorError> {
        let reply = self.command("query-status", None).await?;
        serde_json::from_value(reply)
            .map_err(|e| ExecutorError::Protocol(format!("malformed query-status reply: {e}")))
    }

    /// `migrate uri=<uri>`. Returns once the VM accepted the request, not
    /// when migration finishes.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Qmp`] if the VM refuses to start migrating.
    async fn migrate(&mut self, uri: &MigrationUri) -> Result<(), ExecutorError> {
        self.command("migrate", Some(serde_json::json!({ "uri": uri.to_string() }))).await?;
        Ok(())
    }
}

/// A QEMU process driven over QMP.
///
/// Dropping the instance kills the process and removes its runtime
/// directory, so every exit path releases it. Prefer
/// [`VmmBackend::terminate`](crate::VmmBackend::terminate) for an orderly
/// shutdown.
#[derive(Debug)]
#[non_exhaustive]
pub struct QemuInstance {
    /// Unique identifier for this instance.
    pub id: InstanceId,

    /// Source or destination.
    pub role: Role,

    /// Full argument vector the binary was started with.
    pub args: Vec<String>,

    /// The VM child process.
    pub process: tokio::process::Child,

    /// Timestamp when the instance was launched.
    pub launched_at: DateTime<Utc>,

    pub(crate) qmp: QmpClient,

    pub(crate) runtime_dir: TempDir,
}

impl QemuInstance {
    pub(crate) fn new(
        id: InstanceId,
        role: Role,
        args: Vec<String>,
        process: tokio::process::Child,
        qmp: QmpClient,
        runtime_dir: TempDir,
    ) -> Self {
        Self { id, role, args, process, launched_at: Utc::now(), qmp, runtime_dir }
    }

    /// Path of the console log captured from the process.
    #[must_use]
    pub fn log_path(&self) -> std::path::PathBuf {
        self.runtime_dir.path().join(crate::qemu::LOG_FILE)
    }

    /// Events the VM emitted so far.
    #[must_use]
    pub fn events(&self) -> &[QmpEvent] {
        self.qmp.events()
    }
}

#[async_trait]
impl VmInstance for QemuInstance {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    async fn command(
        &mut self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<Value, ExecutorError> {
        self.qmp.execute(name, arguments).await
    }

    fn descriptor_channel(&mut self) -> Option<&mut dyn DescriptorChannel> {
        Some(&mut self.qmp)
    }
}
