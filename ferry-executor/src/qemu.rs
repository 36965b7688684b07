//! QEMU VMM backend implementation.
//!
//! Each instance gets a private runtime directory holding its monitor
//! socket and console log. The harness listens on the monitor socket and
//! QEMU connects to it as a client, so "ready" means "QMP negotiated";
//! there is no window where the process runs but cannot be commanded.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};

use ferry_core::{InstanceId, Role};

use crate::poll::wait_for;
use crate::probe::{self, Capability};
use crate::qmp::QmpClient;
use crate::{ExecutorError, HarnessConfig, QemuInstance, VmmBackend};

/// Monitor socket name inside an instance's runtime directory.
pub const MONITOR_SOCKET: &str = "qmp.sock";

/// Console log name inside an instance's runtime directory.
pub const LOG_FILE: &str = "console.log";

/// How often to check for process exit during graceful shutdown.
const EXIT_POLL: Duration = Duration::from_millis(50);

/// Lines of console log attached to launch failures.
const LOG_TAIL_LINES: usize = 20;

/// QEMU VMM backend.
///
/// Spawns and manages QEMU processes, communicating with each via QMP on
/// a per-instance Unix socket.
#[derive(Debug, Clone)]
pub struct QemuBackend {
    config: HarnessConfig,
}

impl QemuBackend {
    /// Create a new backend with the given configuration.
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    /// Create a backend using system defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(HarnessConfig::with_defaults())
    }

    /// The configuration instances are launched with.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Arguments every instance starts with, before role-specific ones.
    #[must_use]
    pub fn base_args(&self, monitor: &Path) -> Vec<String> {
        let mut args = vec![
            "-chardev".to_owned(),
            format!("socket,id=mon,path={}", monitor.display()),
            "-mon".to_owned(),
            "chardev=mon,mode=control".to_owned(),
            "-display".to_owned(),
            "none".to_owned(),
            "-vga".to_owned(),
            "none".to_owned(),
        ];
        if self.config.nodefaults {
            args.push("-nodefaults".to_owned());
        }
        if let Some(machine) = &self.config.machine {
            args.push("-machine".to_owned());
            args.push(machine.clone());
        }
        if let Some(accel) = &self.config.accel {
            args.push("-accel".to_owned());
            args.push(accel.clone());
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    fn resolve_binary(&self) -> Result<PathBuf, ExecutorError> {
        probe::find_command(&self.config.binary)
            .ok_or_else(|| ExecutorError::BinaryNotFound { path: self.config.binary.clone() })
    }

    /// Wait for the spawned VM to connect to the monitor socket.
    async fn accept_monitor(
        &self,
        listener: &UnixListener,
        process: &mut Child,
        role: Role,
    ) -> Result<UnixStream, ExecutorError> {
        let limit = self.config.launch_timeout;
        let accepted = tokio::time::timeout(limit, async {
            tokio::select! {
                accepted = listener.accept() => {
                    accepted.map(|(stream, _)| stream).map_err(ExecutorError::Io)
                }
                status = process.wait() => match status {
                    Ok(status) => Err(ExecutorError::LaunchFailed {
                        role,
                        reason: format!("process exited ({status}) before connecting to the monitor"),
                    }),
                    Err(e) => Err(ExecutorError::Io(e)),
                },
            }
        })
        .await;

        accepted.unwrap_or_else(|_| {
            Err(ExecutorError::LaunchFailed {
                role,
                reason: format!("monitor not connected within {limit:?}"),
            })
        })
    }
}

#[async_trait]
impl VmmBackend for QemuBackend {
    type Instance = QemuInstance;

    async fn launch(&self, role: Role, args: &[String]) -> Result<QemuInstance, ExecutorError> {
        let binary = self.resolve_binary()?;

        tokio::fs::create_dir_all(&self.config.runtime_dir).await?;
        let runtime_dir = tempfile::Builder::new()
            .prefix(&format!("{role}-"))
            .tempdir_in(&self.config.runtime_dir)?;

        let monitor_path = runtime_dir.path().join(MONITOR_SOCKET);
        let log_path = runtime_dir.path().join(LOG_FILE);
        let listener = UnixListener::bind(&monitor_path)?;

        let mut full_args = self.base_args(&monitor_path);
        full_args.extend(args.iter().cloned());

        let log = std::fs::File::create(&log_path)?;
        let log_err = log.try_clone()?;

        let id = InstanceId::new();
        tracing::info!(
            instance_id = %id,
            %role,
            binary = %binary.display(),
            args = ?args,
            "launching VM"
        );

        let mut process = Command::new(&binary)
            .args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::LaunchFailed {
                role,
                reason: format!("exec {}: {e}", binary.display()),
            })?;

        let stream = match self.accept_monitor(&listener, &mut process, role).await {
            Ok(stream) => stream,
            Err(e) => return Err(attach_log_tail(e, &log_path).await),
        };
        drop(listener);

        let qmp = match QmpClient::handshake(stream, self.config.command_timeout).await {
            Ok(qmp) => qmp,
            Err(e) => {
                let e = ExecutorError::LaunchFailed { role, reason: format!("QMP handshake: {e}") };
                return Err(attach_log_tail(e, &log_path).await);
            }
        };

        tracing::info!(instance_id = %id, %role, pid = ?process.id(), "VM ready");

        Ok(QemuInstance::new(id, role, full_args, process, qmp, runtime_dir))
    }

    async fn terminate(&self, mut instance: QemuInstance) -> Result<(), ExecutorError> {
        tracing::info!(instance_id = %instance.id, role = %instance.role, "terminating VM");

        // The monitor may close before acknowledging `quit`.
        if let Err(e) = instance.qmp.execute("quit", None).await {
            tracing::debug!(instance_id = %instance.id, error = %e, "quit not acknowledged");
        }

        let exited = wait_for(self.config.shutdown_grace, EXIT_POLL, || {
            std::future::ready(instance.process.try_wait())
        })
        .await?;

        if exited.is_none() {
            let log = tokio::fs::read_to_string(instance.log_path()).await.unwrap_or_default();
            tracing::warn!(
                instance_id = %instance.id,
                console = %log_tail(&log, LOG_TAIL_LINES),
                "VM ignored quit, killing"
            );
            instance.process.kill().await?;
        }

        tracing::info!(instance_id = %instance.id, "VM terminated");

        Ok(())
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        self.resolve_binary()?;
        probe::require(&self.requirements()).await
    }

    fn requirements(&self) -> Vec<Capability> {
        let mut caps = vec![Capability::VmBinary(self.config.binary.clone())];
        if self.config.accel.as_deref().is_some_and(|a| a.starts_with("kvm")) {
            caps.push(Capability::Kvm);
        }
        caps
    }
}

/// Append the tail of the console log to a launch failure.
async fn attach_log_tail(error: ExecutorError, log_path: &Path) -> ExecutorError {
    let ExecutorError::LaunchFailed { role, reason } = error else {
        return error;
    };
    let log = tokio::fs::read_to_string(log_path).await.unwrap_or_default();
    let tail = log_tail(&log, LOG_TAIL_LINES);
    if tail.is_empty() {
        return ExecutorError::LaunchFailed { role, reason };
    }
    ExecutorError::LaunchFailed { role, reason: format!("{reason}\n--- console log ---\n{tail}") }
}

fn log_tail(log: &str, lines: usize) -> String {
    let all: Vec<&str> = log.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
