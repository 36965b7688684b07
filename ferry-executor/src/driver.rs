//! Migration driver: transport plans and the launch/migrate sequence.
//!
//! A [`MigrationPlan`] holds everything one attempt needs on the host
//! side: both URIs, the scratch directory for `unix`, and the socket pair
//! for `fd`. [`MigrationDriver`] launches the instances in the only order
//! that works (destination listening before the source is told to
//! migrate) and [`migrate`] will not run without a [`ReadyDestination`].

use std::os::fd::{AsFd, OwnedFd};
use std::path::Path;

use tempfile::TempDir;

use ferry_core::{build_uri, CoreError, MigrationUri, Role, Transport, UriParams};

use crate::fd_channel::DescriptorPair;
use crate::probe::{self, Capability};
use crate::{ExecutorError, HarnessConfig, VmInstance, VmmBackend};

/// Name the source registers the outgoing descriptor under.
pub const FD_TAG: &str = "fd-mig";

/// Socket file name used by the `unix` transport.
pub const UNIX_SOCKET_NAME: &str = "qemu-test.sock";

/// Host for loopback transports.
const LOCALHOST: &str = "localhost";

/// Helper command the `exec` transport pipes the stream through.
const NETCAT: &str = "nc";

/// Host capabilities a transport needs beyond the backend's own.
#[must_use]
pub fn requirements_for(transport: Transport) -> Vec<Capability> {
    match transport {
        Transport::Tcp => vec![Capability::FreePort],
        Transport::Exec => vec![Capability::Command(NETCAT.to_owned()), Capability::FreePort],
        Transport::Rdma => vec![
            Capability::Command("rdma".to_owned()),
            Capability::RdmaService,
            Capability::RdmaInterface,
            Capability::FreePort,
        ],
        _ => Vec::new(),
    }
}

/// Host-side resources and URIs for one migration attempt.
///
/// Dropping the plan closes any descriptor ends not yet handed off and
/// removes the scratch directory.
#[derive(Debug)]
pub struct MigrationPlan {
    transport: Transport,
    destination_uri: MigrationUri,
    source_uri: MigrationUri,
    scratch: Option<TempDir>,
    outgoing: Option<OwnedFd>,
    incoming: Option<OwnedFd>,
}

impl MigrationPlan {
    /// Allocate resources and build both URIs for `transport`.
    ///
    /// Ports are picked fresh on every call.
    ///
    /// # Errors
    /// - [`ExecutorError::CapabilityUnavailable`] if no free port or RDMA
    ///   address can be found
    /// - [`ExecutorError::Transport`] if a URI cannot be built
    /// - [`ExecutorError::Io`] if the scratch directory or socket pair
    ///   cannot be created
    pub async fn for_transport(
        transport: Transport,
        config: &HarnessConfig,
    ) -> Result<Self, ExecutorError> {
        let plan = match transport {
            Transport::Tcp => {
                let uri = build_uri(
                    Transport::Tcp,
                    &UriParams::new().host(LOCALHOST).port(free_port()?),
                )?;
                Self::symmetric(transport, uri)
            }
            Transport::Unix => {
                tokio::fs::create_dir_all(&config.runtime_dir).await?;
                let scratch = tempfile::Builder::new()
                    .prefix("migration-")
                    .tempdir_in(&config.runtime_dir)?;
                let uri = build_uri(
                    Transport::Unix,
                    &UriParams::new().path(scratch.path().join(UNIX_SOCKET_NAME)),
                )?;
                let mut plan = Self::symmetric(transport, uri);
                plan.scratch = Some(scratch);
                plan
            }
            Transport::Exec => {
                let port = free_port()?;
                let listen = format!("{NETCAT} -l {LOCALHOST} {port}");
                let connect = format!("{NETCAT} {LOCALHOST} {port}");
                Self {
                    transport,
                    destination_uri: build_uri(Transport::Exec, &UriParams::new().command(listen))?,
                    source_uri: build_uri(Transport::Exec, &UriParams::new().command(connect))?,
                    scratch: None,
                    outgoing: None,
                    incoming: None,
                }
            }
            Transport::Fd => {
                let pair = DescriptorPair::new()?;
                let destination_uri = MigrationUri::incoming_fd(pair.incoming_raw());
                let source_uri = build_uri(Transport::Fd, &UriParams::new().name(FD_TAG))?;
                let (outgoing, incoming) = pair.into_parts();
                Self {
                    transport,
                    destination_uri,
                    source_uri,
                    scratch: None,
                    outgoing: Some(outgoing),
                    incoming: Some(incoming),
                }
            }
            Transport::Rdma => {
                let (iface, addr) = probe::rdma_interface().await.map_err(|reason| {
                    ExecutorError::CapabilityUnavailable {
                        capability: Capability::RdmaInterface.to_string(),
                        reason,
                    }
                })?;
                tracing::debug!(%iface, %addr, "using RDMA interface");
                let uri = build_uri(
                    Transport::Rdma,
                    &UriParams::new().host(addr.to_string()).port(free_port()?),
                )?;
                Self::symmetric(transport, uri)
            }
            other => {
                return Err(CoreError::UnsupportedTransport { kind: other.to_string() }.into());
            }
        };

        tracing::debug!(
            %transport,
            destination = %plan.destination_uri,
            source = %plan.source_uri,
            "migration plan ready"
        );
        Ok(plan)
    }

    fn symmetric(transport: Transport, uri: MigrationUri) -> Self {
        Self {
            transport,
            destination_uri: uri.clone(),
            source_uri: uri,
            scratch: None,
            outgoing: None,
            incoming: None,
        }
    }

    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// URI passed to the destination's `-incoming`.
    #[must_use]
    pub fn destination_uri(&self) -> &MigrationUri {
        &self.destination_uri
    }

    /// URI passed to the source's `migrate`.
    #[must_use]
    pub fn source_uri(&self) -> &MigrationUri {
        &self.source_uri
    }

    /// Directory holding the `unix` transport's socket.
    #[must_use]
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    /// Whether descriptor ends are still held locally.
    #[must_use]
    pub fn holds_descriptors(&self) -> bool {
        self.outgoing.is_some() || self.incoming.is_some()
    }
}

fn free_port() -> Result<u16, ExecutorError> {
    probe::find_free_port().ok_or_else(|| ExecutorError::CapabilityUnavailable {
        capability: Capability::FreePort.to_string(),
        reason: "Failed to find a free port".to_owned(),
    })
}

/// A destination instance that was launched with `-incoming` and has
/// finished its monitor handshake.
///
/// For tcp, unix, rdma and fd the incoming endpoint is open by then. For
/// exec, QEMU has only spawned the listener command (`nc -l`); whether that
/// command has bound its port yet is outside QEMU's view. It is not probed
/// here because `nc -l` serves a single connection and a probe would use it
/// up.
///
/// Only [`MigrationDriver::launch_destination`] produces one.
#[derive(Debug)]
pub struct ReadyDestination<I> {
    instance: I,
}

impl<I> ReadyDestination<I> {
    #[must_use]
    pub fn instance(&self) -> &I {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut I {
        &mut self.instance
    }

    #[must_use]
    pub fn into_inner(self) -> I {
        self.instance
    }
}

/// Launches the two sides of a migration through a backend.
#[derive(Debug)]
pub struct MigrationDriver<'a, B> {
    backend: &'a B,
}

impl<'a, B: VmmBackend> MigrationDriver<'a, B> {
    #[must_use]
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Launch the destination with `-incoming <uri>`.
    ///
    /// For `fd`, the local copy of the inherited end is closed once the
    /// destination holds it.
    ///
    /// # Errors
    /// Propagates launch errors from the backend.
    pub async fn launch_destination(
        &self,
        plan: &mut MigrationPlan,
    ) -> Result<ReadyDestination<B::Instance>, ExecutorError> {
        let args = vec!["-incoming".to_owned(), plan.destination_uri.to_string()];
        let instance = self.backend.launch(Role::Destination, &args).await?;
        drop(plan.incoming.take());

        tracing::info!(
            instance_id = %instance.id(),
            uri = %plan.destination_uri,
            "destination ready for incoming migration"
        );
        Ok(ReadyDestination { instance })
    }

    /// Launch the source with no extra arguments.
    ///
    /// # Errors
    /// Propagates launch errors from the backend.
    pub async fn launch_source(&self) -> Result<B::Instance, ExecutorError> {
        self.backend.launch(Role::Source, &[]).await
    }
}

/// Tell `source` to start migrating to `destination`.
///
/// For `fd`, the outgoing end is first sent over the source's descriptor
/// channel under [`FD_TAG`] and then closed locally; it is handed off at
/// most once per plan. Returns once the source accepted the command.
///
/// # Errors
/// - [`ExecutorError::DescriptorTransferUnsupported`] if the plan needs a
///   descriptor hand-off and the source has no descriptor channel
/// - [`ExecutorError::Protocol`] if the descriptor was already handed off
/// - [`ExecutorError::Qmp`] if the source rejects `migrate`
pub async fn migrate<S, D>(
    source: &mut S,
    destination: &ReadyDestination<D>,
    plan: &mut MigrationPlan,
) -> Result<(), ExecutorError>
where
    S: VmInstance + ?Sized,
    D: VmInstance,
{
    if plan.transport == Transport::Fd {
        let outgoing = plan
            .outgoing
            .take()
            .ok_or_else(|| ExecutorError::Protocol("outgoing descriptor already handed off".to_owned()))?;
        let role = source.role();
        let channel = source.descriptor_channel().ok_or_else(|| {
            ExecutorError::DescriptorTransferUnsupported(format!("{role} control channel"))
        })?;
        channel.send(outgoing.as_fd(), FD_TAG).await?;
        drop(outgoing);
        tracing::debug!(fdname = FD_TAG, "descriptor handed to source");
    }

    tracing::info!(
        source = %source.id(),
        destination = %destination.instance().id(),
        uri = %plan.source_uri,
        "starting migration"
    );
    source.migrate(&plan.source_uri).await
}
