//! Host capability probes.
//!
//! Every probe is read-only and never returns an error: anything that
//! goes wrong while probing is reported as [`Availability::Unavailable`].
//! Probes run before any VM is launched, so a missing capability never
//! leaves processes behind.

use std::fmt;
use std::net::{Ipv4Addr, TcpListener};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use tokio::process::Command;

use crate::ExecutorError;

/// systemd unit that loads the soft-RoCE (`rdma_rxe`) modules.
pub const RDMA_SERVICE: &str = "rdma-load-modules@rdma_rxe.service";

/// A host feature a test case may depend on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Capability {
    /// An executable on `PATH`.
    Command(String),
    /// The VM binary itself.
    VmBinary(PathBuf),
    /// `/dev/kvm` present and accessible.
    Kvm,
    /// The soft-RoCE module service is active.
    RdmaService,
    /// An active RDMA link bound to a netdev with an IPv4 address.
    RdmaInterface,
    /// A free TCP port on localhost.
    FreePort,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(name) => write!(f, "command '{name}'"),
            Self::VmBinary(path) => write!(f, "VM binary {}", path.display()),
            Self::Kvm => f.write_str("KVM"),
            Self::RdmaService => write!(f, "service {RDMA_SERVICE}"),
            Self::RdmaInterface => f.write_str("RDMA interface"),
            Self::FreePort => f.write_str("free port"),
        }
    }
}

/// Result of probing one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Present; `detail` says what was found.
    Available { detail: String },
    /// Missing; `reason` says why.
    Unavailable { reason: String },
}

impl Availability {
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// Probe a single capability.
pub async fn probe(capability: &Capability) -> Availability {
    let result = match capability {
        Capability::Command(name) => find_command(Path::new(name))
            .map(|p| p.display().to_string())
            .ok_or_else(|| format!("'{name}' not found on PATH")),
        Capability::VmBinary(path) => find_command(path)
            .map(|p| p.display().to_string())
            .ok_or_else(|| format!("{} not found", path.display())),
        Capability::Kvm => probe_kvm().await,
        Capability::RdmaService => probe_rdma_service().await,
        Capability::RdmaInterface => rdma_interface()
            .await
            .map(|(iface, addr)| format!("{iface} ({addr})")),
        Capability::FreePort => find_free_port()
            .map(|port| format!("port {port}"))
            .ok_or_else(|| "Failed to find a free port".to_owned()),
    };

    match result {
        Ok(detail) => Availability::Available { detail },
        Err(reason) => Availability::Unavailable { reason },
    }
}

/// Shorthand for `probe(capability).await.is_available()`.
pub async fn is_available(capability: &Capability) -> bool {
    probe(capability).await.is_available()
}

/// Probe every capability in order, stopping at the first missing one.
///
/// # Errors
/// Returns [`ExecutorError::CapabilityUnavailable`] naming the first
/// missing capability.
pub async fn require(capabilities: &[Capability]) -> Result<(), ExecutorError> {
    for capability in capabilities {
        match probe(capability).await {
            Availability::Available { detail } => {
                tracing::debug!(%capability, %detail, "capability available");
            }
            Availability::Unavailable { reason } => {
                tracing::info!(%capability, %reason, "capability unavailable");
                return Err(ExecutorError::CapabilityUnavailable {
                    capability: capability.to_string(),
                    reason,
                });
            }
        }
    }
    Ok(())
}

/// Resolve an executable either at the given path or on `PATH`.
#[must_use]
pub fn find_command(path: &Path) -> Option<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        return is_executable(path).then(|| path.to_owned());
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Ask the kernel for a currently free localhost TCP port.
///
/// The port is released before returning, so callers should use it
/// promptly and pick a fresh one for every attempt.
#[must_use]
pub fn find_free_port() -> Option<u16> {
    let listener = TcpListener::bind(("localhost", 0)).ok()?;
    listener.local_addr().ok().map(|addr| addr.port())
}

async fn probe_kvm() -> Result<String, String> {
    let kvm = Path::new("/dev/kvm");
    if !kvm.exists() {
        return Err("/dev/kvm not found".to_owned());
    }
    tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(kvm)
        .await
        .map(|_| "/dev/kvm".to_owned())
        .map_err(|e| format!("cannot open /dev/kvm: {e}"))
}

async fn probe_rdma_service() -> Result<String, String> {
    let output = run_quiet("systemctl", &["is-active", RDMA_SERVICE]).await?;
    if output.status.success() {
        Ok(RDMA_SERVICE.to_owned())
    } else {
        Err(format!("{RDMA_SERVICE} is {}", String::from_utf8_lossy(&output.stdout).trim()))
    }
}

/// Find the netdev behind the first active RDMA link and its IPv4 address.
///
/// # Errors
/// Returns a human-readable reason when `rdma` or `ip` fail, no link is
/// active, or the netdev has no IPv4 address.
pub async fn rdma_interface() -> Result<(String, Ipv4Addr), String> {
    let links = run_quiet("rdma", &["link", "show"]).await?;
    let iface = parse_rdma_netdev(&String::from_utf8_lossy(&links.stdout))
        .ok_or_else(|| "no active RDMA link with a netdev".to_owned())?;

    let addrs = run_quiet("ip", &["-4", "-o", "addr", "show", "dev", &iface]).await?;
    let addr = parse_ipv4_address(&String::from_utf8_lossy(&addrs.stdout))
        .ok_or_else(|| format!("{iface} has no IPv4 address"))?;

    Ok((iface, addr))
}

async fn run_quiet(program: &str, args: &[&str]) -> Result<Output, String> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("cannot run {program}: {e}"))
}

/// Extract the netdev of the first `ACTIVE` link from `rdma link show`.
///
/// Lines look like
/// `link rxe0/1 state ACTIVE physical_state LINK_UP netdev eth0`.
#[must_use]
pub fn parse_rdma_netdev(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let active = tokens.windows(2).any(|w| w == ["state", "ACTIVE"]);
        if !active {
            return None;
        }
        tokens
            .windows(2)
            .find(|w| w[0] == "netdev")
            .map(|w| w[1].to_owned())
    })
}

/// Extract the first IPv4 address from `ip -4 -o addr show` output.
///
/// Lines look like
/// `2: eth0    inet 10.0.2.15/24 brd 10.0.2.255 scope global eth0 ...`.
#[must_use]
pub fn parse_ipv4_address(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.find(|t| *t == "inet")?;
        let cidr = tokens.next()?;
        cidr.split('/').next()?.parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rdma_netdev_picks_active_link() {
        let output = "\
link rxe0/1 state DOWN physical_state DISABLED netdev eth1
link rxe1/1 state ACTIVE physical_state LINK_UP netdev enp0s3
";
        assert_eq!(parse_rdma_netdev(output).as_deref(), Some("enp0s3"));
    }

    #[test]
    fn parse_rdma_netdev_without_active_link_is_none() {
        assert_eq!(parse_rdma_netdev(""), None);
        assert_eq!(
            parse_rdma_netdev("link rxe0/1 state DOWN physical_state DISABLED netdev eth0\n"),
            None
        );
    }

    #[test]
    fn parse_rdma_netdev_active_without_netdev_is_none() {
        assert_eq!(parse_rdma_netdev("link mlx5_0/1 state ACTIVE physical_state LINK_UP\n"), None);
    }

    #[test]
    fn parse_ipv4_address_reads_cidr() {
        let output = "2: enp0s3    inet 10.0.2.15/24 brd 10.0.2.255 scope global dynamic enp0s3\\       valid_lft 86000sec preferred_lft 86000sec\n";
        assert_eq!(parse_ipv4_address(output), Some(Ipv4Addr::new(10, 0, 2, 15)));
    }

    #[test]
    fn parse_ipv4_address_empty_output_is_none() {
        assert_eq!(parse_ipv4_address(""), None);
        assert_eq!(parse_ipv4_address("2: eth0    inet garbage/24\n"), None);
    }

    #[test]
    fn find_free_port_returns_nonzero_port() {
        let port = find_free_port();
        assert!(matches!(port, Some(p) if p != 0), "expected a free port, got {port:?}");
    }

    #[test]
    fn find_command_absent_binary_is_none() {
        assert_eq!(find_command(Path::new("ferry-definitely-not-a-real-command")), None);
        assert_eq!(find_command(Path::new("/nonexistent/dir/qemu")), None);
    }

    #[test]
    fn find_command_resolves_sh() {
        let found = find_command(Path::new("sh"));
        assert!(found.is_some_and(|p| p.is_absolute()), "sh must resolve to an absolute path");
    }

    #[tokio::test]
    async fn missing_command_is_unavailable_not_error() {
        let cap = Capability::Command("ferry-definitely-not-a-real-command".to_owned());
        match probe(&cap).await {
            Availability::Unavailable { reason } => {
                assert!(reason.contains("not found"), "unexpected reason: {reason}");
            }
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn probing_twice_gives_same_answer() {
        for cap in [
            Capability::Command("sh".to_owned()),
            Capability::Command("ferry-definitely-not-a-real-command".to_owned()),
            Capability::VmBinary(PathBuf::from("/nonexistent/qemu-system-x86_64")),
        ] {
            assert_eq!(probe(&cap).await, probe(&cap).await, "probe of {cap} must be idempotent");
        }
    }

    #[tokio::test]
    async fn require_reports_first_missing_capability() {
        let caps = [
            Capability::Command("sh".to_owned()),
            Capability::Command("ferry-definitely-not-a-real-command".to_owned()),
        ];
        match require(&caps).await {
            Err(ExecutorError::CapabilityUnavailable { capability, .. }) => {
                assert_eq!(capability, "command 'ferry-definitely-not-a-real-command'");
            }
            other => panic!("expected CapabilityUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn require_empty_list_succeeds() {
        assert!(require(&[]).await.is_ok());
    }
}
