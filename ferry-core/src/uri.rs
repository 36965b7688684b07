//! Migration URIs as understood by `-incoming` and the `migrate` command.
//!
//! A URI is `<scheme>:<target>`; the target grammar depends on the
//! transport. URIs are built once per test case and never mutated.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::transport::Transport;

/// A validated migration URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[non_exhaustive]
pub enum MigrationUri {
    /// `tcp:<host>:<port>`
    Tcp { host: String, port: u16 },
    /// `unix:<absolute-path>`
    Unix { path: PathBuf },
    /// `exec:<shell command>`
    Exec { command: String },
    /// `fd:<name>`; the name is either a registered descriptor name or,
    /// on the destination command line, a raw descriptor number.
    Fd { name: String },
    /// `rdma:<ip>:<port>`
    Rdma { addr: IpAddr, port: u16 },
}

impl MigrationUri {
    /// The transport this URI travels over.
    #[must_use]
    pub fn transport(&self) -> Transport {
        match self {
            Self::Tcp { .. } => Transport::Tcp,
            Self::Unix { .. } => Transport::Unix,
            Self::Exec { .. } => Transport::Exec,
            Self::Fd { .. } => Transport::Fd,
            Self::Rdma { .. } => Transport::Rdma,
        }
    }

    /// `fd:<n>` for a descriptor inherited by the destination process.
    #[must_use]
    pub fn incoming_fd(raw_fd: i32) -> Self {
        Self::Fd { name: raw_fd.to_string() }
    }

    /// The descriptor number when this is an `fd:` URI naming a raw fd.
    #[must_use]
    pub fn fd_number(&self) -> Option<i32> {
        match self {
            Self::Fd { name } => name.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
            Self::Unix { path } => write!(f, "unix:{}", path.display()),
            Self::Exec { command } => write!(f, "exec:{command}"),
            Self::Fd { name } => write!(f, "fd:{name}"),
            Self::Rdma { addr: IpAddr::V4(ip), port } => write!(f, "rdma:{ip}:{port}"),
            Self::Rdma { addr: IpAddr::V6(ip), port } => write!(f, "rdma:[{ip}]:{port}"),
        }
    }
}

/// Loose parameter bag for [`build_uri`].
///
/// Only the fields relevant to the chosen transport are read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UriParams {
    host: Option<String>,
    port: Option<u16>,
    path: Option<PathBuf>,
    command: Option<String>,
    name: Option<String>,
}

impl UriParams {
    /// An empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Host name or address (`tcp`, `rdma`).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Port (`tcp`, `rdma`).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Socket path (`unix`).
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Shell command (`exec`).
    #[must_use]
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Descriptor name (`fd`).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Build a migration URI for `transport` from `params`.
///
/// Pure and deterministic: the same inputs always yield the same URI.
///
/// # Errors
/// Returns [`CoreError::TransportConstruction`] if a required parameter is
/// missing or malformed.
///
/// # Examples
/// ```
/// use ferry_core::{build_uri, Transport, UriParams};
///
/// let uri = build_uri(Transport::Tcp, &UriParams::new().host("localhost").port(5000)).unwrap();
/// assert_eq!(uri.to_string(), "tcp:localhost:5000");
/// ```
pub fn build_uri(transport: Transport, params: &UriParams) -> Result<MigrationUri, CoreError> {
    let fail = |reason: &str| CoreError::TransportConstruction {
        transport: transport.to_string(),
        reason: reason.to_owned(),
    };

    match transport {
        Transport::Tcp => {
            let host = params.host.as_deref().ok_or_else(|| fail("missing host"))?;
            validate_host(host).map_err(|r| fail(&r))?;
            let port = params.port.ok_or_else(|| fail("missing port"))?;
            Ok(MigrationUri::Tcp { host: host.to_owned(), port })
        }
        Transport::Unix => {
            let path = params.path.as_ref().ok_or_else(|| fail("missing socket path"))?;
            if !path.is_absolute() {
                return Err(fail(&format!("socket path {} is not absolute", path.display())));
            }
            Ok(MigrationUri::Unix { path: path.clone() })
        }
        Transport::Exec => {
            let command = params.command.as_deref().ok_or_else(|| fail("missing command"))?;
            if command.trim().is_empty() {
                return Err(fail("empty command"));
            }
            Ok(MigrationUri::Exec { command: command.to_owned() })
        }
        Transport::Fd => {
            let name = params.name.as_deref().ok_or_else(|| fail("missing descriptor name"))?;
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(fail(&format!("invalid descriptor name '{name}'")));
            }
            // A numeric name would be read as an inherited descriptor number.
            if name.bytes().all(|b| b.is_ascii_digit()) {
                return Err(fail(&format!(
                    "descriptor name '{name}' is all digits; use MigrationUri::incoming_fd for inherited descriptors"
                )));
            }
            Ok(MigrationUri::Fd { name: name.to_owned() })
        }
        Transport::Rdma => {
            let host = params.host.as_deref().ok_or_else(|| fail("missing address"))?;
            let bare = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
            let addr: IpAddr =
                bare.parse().map_err(|_| fail(&format!("'{host}' is not an IP address")))?;
            let port = params.port.ok_or_else(|| fail("missing port"))?;
            Ok(MigrationUri::Rdma { addr, port })
        }
    }
}

fn validate_host(host: &str) -> Result<(), String> {
    if host.is_empty() {
        return Err("empty host".to_owned());
    }
    if host.chars().any(char::is_whitespace) {
        return Err(format!("host '{host}' contains whitespace"));
    }
    // IPv6 literals must be bracketed so the port separator stays unambiguous.
    if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
        return Err(format!("IPv6 host '{host}' must be bracketed"));
    }
    Ok(())
}

impl FromStr for MigrationUri {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| CoreError::InvalidUri { uri: s.to_owned(), reason };

        let (scheme, target) =
            s.split_once(':').ok_or_else(|| invalid("missing scheme separator".to_owned()))?;
        let transport: Transport = scheme.parse()?;

        let params = match transport {
            Transport::Tcp | Transport::Rdma => {
                let (host, port) = target
                    .rsplit_once(':')
                    .ok_or_else(|| invalid("expected <host>:<port>".to_owned()))?;
                let port: u16 =
                    port.parse().map_err(|_| invalid(format!("invalid port '{port}'")))?;
                UriParams::new().host(host).port(port)
            }
            Transport::Unix => UriParams::new().path(target),
            Transport::Exec => UriParams::new().command(target),
            Transport::Fd => match target.parse::<u32>().ok().and_then(|n| i32::try_from(n).ok()) {
                Some(raw_fd) if target.bytes().all(|b| b.is_ascii_digit()) => {
                    return Ok(Self::incoming_fd(raw_fd));
                }
                _ => UriParams::new().name(target),
            },
        };

        build_uri(transport, &params).map_err(|e| invalid(e.to_string()))
    }
}

impl TryFrom<String> for MigrationUri {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MigrationUri> for String {
    fn from(uri: MigrationUri) -> Self {
        uri.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(transport: Transport, params: UriParams) -> MigrationUri {
        match build_uri(transport, &params) {
            Ok(uri) => uri,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn build_uri_tcp_localhost() {
        let uri = build(Transport::Tcp, UriParams::new().host("localhost").port(5000));
        assert_eq!(uri.to_string(), "tcp:localhost:5000");
    }

    #[test]
    fn build_uri_unix_absolute_path() {
        let uri = build(Transport::Unix, UriParams::new().path("/tmp/x/qemu-test.sock"));
        assert_eq!(uri.to_string(), "unix:/tmp/x/qemu-test.sock");
    }

    #[test]
    fn build_uri_unix_relative_path_rejected() {
        let result = build_uri(Transport::Unix, &UriParams::new().path("qemu-test.sock"));
        assert!(
            matches!(result, Err(CoreError::TransportConstruction { .. })),
            "relative socket paths must be rejected, got {result:?}"
        );
    }

    #[test]
    fn build_uri_exec_keeps_command_verbatim() {
        let uri = build(Transport::Exec, UriParams::new().command("nc -l localhost 4444"));
        assert_eq!(uri.to_string(), "exec:nc -l localhost 4444");
    }

    #[test]
    fn build_uri_fd_uses_name_not_number() {
        let uri = build(Transport::Fd, UriParams::new().name("fd-mig"));
        assert_eq!(uri.to_string(), "fd:fd-mig");
        assert_eq!(uri.fd_number(), None);
    }

    #[test]
    fn build_uri_fd_rejects_numeric_name() {
        for name in ["7", "0", "0042"] {
            let result = build_uri(Transport::Fd, &UriParams::new().name(name));
            assert!(
                matches!(result, Err(CoreError::TransportConstruction { ref reason, .. }) if reason.contains("all digits")),
                "numeric name '{name}' must be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn parse_fd_number_still_accepted() {
        let uri: MigrationUri = match "fd:12".parse() {
            Ok(u) => u,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(uri, MigrationUri::incoming_fd(12));
        assert_eq!(uri.fd_number(), Some(12));
    }

    #[test]
    fn incoming_fd_renders_descriptor_number() {
        let uri = MigrationUri::incoming_fd(7);
        assert_eq!(uri.to_string(), "fd:7");
        assert_eq!(uri.fd_number(), Some(7));
    }

    #[test]
    fn build_uri_rdma_ipv4_and_ipv6() {
        let v4 = build(Transport::Rdma, UriParams::new().host("192.168.1.5").port(4444));
        assert_eq!(v4.to_string(), "rdma:192.168.1.5:4444");

        let v6 = build(Transport::Rdma, UriParams::new().host("[fe80::1]").port(4444));
        assert_eq!(v6.to_string(), "rdma:[fe80::1]:4444");
    }

    #[test]
    fn build_uri_rdma_requires_ip_address() {
        let result = build_uri(Transport::Rdma, &UriParams::new().host("localhost").port(1));
        assert!(matches!(result, Err(CoreError::TransportConstruction { .. })));
    }

    #[test]
    fn build_uri_missing_port_fails_fast() {
        let result = build_uri(Transport::Tcp, &UriParams::new().host("localhost"));
        match result {
            Err(CoreError::TransportConstruction { transport, reason }) => {
                assert_eq!(transport, "tcp");
                assert!(reason.contains("port"), "reason must name the missing field: {reason}");
            }
            other => panic!("expected TransportConstruction, got {other:?}"),
        }
    }

    #[test]
    fn build_uri_tcp_unbracketed_ipv6_rejected() {
        let result = build_uri(Transport::Tcp, &UriParams::new().host("::1").port(80));
        assert!(result.is_err(), "ambiguous IPv6 host must be rejected");
    }

    #[test]
    fn parse_unknown_scheme_is_unsupported_transport() {
        let result = "vsock:3:1234".parse::<MigrationUri>();
        assert_eq!(result, Err(CoreError::UnsupportedTransport { kind: "vsock".to_owned() }));
    }

    #[test]
    fn parse_tcp_with_bracketed_ipv6() {
        let uri: MigrationUri = match "tcp:[::1]:4000".parse() {
            Ok(u) => u,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(uri, MigrationUri::Tcp { host: "[::1]".to_owned(), port: 4000 });
    }

    #[test]
    fn parse_exec_keeps_colons_in_command() {
        let uri: MigrationUri = match "exec:socat - TCP:localhost:4444".parse() {
            Ok(u) => u,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(uri.transport(), Transport::Exec);
        assert_eq!(uri.to_string(), "exec:socat - TCP:localhost:4444");
    }

    #[test]
    fn serde_uses_wire_string() {
        let uri = MigrationUri::Tcp { host: "localhost".to_owned(), port: 45321 };
        let json = serde_json::to_string(&uri).unwrap_or_default();
        assert_eq!(json, "\"tcp:localhost:45321\"");
        let back: Result<MigrationUri, _> = serde_json::from_str(&json);
        assert_eq!(back.ok(), Some(uri));
    }

    proptest::proptest! {
        #[test]
        fn proptest_tcp_uri_roundtrips_through_parse(
            host in "[a-z][a-z0-9-]{0,20}",
            port in proptest::prelude::any::<u16>(),
        ) {
            let params = UriParams::new().host(host.clone()).port(port);
            let built = build_uri(Transport::Tcp, &params);
            proptest::prop_assert!(built.is_ok());
            let rendered = built.map(|u| u.to_string()).unwrap_or_default();
            proptest::prop_assert_eq!(&rendered, &format!("tcp:{host}:{port}"));
            let reparsed: Result<MigrationUri, _> = rendered.parse();
            proptest::prop_assert_eq!(
                reparsed.ok(),
                Some(MigrationUri::Tcp { host, port })
            );
        }

        #[test]
        fn proptest_build_uri_is_deterministic(port in proptest::prelude::any::<u16>()) {
            let params = UriParams::new().host("localhost").port(port);
            proptest::prop_assert_eq!(
                build_uri(Transport::Tcp, &params),
                build_uri(Transport::Tcp, &params)
            );
        }
    }
}
