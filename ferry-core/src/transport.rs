use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The channel a migration stream travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Transport {
    /// TCP connection to `host:port`.
    Tcp,
    /// UNIX domain socket at an absolute path.
    Unix,
    /// Shell command whose stdin/stdout carry the stream.
    Exec,
    /// Pre-opened file descriptor handed to the instance.
    Fd,
    /// RDMA connection to `ip:port`.
    Rdma,
}

impl Transport {
    /// Every transport, in the order the standard scenarios run them.
    pub const ALL: [Transport; 5] = [Self::Tcp, Self::Unix, Self::Exec, Self::Fd, Self::Rdma];

    /// The URI scheme prefix, without the trailing colon.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Unix => "unix",
            Self::Exec => "exec",
            Self::Fd => "fd",
            Self::Rdma => "rdma",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Transport {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.scheme() == s)
            .ok_or_else(|| CoreError::UnsupportedTransport { kind: s.to_owned() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_parses_every_scheme() {
        for transport in Transport::ALL {
            assert_eq!(transport.scheme().parse::<Transport>(), Ok(transport));
        }
    }

    #[test]
    fn transport_unknown_kind_is_unsupported() {
        assert_eq!(
            "vsock".parse::<Transport>(),
            Err(CoreError::UnsupportedTransport { kind: "vsock".to_owned() })
        );
    }

    #[test]
    fn transport_parse_is_case_sensitive() {
        assert!("TCP".parse::<Transport>().is_err());
    }
}
