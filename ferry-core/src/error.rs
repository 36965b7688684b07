/// Errors produced by the `ferry-core` crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The transport kind is not one of `tcp`, `unix`, `exec`, `fd`, `rdma`.
    #[error("unsupported transport '{kind}'")]
    UnsupportedTransport { kind: String },

    /// A migration URI could not be built from the given parameters.
    #[error("cannot build {transport} URI: {reason}")]
    TransportConstruction { transport: String, reason: String },

    /// A migration URI string could not be parsed.
    #[error("invalid migration URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
}
