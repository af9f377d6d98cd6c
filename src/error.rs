use std::fmt;

/// The result type returned by the topology manager's public operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A cheaply-clonable error, so that a probe failure can be stored directly in a
/// [`crate::sdam::description::server::ServerDescription`] and handed to every event
/// subscriber without re-allocating.
#[derive(Clone, Debug)]
pub struct Error {
    kind: Box<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument {
            message: message.into(),
        })
    }

    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network {
            message: message.into(),
        })
    }

    pub(crate) fn timeout() -> Self {
        Self::new(ErrorKind::Timeout)
    }

    pub(crate) fn pool_open_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PoolOpenFailed {
            message: message.into(),
        })
    }

    pub(crate) fn shutting_down() -> Self {
        Self::new(ErrorKind::ShuttingDown)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal {
            message: message.into(),
        })
    }

    /// Whether this error resulted from a transport-level failure, as opposed to the server
    /// rejecting the probe outright (authentication, protocol mismatch).
    pub(crate) fn is_network_error(&self) -> bool {
        matches!(*self.kind, ErrorKind::Network { .. } | ErrorKind::Timeout)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.kind)
    }
}

/// The specific kind of error produced by the topology manager.
///
/// Configuration errors (`InvalidArgument`) are returned synchronously from
/// [`crate::manager::TopologyManager::start`] before any resource is allocated. Probe errors
/// (`Network`, `Timeout`, `Authentication`, `WireProtocol`) are never surfaced to a caller;
/// they are absorbed into a server description's `error` field instead.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The options supplied to `TopologyManager::start` were invalid, e.g. a direct connection
    /// with more than one seed, or a `set_name` paired with an incompatible initial topology
    /// type.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A probe could not reach the server at all.
    #[error("network error: {message}")]
    Network { message: String },

    /// A probe did not complete within the configured connect timeout.
    #[error("timed out waiting for server response")]
    Timeout,

    /// The server rejected the monitoring connection's credentials.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// The server's response could not be interpreted as a valid hello reply.
    #[error("wire protocol error: {message}")]
    WireProtocol { message: String },

    /// The connection pool for a newly admitted server could not be opened.
    #[error("failed to open connection pool: {message}")]
    PoolOpenFailed { message: String },

    /// The topology manager has already been stopped.
    #[error("topology manager is shutting down")]
    ShuttingDown,

    /// An invariant the update algorithm assumes was violated; indicates a bug.
    #[error("internal error: {message}")]
    Internal { message: String },
}
