use crate::{address::ServerAddress, error::Result};

/// Options needed to open a connection pool for one server.
///
/// This is intentionally a thin pass-through of the fields a real pool implementation would
/// need (database name, address, connect timeout); the pool's internal checkout/return logic,
/// TLS, and authentication are external collaborators, not part of this crate.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    pub database: String,
    pub address: ServerAddress,
    pub connect_timeout: std::time::Duration,
}

/// An opaque handle to a connection pool for a single server, as returned by a
/// [`PoolFactory`]. The topology manager never inspects a pool's contents; it only opens,
/// closes, and hands out handles by address.
pub trait Pool: Send + Sync {
    /// Checks out a connection, or fails if the pool has been closed or has no available
    /// connections within its own internal timeout.
    fn borrow(&self) -> Result<()>;
}

/// Opens and closes connection pools on behalf of the topology manager's reconciliation step.
///
/// The manager treats a factory opaquely: `open` is called once per newly admitted address,
/// `close` once per address removed from the topology (including at shutdown).
pub trait PoolFactory: Send + Sync {
    fn open(&self, options: &PoolOptions) -> Result<std::sync::Arc<dyn Pool>>;

    fn close(&self, pool: &dyn Pool);
}
