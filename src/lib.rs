//! Server discovery and monitoring core for a MongoDB client driver.
//!
//! This crate implements the topology manager: the subsystem that turns a stream of
//! per-server `hello` probe results into a continuously updated view of a deployment's
//! shape (standalone, replica set, or sharded cluster) and keeps a connection pool alive per
//! admitted server.
//!
//! The pieces that plug into it from the rest of a driver — the wire protocol codec, the
//! connection pool's internals, authentication, server selection — are abstracted behind the
//! [`sdam::monitor::Prober`], [`pool::PoolFactory`], and [`event::EventSink`] traits so this
//! crate can be developed and tested in isolation.

pub mod address;
pub mod error;
pub mod event;
pub mod hello;
pub mod manager;
pub mod options;
pub mod pool;
pub(crate) mod runtime;
pub mod sdam;

/// Replica set member tags, as reported in a `hello` response and matched against a read
/// preference's tag sets.
pub type TagSet = std::collections::HashMap<String, String>;

pub use crate::{
    address::ServerAddress,
    error::{Error, ErrorKind, Result},
    event::{EventSink, SdamEvent},
    manager::TopologyManager,
    options::TopologyOptions,
    pool::{Pool, PoolFactory},
    sdam::monitor::{ObservationSink, Prober},
};
