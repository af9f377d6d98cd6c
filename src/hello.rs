use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

use crate::{address::ServerAddress, sdam::description::server::ServerType};

/// A parsed `hello`/legacy `isMaster` reply, as produced by the probe collaborator a
/// [`crate::sdam::monitor::Monitor`] delegates to.
///
/// Constructing and sending the command itself, and decoding the raw wire message into this
/// struct, belong to the wire protocol layer and are not part of this crate; `Monitor` only
/// consumes the result through the [`crate::sdam::monitor::Prober`] trait.
#[derive(Debug, Clone)]
pub struct HelloReply {
    pub server_address: ServerAddress,
    pub command_response: HelloCommandResponse,
}

/// The subset of a `hello` command response that the topology manager's state machine
/// consumes.
///
/// See the documentation [here](https://www.mongodb.com/docs/manual/reference/command/hello/)
/// for the full reply shape; fields with no bearing on server classification or replica-set
/// membership tracking are intentionally omitted.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloCommandResponse {
    /// Whether the server is writable: a primary in a replica set, a mongos, or a standalone.
    pub is_writable_primary: Option<bool>,

    #[serde(rename = "ismaster")]
    /// Legacy name for `is_writable_primary`.
    pub is_master: Option<bool>,

    /// The list of all hosts in the replica set config.
    pub hosts: Option<Vec<String>>,

    /// The list of all passives in the replica set config.
    pub passives: Option<Vec<String>>,

    /// The list of all arbiters in the replica set config.
    pub arbiters: Option<Vec<String>>,

    /// Contains `"isdbgrid"` when returned from a mongos.
    pub msg: Option<String>,

    /// The address the server believes itself to be reachable at.
    pub me: Option<String>,

    /// The current replica set config version.
    pub set_version: Option<i32>,

    /// The name of the replica set.
    pub set_name: Option<String>,

    /// Whether the server is hidden from the replica set's public topology.
    pub hidden: Option<bool>,

    /// Whether the server is a secondary.
    pub secondary: Option<bool>,

    /// Whether the server is a non-data-bearing arbiter.
    pub arbiter_only: Option<bool>,

    #[serde(rename = "isreplicaset")]
    /// Set when the server is a replica set member with an uninitialized or removed config.
    pub is_replica_set: Option<bool>,

    /// Optime and date information for the server's most recent write.
    pub last_write: Option<LastWrite>,

    /// The minimum wire protocol version the server supports.
    pub min_wire_version: Option<i32>,

    /// The maximum wire protocol version the server supports.
    pub max_wire_version: Option<i32>,

    /// User-defined replica set member tags.
    pub tags: Option<crate::TagSet>,

    /// A unique identifier for the replica set's current election.
    pub election_id: Option<ObjectId>,

    /// The address the server believes is the current primary.
    pub primary: Option<String>,
}

impl HelloCommandResponse {
    /// Infers the server's type from its reply, per the SDAM server-type classification table.
    pub(crate) fn server_type(&self) -> ServerType {
        if self.msg.as_deref() == Some("isdbgrid") {
            ServerType::Mongos
        } else if self.set_name.is_some() {
            if self.hidden == Some(true) {
                ServerType::RsOther
            } else if self.is_writable_primary == Some(true) || self.is_master == Some(true) {
                ServerType::RsPrimary
            } else if self.secondary == Some(true) {
                ServerType::RsSecondary
            } else if self.arbiter_only == Some(true) {
                ServerType::RsArbiter
            } else {
                ServerType::RsOther
            }
        } else if self.is_replica_set == Some(true) {
            ServerType::RsGhost
        } else {
            ServerType::Standalone
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastWrite {
    pub last_write_date: DateTime,
}
