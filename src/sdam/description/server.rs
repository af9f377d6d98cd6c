use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    address::ServerAddress,
    error::Error,
    hello::{HelloCommandResponse, HelloReply},
    TagSet,
};

const DRIVER_MIN_DB_VERSION: &str = "4.0";
const DRIVER_MIN_WIRE_VERSION: i32 = 7;
const DRIVER_MAX_WIRE_VERSION: i32 = 25;

/// The possible types of server a probe can classify a deployment member as.
#[derive(Debug, Deserialize, Clone, Copy, Eq, PartialEq, Serialize, Default)]
#[non_exhaustive]
pub enum ServerType {
    /// A single, non-replica-set mongod.
    Standalone,

    /// A router used in sharded deployments.
    Mongos,

    /// The primary node in a replica set.
    #[serde(rename = "RSPrimary")]
    RsPrimary,

    /// A secondary node in a replica set.
    #[serde(rename = "RSSecondary")]
    RsSecondary,

    /// A non-data-bearing node that can participate in elections.
    #[serde(rename = "RSArbiter")]
    RsArbiter,

    /// A hidden, starting up, or recovering replica set member.
    #[serde(rename = "RSOther")]
    RsOther,

    /// A member of an uninitialized replica set, or one removed from its config.
    #[serde(rename = "RSGhost")]
    RsGhost,

    /// A server the manager hasn't yet probed, or can't currently reach.
    #[serde(alias = "PossiblePrimary")]
    #[default]
    Unknown,
}

/// An immutable snapshot of the most recently observed state of one server.
///
/// Two descriptions compare equal per the SDAM equality rule: round-trip time and the
/// observation timestamp are excluded, since events fire only on semantic change (see
/// `hello_command_eq`).
#[derive(Debug, Clone, Serialize)]
pub struct ServerDescription {
    pub address: ServerAddress,
    pub server_type: ServerType,
    pub last_update_time: Option<bson::DateTime>,
    pub average_round_trip_time: Option<Duration>,

    /// Holds either the most recent successful hello reply, `None` if the server has not yet
    /// been probed, or the error from the most recent failed probe. A `Result` rather than two
    /// separate optional fields rules out the invalid state of having both at once.
    #[serde(serialize_with = "serialize_reply_result")]
    pub reply: Result<Option<HelloReply>, Error>,
}

fn serialize_reply_result<S>(
    reply: &Result<Option<HelloReply>, Error>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match reply {
        Ok(_) => serializer.serialize_none(),
        Err(e) => serializer.serialize_str(&e.to_string()),
    }
}

fn hello_command_eq(a: &HelloCommandResponse, b: &HelloCommandResponse) -> bool {
    a.server_type() == b.server_type()
        && a.min_wire_version == b.min_wire_version
        && a.max_wire_version == b.max_wire_version
        && a.me == b.me
        && a.hosts == b.hosts
        && a.passives == b.passives
        && a.arbiters == b.arbiters
        && a.tags == b.tags
        && a.set_name == b.set_name
        && a.set_version == b.set_version
        && a.election_id == b.election_id
        && a.primary == b.primary
}

impl PartialEq for ServerDescription {
    fn eq(&self, other: &Self) -> bool {
        if self.address != other.address || self.server_type != other.server_type {
            return false;
        }

        match (self.reply.as_ref(), other.reply.as_ref()) {
            (Ok(a), Ok(b)) => match (a.as_ref(), b.as_ref()) {
                (Some(a), Some(b)) => hello_command_eq(&a.command_response, &b.command_response),
                (None, None) => true,
                _ => false,
            },
            (Err(a), Err(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl ServerDescription {
    /// Builds the initial, unprobed description for a newly admitted address.
    pub fn new(address: ServerAddress) -> Self {
        Self {
            address,
            server_type: ServerType::default(),
            last_update_time: None,
            average_round_trip_time: None,
            reply: Ok(None),
        }
    }

    /// Builds a description from a successful probe, blending `rtt_sample` into
    /// `previous_rtt` via an exponentially weighted moving average (the first sample for a
    /// server seeds the average directly rather than being blended against nothing).
    pub fn from_hello_reply(
        address: ServerAddress,
        mut reply: HelloReply,
        rtt_sample: Duration,
        previous_rtt: Option<Duration>,
    ) -> Self {
        const ALPHA: f64 = 0.2;

        let average_round_trip_time = Some(match previous_rtt {
            Some(prev) => {
                let blended = ALPHA * rtt_sample.as_secs_f64() + (1.0 - ALPHA) * prev.as_secs_f64();
                Duration::from_secs_f64(blended.max(0.0))
            }
            None => rtt_sample,
        });

        let server_type = reply.command_response.server_type();

        if let Some(ref mut hosts) = reply.command_response.hosts {
            for host in hosts.iter_mut() {
                *host = host.to_lowercase();
            }
        }
        if let Some(ref mut passives) = reply.command_response.passives {
            for host in passives.iter_mut() {
                *host = host.to_lowercase();
            }
        }
        if let Some(ref mut arbiters) = reply.command_response.arbiters {
            for host in arbiters.iter_mut() {
                *host = host.to_lowercase();
            }
        }
        if let Some(ref mut me) = reply.command_response.me {
            *me = me.to_lowercase();
        }

        Self {
            address,
            server_type,
            last_update_time: Some(bson::DateTime::now()),
            average_round_trip_time,
            reply: Ok(Some(reply)),
        }
    }

    /// Builds a description from a failed probe. The description's type is always `Unknown`.
    pub fn from_error(address: ServerAddress, error: Error) -> Self {
        Self {
            address,
            server_type: ServerType::Unknown,
            last_update_time: Some(bson::DateTime::now()),
            average_round_trip_time: None,
            reply: Err(error),
        }
    }

    pub(crate) fn is_available(&self) -> bool {
        !matches!(self.server_type, ServerType::Unknown)
    }

    /// Produces the human-readable compatibility error for this server, if its wire version
    /// range does not overlap the driver's supported range.
    pub(crate) fn compatibility_error_message(&self) -> Option<String> {
        let Ok(Some(ref reply)) = self.reply else {
            return None;
        };

        let min_wire_version = reply.command_response.min_wire_version.unwrap_or(0);
        if min_wire_version > DRIVER_MAX_WIRE_VERSION {
            return Some(format!(
                "Server at {} requires wire version {}, but this driver only supports up to {}",
                self.address, min_wire_version, DRIVER_MAX_WIRE_VERSION,
            ));
        }

        let max_wire_version = reply.command_response.max_wire_version.unwrap_or(0);
        if max_wire_version < DRIVER_MIN_WIRE_VERSION {
            return Some(format!(
                "Server at {} reports wire version {}, but this driver requires at least {} \
                 (MongoDB {}+)",
                self.address, max_wire_version, DRIVER_MIN_WIRE_VERSION, DRIVER_MIN_DB_VERSION,
            ));
        }

        None
    }

    pub(crate) fn set_name(&self) -> Option<&str> {
        self.reply
            .as_ref()
            .ok()?
            .as_ref()?
            .command_response
            .set_name
            .as_deref()
    }

    pub(crate) fn known_hosts(&self) -> Vec<ServerAddress> {
        let Ok(Some(ref reply)) = self.reply else {
            return Vec::new();
        };

        let response = &reply.command_response;
        response
            .hosts
            .iter()
            .flatten()
            .chain(response.passives.iter().flatten())
            .chain(response.arbiters.iter().flatten())
            .filter_map(|s| ServerAddress::parse(s).ok())
            .collect()
    }

    /// True if the server disowns the address we used to reach it (its `me` field names a
    /// different address), meaning it should be removed rather than tracked under our key.
    pub(crate) fn invalid_me(&self) -> bool {
        match self.reply {
            Ok(Some(ref reply)) => match reply.command_response.me {
                Some(ref me) => ServerAddress::parse(me).ok().as_ref() != Some(&self.address),
                None => false,
            },
            _ => false,
        }
    }

    pub(crate) fn set_version(&self) -> Option<i32> {
        self.reply
            .as_ref()
            .ok()?
            .as_ref()?
            .command_response
            .set_version
    }

    pub(crate) fn election_id(&self) -> Option<bson::oid::ObjectId> {
        self.reply
            .as_ref()
            .ok()?
            .as_ref()?
            .command_response
            .election_id
    }

    pub(crate) fn max_wire_version(&self) -> Option<i32> {
        self.reply
            .as_ref()
            .ok()?
            .as_ref()?
            .command_response
            .max_wire_version
    }

    pub(crate) fn last_write_date(&self) -> Option<bson::DateTime> {
        self.reply
            .as_ref()
            .ok()?
            .as_ref()?
            .command_response
            .last_write
            .as_ref()
            .map(|w| w.last_write_date)
    }

    pub fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        let Ok(Some(ref reply)) = self.reply else {
            return false;
        };
        let Some(ref server_tags) = reply.command_response.tags else {
            return false;
        };
        tag_set
            .iter()
            .all(|(key, val)| server_tags.get(key) == Some(val))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hello::HelloCommandResponse;

    fn addr(s: &str) -> ServerAddress {
        ServerAddress::parse(s).unwrap()
    }

    fn reply(response: HelloCommandResponse) -> HelloReply {
        HelloReply {
            server_address: addr("h1:27017"),
            command_response: response,
        }
    }

    #[test]
    fn equality_ignores_rtt_and_timestamp() {
        let a = ServerDescription::from_hello_reply(
            addr("h1:27017"),
            reply(HelloCommandResponse {
                is_writable_primary: Some(true),
                ..Default::default()
            }),
            Duration::from_millis(5),
            None,
        );
        let b = ServerDescription::from_hello_reply(
            addr("h1:27017"),
            reply(HelloCommandResponse {
                is_writable_primary: Some(true),
                ..Default::default()
            }),
            Duration::from_millis(500),
            None,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn first_rtt_sample_seeds_average() {
        let sd = ServerDescription::from_hello_reply(
            addr("h1:27017"),
            reply(HelloCommandResponse::default()),
            Duration::from_millis(42),
            None,
        );
        assert_eq!(sd.average_round_trip_time, Some(Duration::from_millis(42)));
    }

    #[test]
    fn invalid_me_detects_rename() {
        let sd = ServerDescription::from_hello_reply(
            addr("h1:27017"),
            reply(HelloCommandResponse {
                me: Some("h1-renamed:27017".into()),
                ..Default::default()
            }),
            Duration::from_millis(1),
            None,
        );
        assert!(sd.invalid_me());
    }

    #[test]
    fn compatibility_error_when_server_too_new() {
        let sd = ServerDescription::from_hello_reply(
            addr("h1:27017"),
            reply(HelloCommandResponse {
                min_wire_version: Some(DRIVER_MAX_WIRE_VERSION + 1),
                max_wire_version: Some(DRIVER_MAX_WIRE_VERSION + 5),
                ..Default::default()
            }),
            Duration::from_millis(1),
            None,
        );
        assert!(sd.compatibility_error_message().is_some());
    }
}
