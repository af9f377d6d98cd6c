use std::time::Duration;

use crate::{
    address::ServerAddress,
    error::{Error, Result},
    sdam::description::topology::TopologyType,
};

const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);
const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);

/// Options controlling how a [`crate::manager::TopologyManager`] discovers and monitors a
/// deployment.
///
/// Mirrors the shape of the driver's own `ClientOptions`, trimmed to the fields the topology
/// manager itself consumes; everything related to authentication, TLS, and command execution
/// lives one layer up, outside this crate.
#[derive(Clone, Debug)]
pub struct TopologyOptions {
    /// The database the caller intends to operate against. Required so that configuration
    /// errors can be raised before any monitor or pool is started.
    pub database: String,

    /// The initial set of addresses to probe. Defaults to `["localhost:27017"]`.
    pub seeds: Vec<ServerAddress>,

    /// A hint about the initial topology type. Defaults to `Unknown`, meaning the first
    /// observation determines it.
    pub initial_type: TopologyType,

    /// The expected replica set name, if connecting to a known replica set.
    pub set_name: Option<String>,

    /// How often each monitor probes its server absent a forced check.
    pub heartbeat_frequency: Duration,

    /// Passed through to the topology description for the selection layer's use; this crate
    /// does not interpret it.
    pub local_threshold: Duration,

    /// How long a monitor will wait for a single probe to complete.
    pub connect_timeout: Duration,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            database: String::new(),
            seeds: vec![ServerAddress::new("localhost", None)],
            initial_type: TopologyType::Unknown,
            set_name: None,
            heartbeat_frequency: DEFAULT_HEARTBEAT_FREQUENCY,
            local_threshold: DEFAULT_LOCAL_THRESHOLD,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl TopologyOptions {
    /// Validates the combination of options, returning the exact configuration error named by
    /// the violated rule. Called by `TopologyManager::start` before any monitor or pool is
    /// spawned, so a rejected configuration never leaks resources.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(Error::invalid_argument(
                "TopologyOptions.database must be set (MissingDatabase)",
            ));
        }

        if self.initial_type == TopologyType::Single && self.seeds.len() > 1 {
            return Err(Error::invalid_argument(format!(
                "a direct (Single) topology accepts exactly one seed, got {} \
                 (SingleTopologyMultipleHosts)",
                self.seeds.len()
            )));
        }

        if self.set_name.is_some()
            && !matches!(
                self.initial_type,
                TopologyType::ReplicaSetNoPrimary | TopologyType::Single | TopologyType::Unknown
            )
        {
            return Err(Error::invalid_argument(format!(
                "set_name is only valid with an Unknown, Single, or ReplicaSetNoPrimary initial \
                 topology, got {:?} (SetNameBadTopology)",
                self.initial_type
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_single_with_multiple_seeds() {
        let opts = TopologyOptions {
            database: "test".into(),
            seeds: vec![
                ServerAddress::new("h1", None),
                ServerAddress::new("h2", None),
            ],
            initial_type: TopologyType::Single,
            ..Default::default()
        };
        let err = opts.validate().unwrap_err();
        assert!(err.to_string().contains("SingleTopologyMultipleHosts"));
    }

    #[test]
    fn rejects_set_name_with_sharded_hint() {
        let opts = TopologyOptions {
            database: "test".into(),
            set_name: Some("rs0".into()),
            initial_type: TopologyType::Sharded,
            ..Default::default()
        };
        let err = opts.validate().unwrap_err();
        assert!(err.to_string().contains("SetNameBadTopology"));
    }

    #[test]
    fn rejects_missing_database() {
        let opts = TopologyOptions {
            database: String::new(),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn accepts_valid_replica_set_options() {
        let opts = TopologyOptions {
            database: "test".into(),
            set_name: Some("rs0".into()),
            initial_type: TopologyType::ReplicaSetNoPrimary,
            ..Default::default()
        };
        assert!(opts.validate().is_ok());
    }
}
