use std::collections::{HashMap, HashSet};
use std::time::Duration;

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::{
    address::ServerAddress,
    options::TopologyOptions,
    sdam::description::server::{ServerDescription, ServerType},
};

/// The possible types for a topology, per the SDAM state machine.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize, Default, derive_more::Display,
)]
#[non_exhaustive]
pub enum TopologyType {
    /// A single mongod server, addressed directly.
    Single,

    /// A replica set with no member currently known to be primary.
    ReplicaSetNoPrimary,

    /// A replica set with a known primary.
    ReplicaSetWithPrimary,

    /// A sharded cluster, addressed through one or more mongos routers.
    Sharded,

    /// A topology whose type has not yet been determined from any observation.
    #[default]
    Unknown,
}

/// An immutable snapshot of the most recently known state of the whole deployment.
///
/// Produced exclusively by [`TopologyDescription::new`] and [`update`]; there is no public
/// mutator, so every version ever observed by a caller remains valid to hold onto and compare
/// against later ones.
#[derive(Debug, Clone, Serialize)]
#[non_exhaustive]
pub struct TopologyDescription {
    pub topology_type: TopologyType,
    pub set_name: Option<String>,
    pub max_set_version: Option<i32>,
    pub max_election_id: Option<ObjectId>,
    pub compatibility_error: Option<String>,
    pub local_threshold: Duration,
    pub servers: HashMap<ServerAddress, ServerDescription>,
}

impl PartialEq for TopologyDescription {
    fn eq(&self, other: &Self) -> bool {
        self.compatibility_error == other.compatibility_error
            && self.servers == other.servers
            && self.topology_type == other.topology_type
    }
}

/// An event produced by a single call to [`update`].
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// A server already present both before and after the update changed semantically.
    ServerChanged {
        address: ServerAddress,
        previous: ServerDescription,
        new: ServerDescription,
    },
    /// Asks the manager to wake the named server's monitor immediately rather than waiting
    /// for its next scheduled tick.
    ForceCheck(ServerAddress),
}

impl TopologyDescription {
    /// Builds the initial description from a manager's validated options: one `Unknown`
    /// server per seed, topology type taken from `options.initial_type`.
    pub fn new(options: &TopologyOptions) -> Self {
        let servers = options
            .seeds
            .iter()
            .map(|addr| (addr.clone(), ServerDescription::new(addr.clone())))
            .collect();

        Self {
            topology_type: options.initial_type,
            set_name: options.set_name.clone(),
            max_set_version: None,
            max_election_id: None,
            compatibility_error: None,
            local_threshold: options.local_threshold,
            servers,
        }
    }

    pub fn server_addresses(&self) -> impl Iterator<Item = &ServerAddress> {
        self.servers.keys()
    }

    pub fn get_server_description(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    /// True if some member is reachable for writes: a standalone, a primary, or any mongos in
    /// a sharded cluster.
    pub fn has_writable_server(&self) -> bool {
        match self.topology_type {
            TopologyType::Single => self.servers.values().any(ServerDescription::is_available),
            TopologyType::ReplicaSetWithPrimary => self
                .servers
                .values()
                .any(|s| s.server_type == ServerType::RsPrimary),
            TopologyType::Sharded => self
                .servers
                .values()
                .any(|s| s.server_type == ServerType::Mongos),
            TopologyType::ReplicaSetNoPrimary | TopologyType::Unknown => false,
        }
    }

    pub fn has_readable_server(&self) -> bool {
        match self.topology_type {
            TopologyType::Unknown => false,
            _ => self.servers.values().any(ServerDescription::is_available),
        }
    }

    /// Returns the diff between this description and `other`, or `None` if they're equal
    /// under [`PartialEq`]. Used by the manager to decide whether a `TopologyDescriptionChanged`
    /// event is warranted and to drive monitor/pool reconciliation.
    pub fn diff<'a>(&'a self, other: &'a TopologyDescription) -> Option<TopologyDescriptionDiff<'a>> {
        if self == other {
            return None;
        }

        let addresses: HashSet<&ServerAddress> = self.server_addresses().collect();
        let other_addresses: HashSet<&ServerAddress> = other.server_addresses().collect();

        let changed_servers = self.servers.iter().filter_map(|(address, description)| {
            match other.servers.get(address) {
                Some(other_description) if description != other_description => {
                    Some((address, (description, other_description)))
                }
                _ => None,
            }
        });

        Some(TopologyDescriptionDiff {
            removed_addresses: addresses.difference(&other_addresses).cloned().collect(),
            added_addresses: other_addresses.difference(&addresses).cloned().collect(),
            changed_servers: changed_servers.collect(),
        })
    }

    fn check_compatibility(&mut self) {
        self.compatibility_error = None;
        for server in self.servers.values() {
            if let Some(message) = server.compatibility_error_message() {
                self.compatibility_error = Some(message);
                return;
            }
        }
    }

    fn record_primary_state(&mut self) {
        self.topology_type = if self
            .servers
            .values()
            .any(|s| s.server_type == ServerType::RsPrimary)
        {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }

    fn add_new_servers(&mut self, addresses: impl IntoIterator<Item = ServerAddress>) {
        for address in addresses {
            self.servers
                .entry(address.clone())
                .or_insert_with(|| ServerDescription::new(address));
        }
    }

    fn update_unknown_topology(
        &mut self,
        sd: &ServerDescription,
        seed_count: usize,
        force: &mut Vec<ServerAddress>,
    ) {
        match sd.server_type {
            ServerType::Unknown | ServerType::RsGhost => {}
            ServerType::Standalone => {
                if seed_count == 1 {
                    self.topology_type = TopologyType::Single;
                } else {
                    self.servers.remove(&sd.address);
                }
            }
            ServerType::Mongos => self.topology_type = TopologyType::Sharded,
            ServerType::RsPrimary => {
                self.topology_type = TopologyType::ReplicaSetWithPrimary;
                self.update_rs_from_primary(sd, force);
            }
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.topology_type = TopologyType::ReplicaSetNoPrimary;
                self.update_rs_without_primary(sd);
            }
        }
    }

    fn update_sharded_topology(&mut self, sd: &ServerDescription) {
        match sd.server_type {
            ServerType::Unknown | ServerType::Mongos => {}
            _ => {
                self.servers.remove(&sd.address);
            }
        }
    }

    fn update_rs_no_primary_topology(&mut self, sd: &ServerDescription, force: &mut Vec<ServerAddress>) {
        match sd.server_type {
            ServerType::Unknown | ServerType::RsGhost => {}
            ServerType::Standalone | ServerType::Mongos => {
                self.servers.remove(&sd.address);
            }
            ServerType::RsPrimary => {
                self.topology_type = TopologyType::ReplicaSetWithPrimary;
                self.update_rs_from_primary(sd, force);
            }
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_rs_without_primary(sd);
            }
        }
    }

    fn update_rs_with_primary_topology(&mut self, sd: &ServerDescription, force: &mut Vec<ServerAddress>) {
        match sd.server_type {
            ServerType::Unknown | ServerType::RsGhost => self.record_primary_state(),
            ServerType::Standalone | ServerType::Mongos => {
                self.servers.remove(&sd.address);
                self.record_primary_state();
            }
            ServerType::RsPrimary => self.update_rs_from_primary(sd, force),
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_rs_with_primary_from_member(sd);
            }
        }
    }

    fn update_rs_without_primary(&mut self, sd: &ServerDescription) {
        if self.set_name.is_none() {
            self.set_name = sd.set_name().map(str::to_owned);
        } else if self.set_name.as_deref() != sd.set_name() {
            self.servers.remove(&sd.address);
            return;
        }

        self.add_new_servers(sd.known_hosts());

        if sd.invalid_me() {
            self.servers.remove(&sd.address);
        }
    }

    fn update_rs_with_primary_from_member(&mut self, sd: &ServerDescription) {
        if self.set_name.as_deref() != sd.set_name() {
            self.servers.remove(&sd.address);
            self.record_primary_state();
            return;
        }

        if sd.invalid_me() {
            self.servers.remove(&sd.address);
            self.record_primary_state();
        }
    }

    /// Implements the "RSPrimary observed" branch of the transition table: stale-primary
    /// rejection via `(setVersion, electionId)`, watermark advancement, demotion of any other
    /// currently-tracked primary, and host-list reconciliation.
    fn update_rs_from_primary(&mut self, sd: &ServerDescription, force: &mut Vec<ServerAddress>) {
        if self.set_name.is_none() {
            self.set_name = sd.set_name().map(str::to_owned);
        } else if self.set_name.as_deref() != sd.set_name() {
            self.servers.remove(&sd.address);
            self.record_primary_state();
            return;
        }

        if let (Some(server_set_version), Some(server_election_id)) =
            (sd.set_version(), sd.election_id())
        {
            if let (Some(max_set_version), Some(max_election_id)) =
                (self.max_set_version, self.max_election_id)
            {
                if (max_set_version, max_election_id) > (server_set_version, server_election_id) {
                    // A stale primary: coerce back to Unknown and ask its monitor to recheck
                    // promptly rather than waiting a full heartbeat interval.
                    self.servers
                        .insert(sd.address.clone(), ServerDescription::new(sd.address.clone()));
                    self.record_primary_state();
                    force.push(sd.address.clone());
                    return;
                }
            }
            self.max_election_id = Some(server_election_id);
        }

        if let Some(server_set_version) = sd.set_version() {
            if self
                .max_set_version
                .is_none_or(|max| server_set_version > max)
            {
                self.max_set_version = Some(server_set_version);
            }
        }

        let addresses: Vec<ServerAddress> = self.servers.keys().cloned().collect();
        for address in &addresses {
            if *address == sd.address {
                continue;
            }
            if let Some(existing) = self.servers.get(address) {
                if existing.server_type == ServerType::RsPrimary {
                    self.servers
                        .insert(address.clone(), ServerDescription::new(address.clone()));
                    force.push(address.clone());
                }
            }
        }

        let known_hosts = sd.known_hosts();
        self.add_new_servers(known_hosts.clone());

        let known: HashSet<&ServerAddress> = known_hosts.iter().collect();
        for address in addresses {
            if address != sd.address && !known.contains(&address) {
                self.servers.remove(&address);
            }
        }

        self.record_primary_state();
    }
}

/// Applies a single observation to `current`, returning the resulting description and the
/// events that resulted. Pure: `current` is left untouched, and the same inputs always
/// produce the same outputs.
pub fn update(
    current: &TopologyDescription,
    observed: ServerDescription,
    seed_count: usize,
) -> (TopologyDescription, Vec<UpdateEvent>) {
    let mut next = current.clone();

    // Rule 1: ignore observations about servers the topology no longer (or never did) admit.
    if !next.servers.contains_key(&observed.address) {
        return (next, Vec::new());
    }

    let before = next.servers.clone();
    let mut force_checks: Vec<ServerAddress> = Vec::new();

    next.servers.insert(observed.address.clone(), observed.clone());

    match next.topology_type {
        TopologyType::Single => {}
        TopologyType::Unknown => {
            next.update_unknown_topology(&observed, seed_count, &mut force_checks)
        }
        TopologyType::Sharded => next.update_sharded_topology(&observed),
        TopologyType::ReplicaSetNoPrimary => {
            next.update_rs_no_primary_topology(&observed, &mut force_checks)
        }
        TopologyType::ReplicaSetWithPrimary => {
            next.update_rs_with_primary_topology(&observed, &mut force_checks)
        }
    }

    next.check_compatibility();

    let mut events = Vec::new();
    for (address, previous) in &before {
        if let Some(new) = next.servers.get(address) {
            if previous != new {
                events.push(UpdateEvent::ServerChanged {
                    address: address.clone(),
                    previous: previous.clone(),
                    new: new.clone(),
                });
            }
        }
    }

    let mut seen = HashSet::new();
    for address in force_checks {
        if seen.insert(address.clone()) {
            events.push(UpdateEvent::ForceCheck(address));
        }
    }

    (next, events)
}

/// The difference between two topology descriptions, as returned by
/// [`TopologyDescription::diff`].
#[derive(Debug)]
pub struct TopologyDescriptionDiff<'a> {
    pub removed_addresses: HashSet<&'a ServerAddress>,
    pub added_addresses: HashSet<&'a ServerAddress>,
    pub changed_servers: HashMap<&'a ServerAddress, (&'a ServerDescription, &'a ServerDescription)>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hello::{HelloCommandResponse, HelloReply};
    use std::time::Duration;

    fn addr(s: &str) -> ServerAddress {
        ServerAddress::parse(s).unwrap()
    }

    fn options(seeds: &[&str], initial_type: TopologyType, set_name: Option<&str>) -> TopologyOptions {
        TopologyOptions {
            database: "test".into(),
            seeds: seeds.iter().map(|s| addr(s)).collect(),
            initial_type,
            set_name: set_name.map(str::to_owned),
            ..Default::default()
        }
    }

    fn hello(response: HelloCommandResponse, address: &str) -> ServerDescription {
        ServerDescription::from_hello_reply(
            addr(address),
            HelloReply {
                server_address: addr(address),
                command_response: response,
            },
            Duration::from_millis(1),
            None,
        )
    }

    #[test]
    fn standalone_discovery_from_single_seed() {
        let current = TopologyDescription::new(&options(&["h1:27017"], TopologyType::Unknown, None));
        let observed = hello(
            HelloCommandResponse {
                is_writable_primary: Some(true),
                ..Default::default()
            },
            "h1:27017",
        );

        let (next, events) = update(&current, observed, 1);

        assert_eq!(next.topology_type, TopologyType::Single);
        assert_eq!(
            next.servers.get(&addr("h1:27017")).unwrap().server_type,
            ServerType::Standalone
        );
        assert!(events
            .iter()
            .any(|e| matches!(e, UpdateEvent::ServerChanged { .. })));
    }

    #[test]
    fn replica_set_discovery_from_one_seed() {
        let current = TopologyDescription::new(&options(&["h1:27017"], TopologyType::Unknown, None));
        let observed = hello(
            HelloCommandResponse {
                is_writable_primary: Some(true),
                set_name: Some("rs0".into()),
                set_version: Some(1),
                election_id: Some(ObjectId::new()),
                hosts: Some(vec![
                    "h1:27017".into(),
                    "h2:27017".into(),
                    "h3:27017".into(),
                ]),
                ..Default::default()
            },
            "h1:27017",
        );

        let (next, _) = update(&current, observed, 1);

        assert_eq!(next.topology_type, TopologyType::ReplicaSetWithPrimary);
        assert_eq!(next.servers.len(), 3);
        assert_eq!(next.max_set_version, Some(1));
    }

    #[test]
    fn stale_primary_is_rejected_and_force_checked() {
        let mut current = TopologyDescription::new(&options(
            &["h1:27017", "h2:27017"],
            TopologyType::ReplicaSetNoPrimary,
            Some("rs0"),
        ));
        current.topology_type = TopologyType::ReplicaSetWithPrimary;
        current.max_set_version = Some(5);
        let high_election = ObjectId::new();
        current.max_election_id = Some(high_election);

        let low_election = ObjectId::new();
        let observed = hello(
            HelloCommandResponse {
                is_writable_primary: Some(true),
                set_name: Some("rs0".into()),
                set_version: Some(4),
                election_id: Some(low_election),
                hosts: Some(vec!["h1:27017".into(), "h2:27017".into()]),
                ..Default::default()
            },
            "h2:27017",
        );

        let (next, events) = update(&current, observed, 2);

        assert_eq!(
            next.servers.get(&addr("h2:27017")).unwrap().server_type,
            ServerType::Unknown
        );
        assert_eq!(next.max_set_version, Some(5));
        assert!(events
            .iter()
            .any(|e| matches!(e, UpdateEvent::ForceCheck(a) if *a == addr("h2:27017"))));
    }

    #[test]
    fn primary_failover_demotes_old_primary() {
        let mut current = TopologyDescription::new(&options(
            &["h1:27017", "h2:27017"],
            TopologyType::ReplicaSetNoPrimary,
            Some("rs0"),
        ));
        current.topology_type = TopologyType::ReplicaSetWithPrimary;
        current.max_set_version = Some(5);
        current.max_election_id = Some(ObjectId::new());
        current.servers.insert(
            addr("h1:27017"),
            hello(
                HelloCommandResponse {
                    is_writable_primary: Some(true),
                    set_name: Some("rs0".into()),
                    ..Default::default()
                },
                "h1:27017",
            ),
        );

        let new_election = ObjectId::new();
        let observed = hello(
            HelloCommandResponse {
                is_writable_primary: Some(true),
                set_name: Some("rs0".into()),
                set_version: Some(6),
                election_id: Some(new_election),
                hosts: Some(vec!["h1:27017".into(), "h2:27017".into()]),
                ..Default::default()
            },
            "h2:27017",
        );

        let (next, events) = update(&current, observed, 2);

        assert_eq!(
            next.servers.get(&addr("h2:27017")).unwrap().server_type,
            ServerType::RsPrimary
        );
        assert_eq!(
            next.servers.get(&addr("h1:27017")).unwrap().server_type,
            ServerType::Unknown
        );
        assert_eq!(next.max_set_version, Some(6));
        assert!(events
            .iter()
            .any(|e| matches!(e, UpdateEvent::ForceCheck(a) if *a == addr("h1:27017"))));
    }

    #[test]
    fn member_disownership_removes_server() {
        let current = TopologyDescription::new(&options(
            &["h1:27017", "h3:27017"],
            TopologyType::ReplicaSetNoPrimary,
            Some("rs0"),
        ));
        let observed = hello(
            HelloCommandResponse {
                secondary: Some(true),
                set_name: Some("rs0".into()),
                me: Some("h3-renamed:27017".into()),
                ..Default::default()
            },
            "h3:27017",
        );

        let (next, _) = update(&current, observed, 2);

        assert!(!next.servers.contains_key(&addr("h3:27017")));
    }

    #[test]
    fn stale_observation_for_removed_server_is_ignored() {
        let current = TopologyDescription::new(&options(&["h1:27017"], TopologyType::Unknown, None));
        let observed = hello(HelloCommandResponse::default(), "ghost:27017");

        let (next, events) = update(&current, observed, 1);

        assert_eq!(next, current);
        assert!(events.is_empty());
    }
}
