use std::time::Duration;

use crate::{
    address::ServerAddress, sdam::description::server::ServerDescription, TagSet,
};

/// A read-only view over a [`ServerDescription`], handed to callers of
/// `TopologyManager::topology` instead of the description itself so the internal
/// representation can evolve without breaking callers.
pub struct ServerInfo<'a> {
    description: &'a ServerDescription,
}

impl<'a> ServerInfo<'a> {
    pub(crate) fn new(description: &'a ServerDescription) -> Self {
        Self { description }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.description.address
    }

    pub fn server_type(&self) -> crate::sdam::description::server::ServerType {
        self.description.server_type
    }

    pub fn average_round_trip_time(&self) -> Option<Duration> {
        self.description.average_round_trip_time
    }

    pub fn last_update_time(&self) -> Option<bson::DateTime> {
        self.description.last_update_time
    }

    pub fn max_wire_version(&self) -> Option<i32> {
        self.description.max_wire_version()
    }

    pub fn set_name(&self) -> Option<&str> {
        self.description.set_name()
    }

    pub fn set_version(&self) -> Option<i32> {
        self.description.set_version()
    }

    pub fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        self.description.matches_tag_set(tag_set)
    }
}
