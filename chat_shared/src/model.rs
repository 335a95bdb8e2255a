//! Registration table and group registry (§3).

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Online,
    Offline,
}

/// `(name, ip, port, status)` — `name` is the primary key (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub status: ClientStatus,
}

impl ClientRecord {
    /// Parses `ip`/`port` into a socket address for sending. `None` if the
    /// stored `ip` is not valid dotted-decimal IPv4 (should not happen for
    /// records this server created, but a malicious/unknown peer's
    /// self-reported metadata is not otherwise validated).
    pub fn addr(&self) -> Option<SocketAddr> {
        IpAddr::from_str(&self.ip)
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }
}

/// Mapping from `name` to endpoint record (§3).
///
/// Invariants upheld by construction:
/// - (I1) at most one record per name (`HashMap` key).
/// - (I3) a name that has ever registered keeps its record with
///   `status = offline` after de-registration/eviction; `register` must
///   reject re-registration while any record for that name exists,
///   regardless of its status (see `DESIGN.md`, Open Question).
#[derive(Debug, Default, Clone)]
pub struct RegistrationTable {
    records: HashMap<String, ClientRecord>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ClientRecord> {
        self.records.get(name)
    }

    /// Inserts a new `online` record. Caller must have already checked
    /// `contains(name)` is false (I1/I3); this does not overwrite.
    pub fn register(&mut self, name: &str, ip: &str, port: u16) {
        self.records.insert(
            name.to_string(),
            ClientRecord {
                name: name.to_string(),
                ip: ip.to_string(),
                port,
                status: ClientStatus::Online,
            },
        );
    }

    /// Marks a record `offline` in place, retaining it (I3). Returns
    /// `true` if the record existed and was changed (i.e. was online).
    pub fn mark_offline(&mut self, name: &str) -> bool {
        match self.records.get_mut(name) {
            Some(rec) if rec.status == ClientStatus::Online => {
                rec.status = ClientStatus::Offline;
                true
            }
            _ => false,
        }
    }

    /// Updates a record's advertised endpoint (used when a client's
    /// self-reported source address changes between requests).
    pub fn update_endpoint(&mut self, name: &str, ip: &str, port: u16) {
        if let Some(rec) = self.records.get_mut(name) {
            rec.ip = ip.to_string();
            rec.port = port;
        }
    }

    /// The full table as currently observed (I2), for broadcast.
    pub fn snapshot(&self) -> Vec<ClientRecord> {
        let mut records: Vec<ClientRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Replaces the table wholesale, as a client-side mirror does on
    /// every broadcast (§3, "Client-local mirror").
    pub fn replace(&mut self, records: Vec<ClientRecord>) {
        self.records = records.into_iter().map(|r| (r.name.clone(), r)).collect();
    }

    pub fn online_names(&self) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.status == ClientStatus::Online)
            .map(|r| r.name.clone())
            .collect()
    }
}

/// Mapping from `group_name` to an ordered set of member `name`s (§3).
///
/// Invariants upheld here: (G1) names are unique (`HashMap` key).
/// (G2)/(G3) — member-in-table and table-removal-cascades-to-groups — are
/// cross-cutting and enforced by the server core (`chat_server::server`),
/// which is the only place both tables are in scope together.
#[derive(Debug, Default, Clone)]
pub struct GroupRegistry {
    members: HashMap<String, Vec<String>>,
    creation_order: Vec<String>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, group: &str) -> bool {
        self.members.contains_key(group)
    }

    /// Creates an empty group. Returns `false` if it already existed
    /// (caller replies "already exists" without mutating, per §4.3).
    pub fn create(&mut self, group: &str) -> bool {
        if self.members.contains_key(group) {
            return false;
        }
        self.members.insert(group.to_string(), Vec::new());
        self.creation_order.push(group.to_string());
        true
    }

    /// Group names in creation order (§4.3 list_groups).
    pub fn group_names(&self) -> Vec<String> {
        self.creation_order.clone()
    }

    /// Adds `name` to `group`'s roster if not already present (idempotent
    /// join, §4.3). Returns `false` if the group does not exist.
    pub fn join(&mut self, group: &str, name: &str) -> bool {
        match self.members.get_mut(group) {
            Some(roster) => {
                if !roster.iter().any(|m| m == name) {
                    roster.push(name.to_string());
                }
                true
            }
            None => false,
        }
    }

    /// Removes `name` from `group`'s roster, if present.
    pub fn leave(&mut self, group: &str, name: &str) {
        if let Some(roster) = self.members.get_mut(group) {
            roster.retain(|m| m != name);
        }
    }

    /// Roster of `group` in insertion order (§4.3 list_members).
    pub fn members(&self, group: &str) -> Option<&[String]> {
        self.members.get(group).map(|v| v.as_slice())
    }

    /// Removes `name` from every group it belongs to (G3: cascades from
    /// registration-table removal).
    pub fn remove_member_everywhere(&mut self, name: &str) {
        for roster in self.members.values_mut() {
            roster.retain(|m| m != name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_dereg_then_reregister_same_tuple_is_rejected() {
        let mut table = RegistrationTable::new();
        table.register("alice", "127.0.0.1", 5555);
        assert!(table.contains("alice"));

        table.mark_offline("alice");
        assert!(table.contains("alice")); // I3: retained, not removed

        // Re-registration must be rejected by the caller because the
        // record still exists (this module only models "exists"; the
        // server handler is responsible for the rejection path).
        assert!(table.contains("alice"));
    }

    #[test]
    fn create_group_twice_is_idempotent_at_the_model_layer() {
        let mut groups = GroupRegistry::new();
        assert!(groups.create("raid"));
        assert!(!groups.create("raid"));
        assert_eq!(groups.group_names(), vec!["raid".to_string()]);
    }

    #[test]
    fn join_group_twice_does_not_duplicate_membership() {
        let mut groups = GroupRegistry::new();
        groups.create("raid");
        assert!(groups.join("raid", "alice"));
        assert!(groups.join("raid", "alice"));
        assert_eq!(groups.members("raid"), Some(&["alice".to_string()][..]));
    }

    #[test]
    fn removing_member_everywhere_clears_all_rosters() {
        let mut groups = GroupRegistry::new();
        groups.create("a");
        groups.create("b");
        groups.join("a", "alice");
        groups.join("b", "alice");
        groups.remove_member_everywhere("alice");
        assert_eq!(groups.members("a"), Some(&[][..]));
        assert_eq!(groups.members("b"), Some(&[][..]));
    }

    #[test]
    fn table_snapshot_reflects_current_state() {
        let mut table = RegistrationTable::new();
        table.register("bob", "127.0.0.1", 6000);
        let snap = table.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].status, ClientStatus::Online);
    }
}
