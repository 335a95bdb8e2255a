//! Registration/group state machine (§4.3).
//!
//! Pure and synchronous: no sockets, no async. The async driver
//! (`chat_server::server`) owns the single [`ServerCore`] instance and is
//! the "single logical mutator" §4.3/§5 require — every handler call here
//! runs to completion before the driver touches the core again.

use std::net::SocketAddr;

use chat_shared::prelude::*;
use chat_shared::frame::{CreateGroupResult, JoinGroupResult};

#[derive(Debug, Default)]
pub struct ServerCore {
    table: RegistrationTable,
    groups: GroupRegistry,
}

impl ServerCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_snapshot(&self) -> Vec<ClientRecord> {
        self.table.snapshot()
    }

    /// Endpoints of every currently-online client, for broadcast (§4.3).
    pub fn online_endpoints(&self) -> Vec<(String, SocketAddr)> {
        self.table
            .snapshot()
            .into_iter()
            .filter(|r| r.status == ClientStatus::Online)
            .filter_map(|r| r.addr().map(|addr| (r.name, addr)))
            .collect()
    }

    pub fn endpoint_of(&self, name: &str) -> Option<SocketAddr> {
        self.table.get(name).and_then(|r| r.addr())
    }

    /// (I3): rejected while any record for `name` exists under a
    /// different tuple or while offline. A retransmitted `register` from
    /// the same online endpoint (the client's `reliable_send` resending
    /// after a lost `register_ack`, §4.2) replies success with no state
    /// change instead, per the §4.3 idempotence clause and §8 invariant
    /// 6. Returns `true` if this call changed the table.
    pub fn handle_register(&mut self, name: &str, from: SocketAddr) -> (FrameBody, bool) {
        match self.table.get(name) {
            Some(existing)
                if existing.status == ClientStatus::Online
                    && existing.ip == from.ip().to_string()
                    && existing.port == from.port() =>
            {
                (
                    FrameBody::RegisterAck {
                        ok: true,
                        reason: None,
                    },
                    false,
                )
            }
            Some(_) => (
                FrameBody::RegisterAck {
                    ok: false,
                    reason: Some("exists".to_string()),
                },
                false,
            ),
            None => {
                self.table
                    .register(name, &from.ip().to_string(), from.port());
                (
                    FrameBody::RegisterAck {
                        ok: true,
                        reason: None,
                    },
                    true,
                )
            }
        }
    }

    /// Marks `name` offline and removes it from every group (§4.3 dereg).
    /// Returns `true` if this changed the table (i.e. `name` was online).
    pub fn handle_dereg(&mut self, name: &str) -> (FrameBody, bool) {
        let changed = self.table.mark_offline(name);
        self.groups.remove_member_everywhere(name);
        (FrameBody::DeregAck, changed)
    }

    pub fn handle_create_group(&mut self, group: &str) -> FrameBody {
        let result = if self.groups.create(group) {
            CreateGroupResult::Created
        } else {
            CreateGroupResult::AlreadyExists
        };
        FrameBody::CreateGroupReply { result }
    }

    pub fn handle_list_groups(&self) -> FrameBody {
        FrameBody::ListGroupsReply {
            groups: self.groups.group_names(),
        }
    }

    /// Rejects a join from a `name` absent from the registration table
    /// (G2: every group member must also be a table entry) rather than
    /// admitting an unregistered sender into the roster.
    pub fn handle_join_group(&mut self, group: &str, name: &str) -> FrameBody {
        let result = if !self.table.contains(name) {
            JoinGroupResult::DoesNotExist
        } else if self.groups.join(group, name) {
            JoinGroupResult::Entered
        } else {
            JoinGroupResult::DoesNotExist
        };
        FrameBody::JoinGroupReply {
            group: group.to_string(),
            result,
        }
    }

    pub fn handle_leave_group(&mut self, group: &str, name: &str) -> FrameBody {
        self.groups.leave(group, name);
        FrameBody::LeaveGroupReply {
            group: group.to_string(),
        }
    }

    pub fn handle_list_members(&self, group: &str) -> FrameBody {
        let members = self.groups.members(group).unwrap_or(&[]).to_vec();
        FrameBody::ListMembersReply {
            group: group.to_string(),
            members,
        }
    }

    /// Recipients for a `send_group` fan-out: every current member other
    /// than `sender`, resolved to an endpoint. Members with no resolvable
    /// endpoint (shouldn't happen under G2) are skipped.
    pub fn group_fanout_targets(&self, group: &str, sender: &str) -> Vec<(String, SocketAddr)> {
        self.groups
            .members(group)
            .unwrap_or(&[])
            .iter()
            .filter(|m| m.as_str() != sender)
            .filter_map(|m| self.endpoint_of(m).map(|addr| (m.clone(), addr)))
            .collect()
    }

    /// Eviction on a reliable-send timeout to `name` (§4.2 terminal
    /// timeout from the server): offline + remove from every group.
    /// Returns `true` if this changed the table.
    pub fn evict(&mut self, name: &str) -> bool {
        let changed = self.table.mark_offline(name);
        self.groups.remove_member_everywhere(name);
        changed
    }
}
