//! Client mode state machine, local table mirror, offline inbox (§3, §4.4).

use std::net::SocketAddr;

use chat_shared::prelude::*;

/// `free` vs `in_group(G)` as a tagged variant (§9 design note) rather
/// than a boolean plus optional name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Free,
    InGroup(String),
}

pub struct ClientState {
    pub name: String,
    table: RegistrationTable,
    pub mode: Mode,
    offline_inbox: Vec<(String, String)>,
}

impl ClientState {
    pub fn new(name: impl Into<String>) -> Self {
        ClientState {
            name: name.into(),
            table: RegistrationTable::new(),
            mode: Mode::Free,
            offline_inbox: Vec::new(),
        }
    }

    pub fn resolve_peer(&self, name: &str) -> Option<SocketAddr> {
        self.table.get(name).and_then(|r| r.addr())
    }

    pub fn apply_table_broadcast(&mut self, table: Vec<ClientRecord>) {
        self.table.replace(table);
    }

    /// Only populated while `mode = in_group` (§3).
    pub fn push_offline(&mut self, peer: &str, text: &str) {
        self.offline_inbox.push((peer.to_string(), text.to_string()));
    }

    /// Drained (printed) when the client returns to free mode (§3, S7).
    pub fn drain_offline_inbox(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.offline_inbox)
    }

    pub fn current_group(&self) -> Option<&str> {
        match &self.mode {
            Mode::InGroup(g) => Some(g.as_str()),
            Mode::Free => None,
        }
    }
}
