//! Wire codec and frame dispatch (§4.1).
//!
//! Every datagram carries exactly one self-describing [`Frame`]: a `type`
//! tag, a type-specific `payload`, and `metadata` naming the sender. The
//! wire representation is JSON, adjacently tagged on `type`/`payload` with
//! `metadata` flattened alongside — any unrecognized `type` decodes to
//! [`FrameBody::Unknown`] rather than failing, so the listener loop can
//! drop-and-log it instead of treating it as a parse error (§4.1, §7).

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::model::ClientRecord;

/// Sender's logical identity, carried on every frame. There is no
/// cryptographic identity: handlers trust `metadata.name` to key tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub ip: String,
    pub port: u16,
}

impl Metadata {
    pub fn new(name: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Metadata {
            name: name.into(),
            ip: ip.into(),
            port,
        }
    }
}

/// One self-delimiting datagram payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(flatten)]
    pub body: FrameBody,
    pub metadata: Metadata,
}

impl Frame {
    pub fn new(body: FrameBody, metadata: Metadata) -> Self {
        Frame { body, metadata }
    }
}

/// Result of a `create_group` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateGroupResult {
    Created,
    AlreadyExists,
}

/// Result of a `join_group` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinGroupResult {
    Entered,
    DoesNotExist,
}

/// Frame types and directions, per the §4.1 table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum FrameBody {
    /// C->S: request to join.
    Register,
    /// S->C: acceptance or duplicate-name rejection.
    RegisterAck {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// C->S: voluntary de-registration.
    Dereg { name: String },
    /// S->C: acknowledges dereg.
    DeregAck,
    /// S->C: full table snapshot, broadcast on membership change.
    Table { table: Vec<ClientRecord> },
    /// C->S: ack broadcast.
    TableAck,
    /// C->C: direct unicast.
    Msg { text: String },
    /// C->C: direct unicast ack.
    MsgAck,
    /// C->S: create group.
    CreateGroup { group: String },
    /// S->C: reply to create_group.
    CreateGroupReply { result: CreateGroupResult },
    /// C->S: list all groups.
    ListGroups,
    /// S->C: reply to list_groups, in creation order.
    ListGroupsReply { groups: Vec<String> },
    /// C->S: join group.
    JoinGroup { group: String },
    /// S->C: reply to join_group.
    JoinGroupReply { group: String, result: JoinGroupResult },
    /// C->S: leave group.
    LeaveGroup { group: String },
    /// S->C: reply to leave_group.
    LeaveGroupReply { group: String },
    /// C->S: roster of group.
    ListMembers { group: String },
    /// S->C: reply to list_members, in insertion order.
    ListMembersReply { group: String, members: Vec<String> },
    /// C->S: server fans out to group.
    SendGroup { group: String, text: String },
    /// S->C: reply to the sender of send_group.
    SendGroupReply { group: String },
    /// S->C: fan-out delivery of a group message.
    GroupMsg { group: String, from: String, text: String },
    /// C->S: recipient ack of a group message.
    GroupMsgAck { group: String },
    /// Any type this build does not recognize. Decoded instead of
    /// rejected so the listener can drop-and-log per §4.1/§7.
    #[serde(other)]
    Unknown,
}

impl FrameBody {
    /// Short name of this frame's `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            FrameBody::Register => "register",
            FrameBody::RegisterAck { .. } => "register_ack",
            FrameBody::Dereg { .. } => "dereg",
            FrameBody::DeregAck => "dereg_ack",
            FrameBody::Table { .. } => "table",
            FrameBody::TableAck => "table_ack",
            FrameBody::Msg { .. } => "msg",
            FrameBody::MsgAck => "msg_ack",
            FrameBody::CreateGroup { .. } => "create_group",
            FrameBody::CreateGroupReply { .. } => "create_group_reply",
            FrameBody::ListGroups => "list_groups",
            FrameBody::ListGroupsReply { .. } => "list_groups_reply",
            FrameBody::JoinGroup { .. } => "join_group",
            FrameBody::JoinGroupReply { .. } => "join_group_reply",
            FrameBody::LeaveGroup { .. } => "leave_group",
            FrameBody::LeaveGroupReply { .. } => "leave_group_reply",
            FrameBody::ListMembers { .. } => "list_members",
            FrameBody::ListMembersReply { .. } => "list_members_reply",
            FrameBody::SendGroup { .. } => "send_group",
            FrameBody::SendGroupReply { .. } => "send_group_reply",
            FrameBody::GroupMsg { .. } => "group_msg",
            FrameBody::GroupMsgAck { .. } => "group_msg_ack",
            FrameBody::Unknown => "unknown",
        }
    }
}

/// Encodes a frame to its wire representation. `decode(encode(f)) == f`
/// for every well-known frame (§3).
pub fn encode_to_bytes(frame: &Frame) -> Result<Vec<u8>, ChatError> {
    Ok(serde_json::to_vec(frame)?)
}

/// Decodes a datagram payload into a frame. Unknown `type` values decode
/// to `FrameBody::Unknown` rather than erroring; only a structurally
/// malformed datagram (not valid JSON, or missing `metadata`) errors.
pub fn decode_from_bytes(bytes: &[u8]) -> Result<Frame, ChatError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> Metadata {
        Metadata::new("alice", "127.0.0.1", 5555)
    }

    #[test]
    fn roundtrips_unit_variant() {
        let frame = Frame::new(FrameBody::Register, meta());
        let bytes = encode_to_bytes(&frame).unwrap();
        assert_eq!(decode_from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn roundtrips_struct_variant() {
        let frame = Frame::new(
            FrameBody::Msg {
                text: "hi".to_string(),
            },
            meta(),
        );
        let bytes = encode_to_bytes(&frame).unwrap();
        assert_eq!(decode_from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn roundtrips_table_snapshot() {
        let frame = Frame::new(
            FrameBody::Table {
                table: vec![ClientRecord {
                    name: "alice".into(),
                    ip: "127.0.0.1".into(),
                    port: 5555,
                    status: crate::model::ClientStatus::Online,
                }],
            },
            meta(),
        );
        let bytes = encode_to_bytes(&frame).unwrap();
        assert_eq!(decode_from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn unknown_type_decodes_instead_of_erroring() {
        let json = serde_json::json!({
            "type": "not_a_real_type",
            "payload": {"whatever": 1},
            "metadata": {"name": "alice", "ip": "127.0.0.1", "port": 5555},
        });
        let bytes = serde_json::to_vec(&json).unwrap();
        let frame = decode_from_bytes(&bytes).unwrap();
        assert_eq!(frame.body, FrameBody::Unknown);
    }

    #[test]
    fn malformed_json_errors() {
        let err = decode_from_bytes(b"not json at all");
        assert!(err.is_err());
    }
}
