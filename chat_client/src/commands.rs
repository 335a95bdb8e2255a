//! Command grammar (§4.4).

use crate::core::Mode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send { peer: String, text: String },
    Dereg { name: String },
    CreateGroup { group: String },
    ListGroups,
    JoinGroup { group: String },
    SendGroup { text: String },
    ListMembers,
    LeaveGroup,
}

impl Command {
    /// Allowed-mode check from the §4.4 table.
    pub fn allowed_in(&self, mode: &Mode) -> bool {
        use Command::*;
        match self {
            Send { .. } | Dereg { .. } | CreateGroup { .. } | ListGroups | JoinGroup { .. } => {
                matches!(mode, Mode::Free)
            }
            SendGroup { .. } | ListMembers | LeaveGroup => matches!(mode, Mode::InGroup(_)),
        }
    }
}

/// Parses one line of user input into a [`Command`]. `None` if the first
/// token is not a recognized command name or a required argument is
/// missing — callers print `[Invalid command: <cmd>]` in that case.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let mut parts = line.splitn(2, ' ');
    let cmd = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match cmd {
        "send" => {
            let mut it = rest.splitn(2, ' ');
            let peer = it.next().unwrap_or("").to_string();
            if peer.is_empty() {
                return None;
            }
            let text = it.next().unwrap_or("").to_string();
            Some(Command::Send { peer, text })
        }
        "dereg" => {
            if rest.is_empty() {
                return None;
            }
            Some(Command::Dereg {
                name: rest.to_string(),
            })
        }
        "create_group" => {
            if rest.is_empty() {
                return None;
            }
            Some(Command::CreateGroup {
                group: rest.to_string(),
            })
        }
        "list_groups" => Some(Command::ListGroups),
        "join_group" => {
            if rest.is_empty() {
                return None;
            }
            Some(Command::JoinGroup {
                group: rest.to_string(),
            })
        }
        "send_group" => Some(Command::SendGroup {
            text: rest.to_string(),
        }),
        "list_members" => Some(Command::ListMembers),
        "leave_group" => Some(Command::LeaveGroup),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_with_multiword_text() {
        let cmd = parse_command("send c1 hello there").unwrap();
        assert_eq!(
            cmd,
            Command::Send {
                peer: "c1".to_string(),
                text: "hello there".to_string()
            }
        );
    }

    #[test]
    fn send_without_peer_is_not_recognized() {
        assert_eq!(parse_command("send"), None);
    }

    #[test]
    fn dereg_wrong_mode_is_disallowed() {
        let cmd = Command::Dereg {
            name: "c2".to_string(),
        };
        assert!(!cmd.allowed_in(&Mode::InGroup("raid".to_string())));
        assert!(cmd.allowed_in(&Mode::Free));
    }

    #[test]
    fn send_group_only_allowed_in_group() {
        let cmd = Command::SendGroup {
            text: "hey".to_string(),
        };
        assert!(!cmd.allowed_in(&Mode::Free));
        assert!(cmd.allowed_in(&Mode::InGroup("raid".to_string())));
    }

    #[test]
    fn unrecognized_command_name_parses_to_none() {
        assert_eq!(parse_command("frobnicate foo"), None);
    }
}
