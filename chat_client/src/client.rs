//! Client driver: the single task that owns [`ClientState`] (§4.4, §5).
//!
//! A listener task receives, decodes, and either claims a frame as the
//! currently-awaited ACK or forwards it here. This task also reads
//! user-typed commands from a channel fed by a blocking stdin thread
//! (`chat_client::main`). Because only this task ever touches
//! `ClientState`, there is no lock to take or to avoid holding across an
//! `.await` — mutation and the reliable-sends that follow it run in the
//! same sequential task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chat_shared::prelude::*;
use chat_shared::frame::{CreateGroupResult, JoinGroupResult};
use chat_shared::shutdown::Shutdown;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::{parse_command, Command};
use crate::core::{ClientState, Mode};

const RECV_TIMEOUT: Duration = Duration::from_millis(200);
const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Why the driver stopped, so `main` can pick an exit code (§6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Clean,
    ServerUnresponsive,
    DuplicateName,
}

pub struct ChatClient {
    socket: Arc<UdpSocket>,
    pending: Arc<PendingAck>,
    shutdown: Shutdown,
    server_addr: SocketAddr,
    state: ClientState,
}

impl ChatClient {
    pub async fn bind(name: impl Into<String>, client_port: u16, server_addr: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", client_port))
            .await
            .with_context(|| format!("bind udp :{client_port}"))?;
        Ok(ChatClient {
            socket: Arc::new(socket),
            pending: Arc::new(PendingAck::new()),
            shutdown: Shutdown::new(),
            server_addr,
            state: ClientState::new(name),
        })
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    fn metadata(&self) -> anyhow::Result<Metadata> {
        let local = self.socket.local_addr()?;
        Ok(Metadata::new(
            self.state.name.clone(),
            local.ip().to_string(),
            local.port(),
        ))
    }

    /// Registers with the server (§4.3 register). Prints the required
    /// status lines and returns the outcome.
    pub async fn register(&self) -> anyhow::Result<ExitReason> {
        let meta = self.metadata()?;
        let frame = Frame::new(FrameBody::Register, meta);
        let outcome = reliable_send(&self.socket, &self.pending, self.server_addr, &frame, |f| {
            matches!(f.body, FrameBody::RegisterAck { .. })
        })
        .await?;

        match outcome {
            SendOutcome::Delivered(reply) => match reply.body {
                FrameBody::RegisterAck { ok: true, .. } => {
                    println!("[Welcome, You are registered.]");
                    Ok(ExitReason::Clean)
                }
                FrameBody::RegisterAck { ok: false, .. } => {
                    println!("[`{}` already exists!]", self.state.name);
                    Ok(ExitReason::DuplicateName)
                }
                _ => unreachable!("predicate only matches RegisterAck"),
            },
            SendOutcome::TimedOut => {
                println!("[Server not responding]");
                println!("[Exiting]");
                Ok(ExitReason::ServerUnresponsive)
            }
        }
    }

    /// Runs the listener and command-processing driver until shutdown or
    /// a terminal condition is reached.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<String>,
    ) -> anyhow::Result<ExitReason> {
        let (tx, mut rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let listener = tokio::spawn(listen(
            self.socket.clone(),
            self.pending.clone(),
            self.shutdown.clone(),
            tx,
        ));

        let reason = loop {
            tokio::select! {
                _ = self.shutdown.wait() => break ExitReason::Clean,
                Some(line) = commands.recv() => {
                    if let Some(reason) = self.handle_command_line(&line).await? {
                        break reason;
                    }
                }
                Some((frame, from)) = rx.recv() => {
                    self.handle_inbound(frame, from).await?;
                }
                else => break ExitReason::Clean,
            }
        };

        self.shutdown.trigger();
        let _ = listener.await;
        Ok(reason)
    }

    async fn handle_command_line(&mut self, line: &str) -> anyhow::Result<Option<ExitReason>> {
        let Some(command) = parse_command(line) else {
            println!("[Invalid command: {line}]");
            return Ok(None);
        };
        if !command.allowed_in(&self.state.mode) {
            println!("[Invalid command: {line}]");
            return Ok(None);
        }

        match command {
            Command::Send { peer, text } => self.cmd_send(&peer, &text).await,
            Command::Dereg { name } => return self.cmd_dereg(&name).await,
            Command::CreateGroup { group } => self.cmd_create_group(&group).await,
            Command::ListGroups => self.cmd_list_groups().await,
            Command::JoinGroup { group } => self.cmd_join_group(&group).await,
            Command::SendGroup { text } => self.cmd_send_group(&text).await,
            Command::ListMembers => self.cmd_list_members().await,
            Command::LeaveGroup => self.cmd_leave_group().await,
        }?;
        Ok(None)
    }

    /// Every server request shares the same terminal-timeout behavior
    /// (§4.2): print `[Server not responding]` / `[Exiting]` and shut
    /// down. Returns `true` if the caller should treat this as terminal.
    async fn report_if_server_timed_out(&self, outcome: &SendOutcome) -> bool {
        if matches!(outcome, SendOutcome::TimedOut) {
            println!("[Server not responding]");
            println!("[Exiting]");
            self.shutdown.trigger();
            true
        } else {
            false
        }
    }

    async fn cmd_send(&mut self, peer: &str, text: &str) -> anyhow::Result<()> {
        let Some(addr) = self.state.resolve_peer(peer) else {
            println!("[No ACK from {peer}, message not delivered]");
            return Ok(());
        };
        let meta = self.metadata()?;
        let frame = Frame::new(
            FrameBody::Msg {
                text: text.to_string(),
            },
            meta,
        );
        let outcome = reliable_send(&self.socket, &self.pending, addr, &frame, |f| {
            matches!(f.body, FrameBody::MsgAck)
        })
        .await?;

        match outcome {
            SendOutcome::Delivered(_) => println!("[Message received by {peer}]"),
            SendOutcome::TimedOut => {
                println!("[No ACK from {peer}, message not delivered]");
                let meta = self.metadata()?;
                let dereg = Frame::new(
                    FrameBody::Dereg {
                        name: peer.to_string(),
                    },
                    meta,
                );
                // Best-effort: ask the server to de-register the silent
                // peer. We do not act further on this outcome either way.
                let _ = reliable_send(&self.socket, &self.pending, self.server_addr, &dereg, |f| {
                    matches!(f.body, FrameBody::DeregAck)
                })
                .await;
            }
        }
        Ok(())
    }

    async fn cmd_dereg(&mut self, name: &str) -> anyhow::Result<Option<ExitReason>> {
        if name != self.state.name.as_str() {
            println!("[You can only deregister yourself.]");
            return Ok(None);
        }
        let meta = self.metadata()?;
        let frame = Frame::new(
            FrameBody::Dereg {
                name: name.to_string(),
            },
            meta,
        );
        let outcome = reliable_send(&self.socket, &self.pending, self.server_addr, &frame, |f| {
            matches!(f.body, FrameBody::DeregAck)
        })
        .await?;

        match outcome {
            SendOutcome::Delivered(_) => {
                println!("[You are Offline. Bye.]");
                Ok(Some(ExitReason::Clean))
            }
            SendOutcome::TimedOut => {
                println!("[Server not responding]");
                println!("[Exiting]");
                Ok(Some(ExitReason::ServerUnresponsive))
            }
        }
    }

    async fn cmd_create_group(&mut self, group: &str) -> anyhow::Result<()> {
        let meta = self.metadata()?;
        let frame = Frame::new(
            FrameBody::CreateGroup {
                group: group.to_string(),
            },
            meta,
        );
        let outcome = reliable_send(&self.socket, &self.pending, self.server_addr, &frame, |f| {
            matches!(f.body, FrameBody::CreateGroupReply { .. })
        })
        .await?;
        if self.report_if_server_timed_out(&outcome).await {
            return Ok(());
        }
        if let SendOutcome::Delivered(reply) = outcome {
            if let FrameBody::CreateGroupReply { result } = reply.body {
                match result {
                    CreateGroupResult::Created => println!("[Group {group} created by Server.]"),
                    CreateGroupResult::AlreadyExists => println!("[Group {group} already exists.]"),
                }
            }
        }
        Ok(())
    }

    async fn cmd_list_groups(&mut self) -> anyhow::Result<()> {
        let meta = self.metadata()?;
        let frame = Frame::new(FrameBody::ListGroups, meta);
        let outcome = reliable_send(&self.socket, &self.pending, self.server_addr, &frame, |f| {
            matches!(f.body, FrameBody::ListGroupsReply { .. })
        })
        .await?;
        if self.report_if_server_timed_out(&outcome).await {
            return Ok(());
        }
        if let SendOutcome::Delivered(reply) = outcome {
            if let FrameBody::ListGroupsReply { groups } = reply.body {
                if groups.is_empty() {
                    println!("[No groups exist.]");
                } else {
                    println!("[Groups: {}]", groups.join(", "));
                }
            }
        }
        Ok(())
    }

    async fn cmd_join_group(&mut self, group: &str) -> anyhow::Result<()> {
        let meta = self.metadata()?;
        let frame = Frame::new(
            FrameBody::JoinGroup {
                group: group.to_string(),
            },
            meta,
        );
        let outcome = reliable_send(&self.socket, &self.pending, self.server_addr, &frame, |f| {
            matches!(f.body, FrameBody::JoinGroupReply { .. })
        })
        .await?;
        if self.report_if_server_timed_out(&outcome).await {
            return Ok(());
        }
        if let SendOutcome::Delivered(reply) = outcome {
            if let FrameBody::JoinGroupReply { result, .. } = reply.body {
                match result {
                    JoinGroupResult::Entered => {
                        println!("[Entered group {group} successfully!]");
                        self.state.mode = Mode::InGroup(group.to_string());
                    }
                    JoinGroupResult::DoesNotExist => {
                        println!("[Group {group} does not exist.]");
                    }
                }
            }
        }
        Ok(())
    }

    async fn cmd_send_group(&mut self, text: &str) -> anyhow::Result<()> {
        let Some(group) = self.state.current_group().map(str::to_string) else {
            return Ok(());
        };
        let meta = self.metadata()?;
        let frame = Frame::new(
            FrameBody::SendGroup {
                group: group.clone(),
                text: text.to_string(),
            },
            meta,
        );
        let outcome = reliable_send(&self.socket, &self.pending, self.server_addr, &frame, |f| {
            matches!(&f.body, FrameBody::SendGroupReply { group: g } if g == &group)
        })
        .await?;
        if self.report_if_server_timed_out(&outcome).await {
            return Ok(());
        }
        if matches!(outcome, SendOutcome::Delivered(_)) {
            println!("[Message received by Server.]");
        }
        Ok(())
    }

    async fn cmd_list_members(&mut self) -> anyhow::Result<()> {
        let Some(group) = self.state.current_group().map(str::to_string) else {
            return Ok(());
        };
        let meta = self.metadata()?;
        let frame = Frame::new(
            FrameBody::ListMembers {
                group: group.clone(),
            },
            meta,
        );
        let outcome = reliable_send(&self.socket, &self.pending, self.server_addr, &frame, |f| {
            matches!(&f.body, FrameBody::ListMembersReply { group: g, .. } if g == &group)
        })
        .await?;
        if self.report_if_server_timed_out(&outcome).await {
            return Ok(());
        }
        if let SendOutcome::Delivered(reply) = outcome {
            if let FrameBody::ListMembersReply { group, members } = reply.body {
                println!("[Members in the group {group}:]");
                for member in members {
                    println!("{member}");
                }
            }
        }
        Ok(())
    }

    async fn cmd_leave_group(&mut self) -> anyhow::Result<()> {
        let Some(group) = self.state.current_group().map(str::to_string) else {
            return Ok(());
        };
        let meta = self.metadata()?;
        let frame = Frame::new(
            FrameBody::LeaveGroup {
                group: group.clone(),
            },
            meta,
        );
        let outcome = reliable_send(&self.socket, &self.pending, self.server_addr, &frame, |f| {
            matches!(&f.body, FrameBody::LeaveGroupReply { group: g } if g == &group)
        })
        .await?;
        if self.report_if_server_timed_out(&outcome).await {
            return Ok(());
        }
        if matches!(outcome, SendOutcome::Delivered(_)) {
            println!("[Leave group chat {group}]");
            self.state.mode = Mode::Free;
            for (peer, text) in self.state.drain_offline_inbox() {
                println!("[>>> {peer}: {text}]");
            }
        }
        Ok(())
    }

    async fn handle_inbound(&mut self, frame: Frame, from: SocketAddr) -> anyhow::Result<()> {
        match frame.body {
            FrameBody::Msg { text } => {
                let from_name = frame.metadata.name.clone();
                self.ack_plain(from, FrameBody::MsgAck).await?;
                if matches!(self.state.mode, Mode::Free) {
                    println!("[{from_name}: {text}]");
                } else {
                    self.state.push_offline(&from_name, &text);
                }
            }
            FrameBody::GroupMsg { group, from: sender, text } => {
                self.ack_plain(
                    from,
                    FrameBody::GroupMsgAck {
                        group: group.clone(),
                    },
                )
                .await?;
                if self.state.current_group() == Some(group.as_str()) {
                    println!("Group_Message {sender}: {text}");
                }
            }
            FrameBody::Table { table } => {
                self.state.apply_table_broadcast(table);
                println!("[Client table updated.]");
                self.ack_plain(from, FrameBody::TableAck).await?;
            }
            other => {
                debug!(kind = other.kind(), "inbound frame has no client-side handler, dropped");
            }
        }
        Ok(())
    }

    async fn ack_plain(&self, to: SocketAddr, body: FrameBody) -> anyhow::Result<()> {
        let meta = self.metadata()?;
        let frame = Frame::new(body, meta);
        let bytes = encode_to_bytes(&frame)?;
        self.socket.send_to(&bytes, to).await?;
        Ok(())
    }
}

async fn listen(
    socket: Arc<UdpSocket>,
    pending: Arc<PendingAck>,
    shutdown: Shutdown,
    tx: mpsc::Sender<(Frame, SocketAddr)>,
) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        if shutdown.is_set() {
            break;
        }
        let recv = tokio::time::timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)).await;
        let (n, from) = match recv {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!(error = %e, "udp recv error");
                continue;
            }
            Err(_) => continue,
        };

        let frame = match decode_from_bytes(&buf[..n]) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%from, error = %e, "dropped malformed frame");
                continue;
            }
        };

        if matches!(frame.body, FrameBody::Unknown) {
            warn!(%from, "dropped frame with unrecognized type");
            continue;
        }

        if pending.offer(&frame) {
            continue;
        }

        debug!(%from, kind = frame.body.kind(), "dispatching to driver");
        if tx.send((frame, from)).await.is_err() {
            break;
        }
    }
    info!("client listener stopped");
}
