//! Listener + mutator driver (§4.5, §5).
//!
//! Two concurrent tasks share one `UdpSocket` and one `PendingAck` slot:
//! - the **listener** receives, decodes, and either claims a frame as the
//!   currently-awaited ACK or forwards it to the mutator;
//! - the **mutator** is the single logical mutator of [`ServerCore`]
//!   (§4.3): it owns state, replies to requests, and performs the
//!   server-initiated reliable-sends (table broadcast, group fan-out).
//!
//! Splitting these avoids the deadlock called out in §5: the mutator
//! cannot be the one polling the socket while also awaiting its own ACK.

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

use crate::core::ServerCore;

const RECV_TIMEOUT: Duration = Duration::from_millis(200);
const INBOUND_CHANNEL_CAPACITY: usize = 256;

pub struct ChatServer {
    socket: Arc<UdpSocket>,
    pending: Arc<PendingAck>,
    shutdown: Shutdown,
}

impl ChatServer {
    pub async fn bind(port: u16) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("bind udp :{port}"))?;
        Ok(ChatServer {
            socket: Arc::new(socket),
            pending: Arc::new(PendingAck::new()),
            shutdown: Shutdown::new(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Runs the listener and mutator tasks until `shutdown` is triggered.
    pub async fn run(self) -> anyhow::Result<()> {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        let listener = tokio::spawn(listen(
            self.socket.clone(),
            self.pending.clone(),
            self.shutdown.clone(),
            tx,
        ));
        let mutator = tokio::spawn(mutate(
            self.socket,
            self.pending,
            self.shutdown.clone(),
            rx,
        ));

        let _ = tokio::join!(listener, mutator);
        info!("server shut down");
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
            Err(_) => continue, // recv timeout, loop back to re-check shutdown
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

        debug!(%from, kind = frame.body.kind(), "dispatching to mutator");
        if tx.send((frame, from)).await.is_err() {
            break; // mutator gone
        }
    }
}

async fn mutate(
    socket: Arc<UdpSocket>,
    pending: Arc<PendingAck>,
    shutdown: Shutdown,
    mut rx: mpsc::Receiver<(Frame, SocketAddr)>,
) {
    let mut core = ServerCore::new();
    loop {
        let next = tokio::select! {
            _ = shutdown.wait() => None,
            item = rx.recv() => item,
        };
        let Some((frame, from)) = next else {
            break;
        };

        if let Err(e) = dispatch(&socket, &pending, &mut core, frame, from).await {
            warn!(error = %e, "error handling frame");
        }
    }
}

fn server_metadata(local: SocketAddr) -> Metadata {
    Metadata::new("server", local.ip().to_string(), local.port())
}

async fn reply(socket: &UdpSocket, to: SocketAddr, body: FrameBody) -> anyhow::Result<()> {
    let local = socket.local_addr()?;
    let frame = Frame::new(body, server_metadata(local));
    let bytes = encode_to_bytes(&frame)?;
    socket.send_to(&bytes, to).await?;
    Ok(())
}

async fn dispatch(
    socket: &UdpSocket,
    pending: &PendingAck,
    core: &mut ServerCore,
    frame: Frame,
    from: SocketAddr,
) -> anyhow::Result<()> {
    let sender_name = frame.metadata.name.clone();

    match frame.body {
        FrameBody::Register => {
            let (body, changed) = core.handle_register(&sender_name, from);
            let ok = matches!(body, FrameBody::RegisterAck { ok: true, .. });
            reply(socket, from, body).await?;
            if ok {
                info!(name = %sender_name, %from, "client registered");
            }
            if changed {
                broadcast_table(socket, pending, core).await;
            }
        }
        FrameBody::Dereg { name } => {
            let (body, changed) = core.handle_dereg(&name);
            reply(socket, from, body).await?;
            if changed {
                info!(name = %name, "client deregistered");
                broadcast_table(socket, pending, core).await;
            }
        }
        FrameBody::CreateGroup { group } => {
            let body = core.handle_create_group(&group);
            let created = matches!(
                body,
                FrameBody::CreateGroupReply { result: CreateGroupResult::Created }
            );
            reply(socket, from, body).await?;
            if created {
                info!(name = %sender_name, %group, "group created");
            }
        }
        FrameBody::ListGroups => {
            let body = core.handle_list_groups();
            reply(socket, from, body).await?;
        }
        FrameBody::JoinGroup { group } => {
            let body = core.handle_join_group(&group, &sender_name);
            let entered = matches!(
                body,
                FrameBody::JoinGroupReply { result: JoinGroupResult::Entered, .. }
            );
            reply(socket, from, body).await?;
            if entered {
                info!(name = %sender_name, %group, "client joined group");
            }
        }
        FrameBody::LeaveGroup { group } => {
            let body = core.handle_leave_group(&group, &sender_name);
            reply(socket, from, body).await?;
            info!(name = %sender_name, %group, "client left group");
        }
        FrameBody::ListMembers { group } => {
            let body = core.handle_list_members(&group);
            reply(socket, from, body).await?;
        }
        FrameBody::SendGroup { group, text } => {
            send_group_fanout(socket, pending, core, &group, &sender_name, &text).await;
            reply(
                socket,
                from,
                FrameBody::SendGroupReply {
                    group: group.clone(),
                },
            )
            .await?;
        }
        other => {
            debug!(kind = other.kind(), "frame has no server-side handler, dropped");
        }
    }
    Ok(())
}

/// Broadcasts the full table to every online client (§4.3). Downgrades
/// any recipient that times out and loops until a pass evicts nobody —
/// bounded by the online-client count since each pass is monotone.
async fn broadcast_table(socket: &UdpSocket, pending: &PendingAck, core: &mut ServerCore) {
    loop {
        let table = core.table_snapshot();
        let targets = core.online_endpoints();
        let local = match socket.local_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };
        info!(table_size = table.len(), recipients = targets.len(), "broadcasting table");

        let mut evicted_any = false;
        for (name, addr) in targets {
            let frame = Frame::new(
                FrameBody::Table {
                    table: table.clone(),
                },
                server_metadata(local),
            );
            let outcome = reliable_send(socket, pending, addr, &frame, |f| {
                matches!(f.body, FrameBody::TableAck)
            })
            .await;
            match outcome {
                Ok(SendOutcome::Delivered(_)) => {}
                Ok(SendOutcome::TimedOut) => {
                    warn!(%name, "client unresponsive to table broadcast, marking offline");
                    if core.evict(&name) {
                        evicted_any = true;
                    }
                }
                Err(e) => warn!(%name, error = %e, "broadcast send failed"),
            }
        }

        if !evicted_any {
            break;
        }
    }
}

/// Fans a `send_group` out to every other member (§4.3). Members that
/// time out are evicted; if any eviction changes the table, broadcast
/// once more after the fan-out completes.
async fn send_group_fanout(
    socket: &UdpSocket,
    pending: &PendingAck,
    core: &mut ServerCore,
    group: &str,
    sender: &str,
    text: &str,
) {
    let local = match socket.local_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };
    let targets = core.group_fanout_targets(group, sender);
    let mut evicted_any = false;

    for (name, addr) in targets {
        let frame = Frame::new(
            FrameBody::GroupMsg {
                group: group.to_string(),
                from: sender.to_string(),
                text: text.to_string(),
            },
            server_metadata(local),
        );
        let outcome = reliable_send(socket, pending, addr, &frame, |f| {
            matches!(&f.body, FrameBody::GroupMsgAck { group: g } if g == group)
        })
        .await;
        match outcome {
            Ok(SendOutcome::Delivered(_)) => {}
            Ok(SendOutcome::TimedOut) => {
                warn!(%name, %group, "member unresponsive to group fan-out, evicting");
                if core.evict(&name) {
                    evicted_any = true;
                }
            }
            Err(e) => warn!(%name, error = %e, "group fan-out send failed"),
        }
    }

    if evicted_any {
        broadcast_table(socket, pending, core).await;
    }
}
