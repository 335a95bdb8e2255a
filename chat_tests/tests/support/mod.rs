//! A raw protocol peer used to drive the server directly, bypassing
//! `chat_client`'s terminal/mode layer, so tests exercise just the
//! reliability and membership semantics under test.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chat_shared::prelude::*;
use tokio::net::UdpSocket;

pub struct TestPeer {
    socket: Arc<UdpSocket>,
    pending: Arc<PendingAck>,
    name: String,
    last_table: Arc<Mutex<Option<Vec<ClientRecord>>>>,
    group_msgs: Arc<Mutex<Vec<(String, String, String)>>>,
    _listener: tokio::task::JoinHandle<()>,
}

impl TestPeer {
    pub async fn spawn(name: &str) -> anyhow::Result<Self> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
        let pending = Arc::new(PendingAck::new());
        let last_table = Arc::new(Mutex::new(None));
        let group_msgs = Arc::new(Mutex::new(Vec::new()));

        let listener = tokio::spawn(listen(
            socket.clone(),
            pending.clone(),
            name.to_string(),
            last_table.clone(),
            group_msgs.clone(),
        ));

        Ok(TestPeer {
            socket,
            pending,
            name: name.to_string(),
            last_table,
            group_msgs,
            _listener: listener,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    fn metadata(&self) -> Metadata {
        let local = self.addr();
        Metadata::new(self.name.clone(), local.ip().to_string(), local.port())
    }

    pub async fn send_reliable(
        &self,
        dest: SocketAddr,
        body: FrameBody,
        ack_predicate: impl Fn(&Frame) -> bool + Send + Sync + 'static,
    ) -> anyhow::Result<SendOutcome> {
        let frame = Frame::new(body, self.metadata());
        Ok(reliable_send(&self.socket, &self.pending, dest, &frame, ack_predicate).await?)
    }

    pub fn last_table(&self) -> Option<Vec<ClientRecord>> {
        self.last_table.lock().unwrap().clone()
    }

    pub fn group_msgs(&self) -> Vec<(String, String, String)> {
        self.group_msgs.lock().unwrap().clone()
    }
}

async fn listen(
    socket: Arc<UdpSocket>,
    pending: Arc<PendingAck>,
    name: String,
    last_table: Arc<Mutex<Option<Vec<ClientRecord>>>>,
    group_msgs: Arc<Mutex<Vec<(String, String, String)>>>,
) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let Ok((n, from)) = socket.recv_from(&mut buf).await else {
            break;
        };
        let Ok(frame) = decode_from_bytes(&buf[..n]) else {
            continue;
        };
        if pending.offer(&frame) {
            continue;
        }

        let local = match socket.local_addr() {
            Ok(addr) => addr,
            Err(_) => continue,
        };
        let meta = Metadata::new(name.clone(), local.ip().to_string(), local.port());

        match frame.body {
            FrameBody::Table { table } => {
                *last_table.lock().unwrap() = Some(table);
                let _ = reply(&socket, from, FrameBody::TableAck, &meta).await;
            }
            FrameBody::GroupMsg {
                group,
                from: sender,
                text,
            } => {
                group_msgs.lock().unwrap().push((group.clone(), sender, text));
                let _ = reply(&socket, from, FrameBody::GroupMsgAck { group }, &meta).await;
            }
            _ => {}
        }
    }
}

async fn reply(
    socket: &UdpSocket,
    to: SocketAddr,
    body: FrameBody,
    meta: &Metadata,
) -> anyhow::Result<()> {
    let frame = Frame::new(body, meta.clone());
    let bytes = encode_to_bytes(&frame)?;
    socket.send_to(&bytes, to).await?;
    Ok(())
}

pub async fn spawn_server() -> anyhow::Result<SocketAddr> {
    let server = chat_server::server::ChatServer::bind(0).await?;
    let addr = server.local_addr()?;
    tokio::spawn(server.run());
    Ok(addr)
}
