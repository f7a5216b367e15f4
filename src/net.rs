//! The point-to-point transport: persistent, length-prefixed TCP streams,
//! one per directed (sender, receiver) pair, reused across sends so that
//! pair gets the FIFO ordering the protocol assumes from the underlying
//! channel rather than having to implement it itself.
//!
//! Framing mirrors the length-prefixed style used elsewhere in this
//! codebase's TCP transports: an 8-byte big-endian length followed by the
//! encoded payload, here a `bincode`-serialized [`WireMessage`].

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;

use crate::config::Config;
use crate::message::WireMessage;

const CONNECT_RETRIES: u32 = 3;

enum Outbound {
    Unicast(usize, WireMessage),
    Broadcast(WireMessage),
}

/// The sending half: cheap to hold behind the coordinator's guard since
/// `send_to`/`broadcast` only push onto an unbounded channel, never await.
#[derive(Clone)]
pub struct TransportHandle {
    n: usize,
    self_rank: usize,
    outbound: UnboundedSender<Outbound>,
}

impl TransportHandle {
    pub fn send_to(&self, target_id: i64, msg: WireMessage) {
        let rank = (target_id - 1) as usize;
        if rank >= self.n {
            warn!(target_id, "dropping send to out-of-range peer");
            return;
        }
        let _ = self.outbound.send(Outbound::Unicast(rank, msg));
    }

    pub fn broadcast(&self, msg: WireMessage) {
        let _ = self.outbound.send(Outbound::Broadcast(msg));
    }
}

/// The receiving half: exclusively owned by the driver's receiver task.
pub struct InboundChannel {
    inbound: UnboundedReceiver<WireMessage>,
}

impl InboundChannel {
    pub fn poll_receive(&mut self) -> Option<WireMessage> {
        self.inbound.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.inbound.recv().await
    }
}

/// Binds this process's listener and spawns the background accept and
/// sender tasks. Returns once the listener is bound; connections to peers
/// are opened lazily on first send.
pub async fn bind(config: &Config) -> anyhow::Result<(TransportHandle, InboundChannel)> {
    let addr = config.peers[config.rank()];
    let listener = TcpListener::bind(addr).await?;

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(accept_loop(listener, inbound_tx));

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let peers = config.peers.clone();
    let self_rank = config.rank();
    tokio::spawn(sender_loop(outbound_rx, peers, self_rank));

    Ok((
        TransportHandle {
            n: config.peers.len(),
            self_rank,
            outbound: outbound_tx,
        },
        InboundChannel { inbound: inbound_rx },
    ))
}

async fn accept_loop(listener: TcpListener, inbound_tx: UnboundedSender<WireMessage>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                tokio::spawn(read_task(stream, inbound_tx.clone(), remote));
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
            }
        }
    }
}

async fn read_task(mut stream: TcpStream, inbound_tx: UnboundedSender<WireMessage>, remote: SocketAddr) {
    loop {
        let len = match stream.read_u64().await {
            Ok(len) => len as usize,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::UnexpectedEof {
                    warn!(%remote, error = %err, "read failed");
                }
                return;
            }
        };
        let mut buf = vec![0u8; len];
        if let Err(err) = stream.read_exact(&mut buf).await {
            warn!(%remote, error = %err, "read failed");
            return;
        }
        match bincode::deserialize::<WireMessage>(&buf) {
            Ok(msg) => {
                if inbound_tx.send(msg).is_err() {
                    return;
                }
            }
            Err(err) => warn!(%remote, error = %err, "failed to decode message"),
        }
    }
}

async fn sender_loop(mut outbound_rx: UnboundedReceiver<Outbound>, peers: Vec<SocketAddr>, self_rank: usize) {
    let mut connections: HashMap<usize, OwnedWriteHalf> = HashMap::new();
    while let Some(outbound) = outbound_rx.recv().await {
        match outbound {
            Outbound::Unicast(rank, msg) => {
                if let Err(err) = send_to_rank(&mut connections, &peers, rank, &msg).await {
                    warn!(peer = rank, error = %err, "failed to deliver message");
                }
            }
            Outbound::Broadcast(msg) => {
                for rank in 0..peers.len() {
                    if rank == self_rank {
                        continue;
                    }
                    if let Err(err) = send_to_rank(&mut connections, &peers, rank, &msg).await {
                        warn!(peer = rank, error = %err, "failed to deliver broadcast message");
                    }
                }
            }
        }
    }
}

async fn send_to_rank(
    connections: &mut HashMap<usize, OwnedWriteHalf>,
    peers: &[SocketAddr],
    rank: usize,
    msg: &WireMessage,
) -> anyhow::Result<()> {
    let buf = bincode::serialize(msg)?;
    let mut attempt = 0;
    loop {
        if !connections.contains_key(&rank) {
            let stream = TcpStream::connect(peers[rank]).await?;
            stream.set_nodelay(true).ok();
            let (_, write_half) = stream.into_split();
            connections.insert(rank, write_half);
        }
        let write_half = connections.get_mut(&rank).expect("just inserted");
        let write_result: anyhow::Result<()> = async {
            write_half.write_u64(buf.len() as u64).await?;
            write_half.write_all(&buf).await?;
            Ok(())
        }
        .await;
        match write_result {
            Ok(()) => return Ok(()),
            Err(err) => {
                connections.remove(&rank);
                attempt += 1;
                if attempt >= CONNECT_RETRIES {
                    return Err(err);
                }
            }
        }
    }
}
