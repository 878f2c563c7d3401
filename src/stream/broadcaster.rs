use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{CHANNEL_CAPACITY, CLIENT_OUTBOUND_CAPACITY};
use crate::error::{AppError, Result};
use crate::stream::messages::{ServerMessage, SubscribedData, WelcomeData};

pub type ConnId = u64;

/// Frames queued for one socket, already serialized.
pub type Outbound = mpsc::Receiver<Arc<str>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcasterStats {
    pub connections: usize,
    pub delivered_total: u64,
    pub dropped_total: u64,
}

enum Command {
    Connect {
        league_keys: Vec<String>,
        reply: oneshot::Sender<(ConnId, Outbound)>,
    },
    Resubscribe {
        id: ConnId,
        league_keys: Vec<String>,
    },
    Disconnect {
        id: ConnId,
    },
    Publish(ServerMessage),
    Stats {
        reply: oneshot::Sender<BroadcasterStats>,
    },
}

struct Connection {
    /// `None` = subscribed to every league.
    filter: Option<HashSet<String>>,
    tx: mpsc::Sender<Arc<str>>,
}

impl Connection {
    fn wants(&self, league_keys: &[String]) -> bool {
        match &self.filter {
            None => true,
            Some(_) if league_keys.is_empty() => true,
            Some(filter) => league_keys.iter().any(|k| filter.contains(k)),
        }
    }
}

fn to_filter(league_keys: &[String]) -> Option<HashSet<String>> {
    if league_keys.is_empty() {
        None
    } else {
        Some(league_keys.iter().cloned().collect())
    }
}

fn encode(msg: &ServerMessage) -> Option<Arc<str>> {
    match serde_json::to_string(msg) {
        Ok(s) => Some(Arc::from(s)),
        Err(e) => {
            warn!("failed to encode {} frame: {e}", msg.kind());
            None
        }
    }
}

/// Owns the live connection set. All mutations and fan-outs run on the one
/// task executing [`Broadcaster::run`], so they never interleave.
pub struct Broadcaster {
    rx: mpsc::Receiver<Command>,
    connections: HashMap<ConnId, Connection>,
    next_id: ConnId,
    delivered_total: u64,
    dropped_total: u64,
}

/// Cloneable address of the broadcaster task.
#[derive(Clone)]
pub struct BroadcasterHandle {
    tx: mpsc::Sender<Command>,
}

impl Broadcaster {
    pub fn new() -> (Self, BroadcasterHandle) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let actor = Self {
            rx,
            connections: HashMap::new(),
            next_id: 1,
            delivered_total: 0,
            dropped_total: 0,
        };
        (actor, BroadcasterHandle { tx })
    }

    pub async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd);
        }
        info!(connections = self.connections.len(), "broadcaster stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { league_keys, reply } => {
                let id = self.next_id;
                self.next_id += 1;
                let (tx, rx) = mpsc::channel(CLIENT_OUTBOUND_CAPACITY);
                let welcome = ServerMessage::Welcome(WelcomeData {
                    connection_id: id,
                    subscribed_all: league_keys.is_empty(),
                    league_keys: league_keys.clone(),
                });
                if let Some(frame) = encode(&welcome) {
                    let _ = tx.try_send(frame);
                }
                if reply.send((id, rx)).is_err() {
                    debug!(conn_id = id, "client went away before registration completed");
                    return;
                }
                self.connections.insert(id, Connection { filter: to_filter(&league_keys), tx });
                info!(conn_id = id, league_keys = ?league_keys, live = self.connections.len(), "stream client connected");
            }
            Command::Resubscribe { id, league_keys } => {
                let Some(conn) = self.connections.get_mut(&id) else {
                    return;
                };
                conn.filter = to_filter(&league_keys);
                let ack = ServerMessage::Subscribed(SubscribedData {
                    subscribed_all: league_keys.is_empty(),
                    league_keys: league_keys.clone(),
                });
                let failed = encode(&ack).map_or(false, |frame| conn.tx.try_send(frame).is_err());
                debug!(conn_id = id, league_keys = ?league_keys, "stream client resubscribed");
                if failed {
                    self.drop_connection(id, "ack send failed");
                }
            }
            Command::Disconnect { id } => {
                if self.connections.remove(&id).is_some() {
                    info!(conn_id = id, live = self.connections.len(), "stream client disconnected");
                }
            }
            Command::Publish(msg) => self.publish(&msg),
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn publish(&mut self, msg: &ServerMessage) {
        let Some(frame) = encode(msg) else {
            return;
        };
        let league_keys = msg.league_keys();

        let mut delivered = 0u64;
        let mut failed: Vec<ConnId> = Vec::new();
        for (id, conn) in &self.connections {
            if !conn.wants(league_keys) {
                continue;
            }
            match conn.tx.try_send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(_) => failed.push(*id),
            }
        }
        for id in &failed {
            self.drop_connection(*id, "send failed");
        }
        self.delivered_total += delivered;

        info!(
            kind = msg.kind(),
            league_keys = ?league_keys,
            delivered,
            dropped = failed.len(),
            live = self.connections.len(),
            "broadcast"
        );
    }

    /// Removing the connection drops its sender, which ends the socket task.
    fn drop_connection(&mut self, id: ConnId, reason: &str) {
        if self.connections.remove(&id).is_some() {
            self.dropped_total += 1;
            warn!(conn_id = id, reason, "dropping stream client");
        }
    }

    fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            connections: self.connections.len(),
            delivered_total: self.delivered_total,
            dropped_total: self.dropped_total,
        }
    }
}

impl BroadcasterHandle {
    /// Registers a connection. An empty key list subscribes to everything.
    /// The returned queue starts with the welcome frame.
    pub async fn connect(&self, league_keys: Vec<String>) -> Result<(ConnId, Outbound)> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { league_keys, reply }).await?;
        rx.await.map_err(|e| AppError::ChannelSend(e.to_string()))
    }

    pub async fn resubscribe(&self, id: ConnId, league_keys: Vec<String>) -> Result<()> {
        self.send(Command::Resubscribe { id, league_keys }).await
    }

    pub async fn disconnect(&self, id: ConnId) {
        if let Err(e) = self.send(Command::Disconnect { id }).await {
            debug!(conn_id = id, "disconnect after broadcaster shutdown: {e}");
        }
    }

    pub async fn publish(&self, msg: ServerMessage) -> Result<()> {
        self.send(Command::Publish(msg)).await
    }

    pub async fn stats(&self) -> Result<BroadcasterStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|e| AppError::ChannelSend(e.to_string()))
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| AppError::ChannelSend("broadcaster is not running".to_string()))
    }
}
