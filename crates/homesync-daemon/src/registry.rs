//! Client registry and broadcast dispatcher.
//!
//! Each connection is represented here by the sending half of its outbound
//! frame channel; the socket task on the other end drains it.  All sends use
//! `try_send`, so a slow or dead socket only ever loses its own frames.
//!
//! The registry is owned by `SyncCore` and only touched from its loop, which
//! makes every role-counter update atomic with respect to observers.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::body::Bytes;
use homesync_proto::protocol::{ClientStats, Outbound, Role};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

pub type ClientId = u64;

/// One unit of outbound traffic for a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close,
}

struct ClientEntry {
    role: Role,
    peer: Option<SocketAddr>,
    tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientEntry>,
    listeners: usize,
    admins: usize,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(&self, id: ClientId) -> Option<Role> {
        self.clients.get(&id).map(|c| c.role)
    }

    pub fn stats(&self) -> ClientStats {
        let total = self.clients.len();
        ClientStats {
            total,
            listeners: self.listeners,
            admins: self.admins,
            unknown: total - self.listeners - self.admins,
        }
    }

    /// Add a connection with an unknown role.
    pub fn register(&mut self, id: ClientId, peer: Option<SocketAddr>, tx: mpsc::Sender<Frame>) {
        if let Some(old) = self.clients.insert(
            id,
            ClientEntry {
                role: Role::Unknown,
                peer,
                tx,
            },
        ) {
            // ids are never reused, but keep the counters honest if one is
            error!("Client {} registered twice", id);
            self.adjust(old.role, false);
        }
        info!("Client {} connected from {}", id, fmt_peer(peer));
    }

    /// Change a connection's role.  Returns the previous role, or `None` if
    /// the connection is not registered.
    pub fn identify(&mut self, id: ClientId, role: Role) -> Option<Role> {
        let entry = self.clients.get_mut(&id)?;
        let old = std::mem::replace(&mut entry.role, role);
        self.adjust(old, false);
        self.adjust(role, true);
        info!("Client {} identified as {} (was {})", id, role, old);
        Some(old)
    }

    /// Drop a connection.  Returns its last known role.
    pub fn unregister(&mut self, id: ClientId) -> Option<Role> {
        let entry = self.clients.remove(&id)?;
        self.adjust(entry.role, false);
        info!(
            "Client {} ({}) disconnected from {}",
            id,
            entry.role,
            fmt_peer(entry.peer)
        );
        Some(entry.role)
    }

    fn adjust(&mut self, role: Role, increment: bool) {
        let counter = match role {
            Role::Listener => &mut self.listeners,
            Role::Admin => &mut self.admins,
            Role::Unknown => return,
        };
        if increment {
            *counter += 1;
        } else {
            *counter = counter.saturating_sub(1);
        }
    }

    /// Queue a frame for one connection.  Returns false if it was dropped.
    pub fn send_frame(&self, id: ClientId, frame: Frame) -> bool {
        match self.clients.get(&id) {
            Some(entry) => try_deliver(id, &entry.tx, frame),
            None => {
                debug!("Client {} is gone, dropping frame", id);
                false
            }
        }
    }

    pub fn send(&self, id: ClientId, message: &Outbound) -> bool {
        match message.to_json() {
            Ok(json) => self.send_frame(id, Frame::Text(json)),
            Err(e) => {
                error!("Failed to encode {}: {}", message.kind(), e);
                false
            }
        }
    }

    /// Deliver `message` to every live connection.  Failed sends are skipped,
    /// never unregistered: removal only follows the connection's own close.
    /// Returns how many connections accepted the frame.
    pub fn broadcast(&self, message: &Outbound) -> usize {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode {}: {}", message.kind(), e);
                return 0;
            }
        };
        let delivered = self
            .clients
            .iter()
            .filter(|(id, entry)| try_deliver(**id, &entry.tx, Frame::Text(json.clone())))
            .count();
        debug!(
            "Broadcast {} to {}/{} clients",
            message.kind(),
            delivered,
            self.clients.len()
        );
        delivered
    }

    /// Ask every connection to close and forget about all of them.
    pub fn close_all(&mut self) {
        for (id, entry) in self.clients.drain() {
            let _ = entry.tx.try_send(Frame::Close);
            debug!("Closing client {}", id);
        }
        self.listeners = 0;
        self.admins = 0;
    }
}

fn try_deliver(id: ClientId, tx: &mpsc::Sender<Frame>, frame: Frame) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("Client {} is not keeping up, frame dropped", id);
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Client {} channel closed, frame dropped", id);
            false
        }
    }
}

fn fmt_peer(peer: Option<SocketAddr>) -> String {
    peer.map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
