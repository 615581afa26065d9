use std::collections::HashMap;
use std::sync::Arc;

use holoroom_common::protocol::{ServerMessage, SessionId};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::envelope::{route_frame, Delivery};

/// Queue feeding one socket's writer task.
pub type Outbox = mpsc::Sender<String>;

/// Live session set. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct Hub {
    sessions: Arc<RwLock<HashMap<SessionId, Outbox>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a socket and queues its `welcome` frame ahead of anything
    /// another session could send it.
    pub async fn join(&self, outbox: Outbox) -> SessionId {
        let session_id = SessionId::new_random();
        let mut sessions = self.sessions.write().await;

        match (ServerMessage::Welcome { session_id }).encode() {
            Ok(frame) => {
                if outbox.try_send(frame).is_err() {
                    warn!(%session_id, "could not queue welcome frame");
                }
            }
            Err(err) => warn!(%session_id, "failed to encode welcome: {}", err),
        }

        sessions.insert(session_id, outbox);
        info!(%session_id, connected = sessions.len(), "session joined");
        session_id
    }

    /// Removes a session and tells everyone left. Leaving twice is a no-op.
    pub async fn leave(&self, session_id: SessionId) {
        let removed = self.sessions.write().await.remove(&session_id).is_some();
        if !removed {
            return;
        }
        info!(%session_id, "session left");

        match (ServerMessage::PlayerDisconnected { session_id }).encode() {
            Ok(frame) => {
                self.broadcast_except(session_id, &frame).await;
            }
            Err(err) => warn!(%session_id, "failed to encode disconnect notice: {}", err),
        }
    }

    pub async fn connected(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Queues `frame` for every session except `sender`; returns how many
    /// accepted it.
    pub async fn broadcast_except(&self, sender: SessionId, frame: &str) -> usize {
        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for (session_id, outbox) in sessions.iter() {
            if *session_id == sender {
                continue;
            }
            if outbox.try_send(frame.to_string()).is_ok() {
                delivered += 1;
            } else {
                warn!(%session_id, "outbox full, dropping frame");
            }
        }
        delivered
    }

    /// Queues `frame` for one session. Returns false when the target is gone
    /// or its outbox is full.
    pub async fn deliver(&self, target: SessionId, frame: String) -> bool {
        let sessions = self.sessions.read().await;
        let Some(outbox) = sessions.get(&target) else {
            return false;
        };
        if outbox.try_send(frame).is_err() {
            warn!(%target, "outbox full, dropping frame");
            return false;
        }
        true
    }

    /// Routes one inbound text frame from `sender`. Never fails: frames that
    /// cannot be routed are dropped.
    pub async fn route(&self, sender: SessionId, text: &str) {
        match route_frame(sender, text) {
            Ok(Delivery::Broadcast) => {
                let delivered = self.broadcast_except(sender, text).await;
                debug!(%sender, delivered, "broadcast frame");
            }
            Ok(Delivery::Direct { target, frame }) => {
                if self.deliver(target, frame).await {
                    debug!(%sender, %target, "delivered frame");
                } else {
                    debug!(%sender, %target, "target unavailable, frame dropped");
                }
            }
            Err(err) => warn!(%sender, "dropping frame: {}", err),
        }
    }
}
