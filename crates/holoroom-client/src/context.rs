use holoroom_common::protocol::{ClientMessage, SessionId};
use tokio::sync::mpsc;
use tracing::warn;

/// Per-connection state shared by everything that talks to the relay.
///
/// Built once per relay connection and passed by reference to the sync
/// loop and the peer registry.
#[derive(Debug)]
pub struct SessionContext {
    local_id: Option<SessionId>,
    display_name: String,
    outbound: mpsc::Sender<ClientMessage>,
}

impl SessionContext {
    pub fn new(display_name: impl Into<String>, outbound: mpsc::Sender<ClientMessage>) -> Self {
        Self {
            local_id: None,
            display_name: display_name.into(),
            outbound,
        }
    }

    /// Context plus the receiving end of its outbound queue.
    pub fn channel(
        display_name: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ClientMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(display_name, tx), rx)
    }

    /// Id assigned by the relay, known once `welcome` arrived.
    pub fn local_id(&self) -> Option<SessionId> {
        self.local_id
    }

    pub fn set_local_id(&mut self, id: SessionId) {
        self.local_id = Some(id);
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Queues a frame for the relay. Drops it when the queue is full or the
    /// connection is gone.
    pub fn emit(&self, message: ClientMessage) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_drops_when_full() {
        let (ctx, mut rx) = SessionContext::channel("kei", 1);
        let id = SessionId::new_random();
        let msg = ClientMessage::PlayerData(holoroom_common::PoseSnapshot::new(id, "kei"));

        assert!(ctx.emit(msg.clone()));
        assert!(!ctx.emit(msg.clone()));
        assert_eq!(rx.try_recv().unwrap(), msg);
    }

    #[test]
    fn test_local_id_starts_unknown() {
        let (mut ctx, _rx) = SessionContext::channel("kei", 4);
        assert_eq!(ctx.local_id(), None);
        let id = SessionId::new_random();
        ctx.set_local_id(id);
        assert_eq!(ctx.local_id(), Some(id));
        assert_eq!(ctx.display_name(), "kei");
    }
}
