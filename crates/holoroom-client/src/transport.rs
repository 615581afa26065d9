//! WebSocket connection to the relay.

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use holoroom_common::protocol::{ClientMessage, ServerMessage};
use holoroom_common::{Error, Result};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct RelayConnection {
    read: SplitStream<Socket>,
    writer: JoinHandle<()>,
}

/// Connects and starts forwarding `outbound` to the relay.
pub async fn connect(url: &str, mut outbound: mpsc::Receiver<ClientMessage>) -> Result<RelayConnection> {
    let (socket, _) = connect_async(url)
        .await
        .map_err(|e| Error::transport(format!("failed to connect to {url}: {e}")))?;
    info!("connected to relay: {}", url);

    let (mut write, read) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let text = match message.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode relay frame: {}", e);
                    continue;
                }
            };
            if let Err(e) = write.send(WsMessage::Text(text)).await {
                error!("failed to send relay frame: {}", e);
                break;
            }
        }
        let _ = write.close().await;
    });

    Ok(RelayConnection { read, writer })
}

impl RelayConnection {
    /// Next decodable frame from the relay, or `None` once the socket is
    /// closed. Frames that fail to decode are skipped.
    pub async fn next_message(&mut self) -> Option<ServerMessage> {
        while let Some(frame) = self.read.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match ServerMessage::decode(&text) {
                    Ok(message) => return Some(message),
                    Err(e) => warn!("failed to parse relay frame: {}", e),
                },
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("relay socket error: {}", e);
                    break;
                }
            }
        }
        None
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        self.writer.abort();
    }
}
