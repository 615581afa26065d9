use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use holoroom_common::protocol::{
    ClientMessage, PoseSnapshot, ServerMessage, SessionDescription, SessionId,
};
use holoroom_relay::server::{build_router, serve_listener, AppState};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const QUIET_PERIOD: Duration = Duration::from_millis(200);

async fn start_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState::default(), None);
    tokio::spawn(async move {
        let _ = serve_listener(listener, app).await;
    });
    format!("ws://{addr}/ws")
}

struct Client {
    id: SessionId,
    socket: Socket,
}

impl Client {
    async fn connect(url: &str) -> Self {
        let (mut socket, _) = connect_async(url).await.unwrap();
        let id = match next_message(&mut socket).await {
            Some(ServerMessage::Welcome { session_id }) => session_id,
            other => panic!("expected welcome, got {other:?}"),
        };
        Self { id, socket }
    }

    async fn send(&mut self, msg: &ClientMessage) {
        self.socket
            .send(Message::Text(msg.encode().unwrap()))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), next_message(&mut self.socket))
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
    }

    async fn assert_quiet(&mut self) {
        let res = tokio::time::timeout(QUIET_PERIOD, next_message(&mut self.socket)).await;
        assert!(res.is_err(), "unexpected frame: {res:?}");
    }
}

async fn next_message(socket: &mut Socket) -> Option<ServerMessage> {
    while let Some(msg) = socket.next().await {
        if let Message::Text(text) = msg.ok()? {
            return Some(ServerMessage::decode(&text).unwrap());
        }
    }
    None
}

#[tokio::test]
async fn test_relay_fan_out_between_three_sessions() {
    let url = start_relay().await;
    let mut a = Client::connect(&url).await;
    let mut b = Client::connect(&url).await;
    let mut c = Client::connect(&url).await;

    let mut snapshot = PoseSnapshot::new(a.id, "alice");
    snapshot.headset_position = Some([0.0, 1.6, 0.0]);
    a.send(&ClientMessage::PlayerData(snapshot.clone())).await;

    assert_eq!(b.recv().await, ServerMessage::PlayerData(snapshot.clone()));
    assert_eq!(c.recv().await, ServerMessage::PlayerData(snapshot));
    a.assert_quiet().await;

    a.send(&ClientMessage::Offer {
        target: c.id,
        description: SessionDescription::offer("v=0"),
    })
    .await;

    assert_eq!(
        c.recv().await,
        ServerMessage::Offer {
            sender: a.id,
            description: SessionDescription::offer("v=0"),
        }
    );
    b.assert_quiet().await;
    a.assert_quiet().await;
}

#[tokio::test]
async fn test_disconnect_is_announced_and_late_signals_dropped() {
    let url = start_relay().await;
    let mut a = Client::connect(&url).await;
    let mut b = Client::connect(&url).await;
    let c = Client::connect(&url).await;
    let gone = c.id;

    drop(c);

    assert_eq!(
        a.recv().await,
        ServerMessage::PlayerDisconnected { session_id: gone }
    );
    assert_eq!(
        b.recv().await,
        ServerMessage::PlayerDisconnected { session_id: gone }
    );

    a.send(&ClientMessage::Answer {
        target: gone,
        description: SessionDescription::answer("v=0"),
    })
    .await;
    a.assert_quiet().await;

    // the sender's socket is still healthy afterwards
    a.send(&ClientMessage::PlayerData(PoseSnapshot::new(a.id, "alice")))
        .await;
    assert!(matches!(b.recv().await, ServerMessage::PlayerData(_)));
}
