use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::{RelayConfig, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_OUTBOX_CAPACITY};
use crate::hub::Hub;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub max_message_bytes: usize,
    pub outbox_capacity: usize,
}

impl AppState {
    pub fn new(max_message_bytes: usize, outbox_capacity: usize) -> Self {
        Self {
            hub: Hub::new(),
            max_message_bytes,
            outbox_capacity: outbox_capacity.max(1),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_OUTBOX_CAPACITY)
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health));

    if let Some(dir) = static_dir {
        if !dir.is_dir() {
            warn!("static directory {} does not exist", dir.display());
        }
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        sessions: state.hub.connected().await,
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.max_message_bytes)
        .max_frame_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(stream: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::channel::<String>(state.outbox_capacity);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    let session_id = state.hub.join(tx).await;

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = disconnect_tx.try_send(());
    });

    loop {
        tokio::select! {
            _ = disconnect_rx.recv() => {
                break;
            }
            msg = receiver.next() => {
                let Some(msg) = msg else { break; };
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(err) => {
                        debug!(%session_id, "socket error: {}", err);
                        break;
                    }
                };

                match msg {
                    Message::Text(text) => state.hub.route(session_id, &text).await,
                    Message::Binary(_) => debug!(%session_id, "ignoring binary frame"),
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }

    state.hub.leave(session_id).await;
    writer.abort();
}

/// Serves the relay on an already-bound listener until it fails.
pub async fn serve_listener(listener: TcpListener, app: Router) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub async fn run(config: RelayConfig) -> Result<()> {
    let state = AppState::new(config.max_message_bytes, config.outbox_capacity);
    let app = build_router(state, Some(&config.static_dir));

    match config.tls() {
        Some((cert, key)) => serve_tls(config.listen, app, cert, key).await,
        None => {
            let listener = TcpListener::bind(config.listen)
                .await
                .with_context(|| format!("failed to bind {}", config.listen))?;
            info!("relay listening on ws://{}/ws", listener.local_addr()?);
            serve_listener(listener, app).await
        }
    }
}

async fn serve_tls(addr: SocketAddr, app: Router, cert: &Path, key: &Path) -> Result<()> {
    let tls = RustlsConfig::from_pem_file(cert, key)
        .await
        .with_context(|| format!("failed to load TLS material from {}", cert.display()))?;

    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    info!("relay listening on wss://{}/ws", addr);
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
