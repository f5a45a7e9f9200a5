//! axum web server for the live dashboard.
//!
//! `GET /metrics` answers with one JSON snapshot. `GET /ws` upgrades to a
//! WebSocket that receives [`Push`] messages: a metrics snapshot twice a
//! second and every level-wide world-change batch as it is published.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{Json, Response};
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;

use super::{BatchView, DashboardState, MetricsSnapshot};

const METRICS_EVERY: Duration = Duration::from_millis(500);

/// One message to a dashboard client, as `{"type": ..., "data": ...}`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Push {
    Metrics(MetricsSnapshot),
    Changes(BatchView),
}

impl Push {
    async fn send_to(&self, socket: &mut WebSocket) -> Result<()> {
        let text = serde_json::to_string(self)?;
        socket.send(Message::Text(text.into())).await?;
        Ok(())
    }
}

pub fn router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Bind the dashboard port and serve until the process exits.
pub async fn start(state: Arc<DashboardState>, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding dashboard port {}", port))?;
    serve(listener, state).await
}

/// Serve the dashboard on an already bound listener.
pub async fn serve(listener: TcpListener, state: Arc<DashboardState>) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("Dashboard listening on http://{}", addr);
    axum::serve(listener, router(state))
        .await
        .context("dashboard server stopped")
}

async fn metrics(State(state): State<Arc<DashboardState>>) -> Json<MetricsSnapshot> {
    Json(state.snapshot())
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<DashboardState>>) -> Response {
    ws.on_upgrade(move |socket| push_loop(socket, state))
}

/// Feed one client until it leaves or the bus closes.
async fn push_loop(mut socket: WebSocket, state: Arc<DashboardState>) {
    let mut changes = state.subscribe_changes();
    let mut ticker = tokio::time::interval(METRICS_EVERY);

    loop {
        let push = tokio::select! {
            _ = ticker.tick() => Push::Metrics(state.snapshot()),
            received = changes.recv() => match received {
                Ok(batch) => match BatchView::from_batch(&batch) {
                    Some(view) => Push::Changes(view),
                    None => continue,
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Dashboard client lagged, skipped {} batches", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return,
            },
            // Clients only listen; anything but a close is ignored.
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            },
        };
        if let Err(e) = push.send_to(&mut socket).await {
            tracing::debug!("Dashboard client dropped: {:#}", e);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::Metrics;
    use crate::levels::LevelDirectory;
    use crate::player_registry::PlayerRegistry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::broadcast;

    fn state() -> Arc<DashboardState> {
        let (bus, _) = broadcast::channel(4);
        Arc::new(DashboardState::new(
            Arc::new(Metrics::new()),
            Arc::new(LevelDirectory::new(std::env::temp_dir().join("cubeworld_dashboard"))),
            Arc::new(PlayerRegistry::new()),
            bus,
            Vec::new(),
        ))
    }

    #[test]
    fn pushes_are_tagged_by_kind() {
        let snapshot = Metrics::new().snapshot(2, 1, Vec::new());
        let value = serde_json::to_value(Push::Metrics(snapshot)).unwrap();
        assert_eq!(value["type"], "metrics");
        assert_eq!(value["data"]["levels_loaded"], 2);
        assert_eq!(value["data"]["ticks_total"], 0);
    }

    #[tokio::test]
    async fn metrics_route_answers_with_a_snapshot() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"ticks_total\":0"));
    }
}
