//! WebSocket endpoint.  One task per connection shuttles frames between the
//! socket and SyncCore: inbound text is parsed into `Inbound` messages,
//! outbound frames are drained from the connection's own channel.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use homesync_proto::protocol::Inbound;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::SyncEvent;
use crate::http::HttpState;
use crate::registry::{ClientId, Frame};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    peer: Option<ConnectInfo<SocketAddr>>,
    State(state): State<HttpState>,
) -> impl IntoResponse {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| handle_client(socket, peer, state))
}

async fn handle_client(socket: WebSocket, peer: Option<SocketAddr>, state: HttpState) {
    let id: ClientId = state.next_client_id.fetch_add(1, Ordering::Relaxed);
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(state.client_buffer);

    if state
        .event_tx
        .send(SyncEvent::ClientConnected {
            id,
            peer,
            tx: frame_tx,
        })
        .await
        .is_err()
    {
        warn!("SyncEvent channel closed, refusing client {}", id);
        return;
    }

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match Inbound::parse(&text) {
                        Ok(message) => {
                            let evt = SyncEvent::ClientMessage { id, message };
                            if state.event_tx.send(evt).await.is_err() {
                                warn!("SyncEvent channel closed");
                                break;
                            }
                        }
                        Err(e) => warn!("Invalid message from client {}: {}", id, e),
                    },
                    Some(Ok(Message::Binary(data))) => {
                        debug!("Client {} sent {} binary bytes, ignoring", id, data.len());
                    }
                    // Pings are answered by axum itself
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client {} closed connection", id);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("Read error from client {}: {}", id, e);
                        break;
                    }
                }
            }

            frame = frame_rx.recv() => {
                let message = match frame {
                    Some(Frame::Text(json)) => Message::Text(json),
                    Some(Frame::Binary(data)) => Message::Binary(data.to_vec()),
                    Some(Frame::Close) | None => {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = sender.send(message).await {
                    debug!("Write to client {} failed: {}", id, e);
                    break;
                }
            }
        }
    }

    let _ = state
        .event_tx
        .send(SyncEvent::ClientDisconnected { id })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Intervals, SyncCore};
    use crate::http::{router, HttpState};
    use homesync_proto::catalog::{Catalog, Track};
    use homesync_proto::protocol::ClientStats;
    use homesync_proto::timeline::now_ms;
    use serde_json::Value;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Serve the full router on an ephemeral port, backed by a running core.
    async fn serve() -> (SocketAddr, mpsc::Sender<SyncEvent>) {
        let catalog = Arc::new(Catalog::new(vec![Track {
            id: 0,
            name: "only".to_string(),
            filename: "only.mp3".to_string(),
            duration_ms: 120_000,
            size_bytes: 0,
            path: PathBuf::from("/nonexistent/only.mp3"),
        }]));
        let (tx, rx) = mpsc::channel(64);
        let core = SyncCore::new(catalog, tx.clone(), now_ms());
        // Timers far enough apart that no heartbeat lands mid-test
        let intervals = Intervals {
            advance: Duration::from_secs(3600),
            heartbeat: Duration::from_secs(3600),
        };
        tokio::spawn(core.run(rx, intervals));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(HttpState::new(tx.clone(), 16));
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        (addr, tx)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        ws
    }

    /// Next text frame as JSON, skipping binary audio and control frames.
    async fn next_json(ws: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a frame");
            match msg {
                Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(WsMessage::Binary(_)))
                | Some(Ok(WsMessage::Ping(_)))
                | Some(Ok(WsMessage::Pong(_))) => continue,
                other => panic!("unexpected frame {:?}", other),
            }
        }
    }

    async fn stats(tx: &mpsc::Sender<SyncEvent>) -> ClientStats {
        let (reply, answer) = oneshot::channel();
        tx.send(SyncEvent::Status { reply }).await.unwrap();
        answer.await.unwrap().clients
    }

    async fn wait_for_total(tx: &mpsc::Sender<SyncEvent>, total: usize) {
        for _ in 0..200 {
            if stats(tx).await.total == total {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("client total never reached {}", total);
    }

    #[tokio::test]
    async fn test_initial_first_and_malformed_input_keeps_connection() {
        let (addr, _tx) = serve().await;
        let mut ws = connect(addr).await;

        let initial = next_json(&mut ws).await;
        assert_eq!(initial["type"], "initial");
        assert_eq!(initial["trackName"], "only");

        ws.send(WsMessage::Text("not json".to_string())).await.unwrap();
        ws.send(WsMessage::Text(r#"{"type":"bogus"}"#.to_string()))
            .await
            .unwrap();
        ws.send(WsMessage::Text(r#"{"type":"requestSync"}"#.to_string()))
            .await
            .unwrap();

        let sync = next_json(&mut ws).await;
        assert_eq!(sync["type"], "sync");
        assert_eq!(sync["clients"]["total"], 1);
    }

    #[tokio::test]
    async fn test_client_close_unregisters() {
        let (addr, tx) = serve().await;
        let mut first = connect(addr).await;
        let mut second = connect(addr).await;
        next_json(&mut first).await;
        next_json(&mut second).await;
        wait_for_total(&tx, 2).await;

        first.close(None).await.unwrap();
        wait_for_total(&tx, 1).await;

        // The remaining connection is untouched
        second
            .send(WsMessage::Text(r#"{"type":"getPlaybackState"}"#.to_string()))
            .await
            .unwrap();
        let update = next_json(&mut second).await;
        assert_eq!(update["type"], "playbackState");
        assert_eq!(update["clients"]["total"], 1);
    }

    #[tokio::test]
    async fn test_shutdown_sends_close_frame() {
        let (addr, tx) = serve().await;
        let mut ws = connect(addr).await;
        next_json(&mut ws).await;

        tx.send(SyncEvent::Shutdown).await.unwrap();

        let mut saw_close = false;
        while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_secs(5), ws.next()).await {
            match msg {
                Ok(WsMessage::Close(_)) => {
                    saw_close = true;
                    break;
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        assert!(saw_close);
    }
}
