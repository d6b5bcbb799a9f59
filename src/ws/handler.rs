//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::PlayerId;
use crate::util::rate_limit::InputRateLimiter;

use super::protocol::decode_client;
use super::session::{forward_fanout, Outbound, Session};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.outbound_buffer);

    let (session, subscription) = Session::open(&state, outbound_tx.clone());
    let player_id = session.id().to_string();
    info!(player_id = %player_id, "New WebSocket connection");

    // Writer task: outbound queue -> WebSocket
    let writer_handle = tokio::spawn(write_loop(player_id.clone(), ws_sink, outbound_rx));

    // Fanout task: arena channel -> outbound queue
    let fanout_handle = tokio::spawn(forward_fanout(
        player_id.clone(),
        subscription,
        outbound_tx,
    ));

    let rate_limiter = InputRateLimiter::new(state.config.input_rate_limit);

    // Reader loop: WebSocket -> world store
    loop {
        tokio::select! {
            _ = session.evicted() => {
                info!(player_id = %player_id, "Closing evicted connection");
                break;
            }
            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !rate_limiter.check_input() {
                        warn!(
                            player_id = %player_id,
                            code = dropped_code(&text),
                            "Rate limited input message dropped"
                        );
                        continue;
                    }
                    session.handle_text(&text);
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(player_id = %player_id, "Received binary message, ignoring");
                }
                Some(Ok(Message::Ping(_))) => {
                    debug!(player_id = %player_id, "Received ping");
                }
                Some(Ok(Message::Pong(_))) => {
                    session.handle_pong();
                }
                Some(Ok(Message::Close(_))) => {
                    info!(player_id = %player_id, "Client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    error!(player_id = %player_id, error = %e, "WebSocket error");
                    break;
                }
                None => {
                    debug!(player_id = %player_id, "WebSocket stream ended");
                    break;
                }
            }
        }
    }

    // Unsubscribe, stop writing and drop the transport
    fanout_handle.abort();
    writer_handle.abort();
    session.close();

    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Code of a frame dropped by the flood guard, for the warning
fn dropped_code(text: &str) -> &'static str {
    decode_client(text).map(|msg| msg.code()).unwrap_or("unrecognized")
}

/// Drain the outbound queue into the socket until either side goes away
async fn write_loop(
    player_id: PlayerId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let msg = match frame {
            Outbound::Text(json) => Message::Text(json),
            Outbound::Fanout(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => Message::Text(text),
                Err(e) => Message::Binary(e.into_bytes()),
            },
            Outbound::Probe => Message::Ping(Vec::new()),
        };

        if let Err(e) = ws_sink.send(msg).await {
            debug!(player_id = %player_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use serde_json::Value;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{sleep, timeout, timeout_at, Instant};
    use tokio_tungstenite::{
        connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
    };

    use super::*;
    use crate::config::Config;
    use crate::fanout::LocalBroker;
    use crate::http::build_router;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Serve a full gateway on an ephemeral port with a fast liveness sweep
    async fn start_gateway() -> (AppState, SocketAddr) {
        let config = Config {
            liveness_period: Duration::from_millis(200),
            ..Config::default()
        };
        let state = AppState::new(config, LocalBroker::shared());
        tokio::spawn(state.ticker.clone().run());
        tokio::spawn(state.liveness.clone().run());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (state, addr)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        client
    }

    /// Next JSON text frame; control frames are skipped (reading answers pings)
    async fn next_json(client: &mut Client) -> Value {
        loop {
            match client.next().await {
                Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {:?}", other),
            }
        }
    }

    async fn wait_for_player_count(state: &AppState, expected: usize) {
        timeout(Duration::from_secs(3), async {
            while state.world.player_count() != expected {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "player count stuck at {}, expected {}",
                state.world.player_count(),
                expected
            )
        });
    }

    #[tokio::test]
    async fn register_then_set_name_shows_in_snapshot() {
        let (state, addr) = start_gateway().await;
        let mut client = connect(addr).await;

        let register = next_json(&mut client).await;
        assert_eq!(register["code"], "register");
        let id = register["payload"]["id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 8);
        assert_eq!(state.world.player_count(), 1);

        client
            .send(WsMessage::Text(
                r#"{"code":"set_name","payload":{"name":"Rey","ship":"X1"}}"#.into(),
            ))
            .await
            .unwrap();

        let player = timeout(Duration::from_secs(2), async {
            loop {
                let msg = next_json(&mut client).await;
                if msg["code"] != "player_state" {
                    continue;
                }
                let player = &msg["payload"]["players"][id.as_str()];
                if player["name"] == "Rey" {
                    return player.clone();
                }
            }
        })
        .await
        .expect("set_name never reached a snapshot");

        assert_eq!(player["ship"], "X1");
        assert_eq!(player["health"], 100);
    }

    #[tokio::test]
    async fn client_that_never_answers_pings_is_evicted() {
        let (state, addr) = start_gateway().await;

        // Never read, so the client never answers a websocket ping
        let _silent = connect(addr).await;
        wait_for_player_count(&state, 1).await;

        // First sweep pings, second sweep evicts
        wait_for_player_count(&state, 0).await;
        assert_eq!(state.liveness.session_count(), 0);
    }

    #[tokio::test]
    async fn responsive_client_gets_one_ping_report() {
        let (state, addr) = start_gateway().await;
        let mut client = connect(addr).await;

        // Several sweeps; tungstenite answers each ping while we read
        let deadline = Instant::now() + Duration::from_millis(1100);
        let mut ping_reports = Vec::new();
        while let Ok(frame) = timeout_at(deadline, client.next()).await {
            match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let msg: Value = serde_json::from_str(&text).unwrap();
                    if msg["code"] == "ping" {
                        ping_reports.push(msg["payload"]["ping"].clone());
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("connection ended: {:?}", other),
            }
        }

        assert_eq!(ping_reports.len(), 1, "got {:?}", ping_reports);
        assert!(ping_reports[0].as_str().unwrap().ends_with("ms"));
        assert_eq!(state.world.player_count(), 1);
        assert_eq!(state.liveness.session_count(), 1);
    }

    #[test]
    fn dropped_frames_are_labelled_by_code() {
        assert_eq!(
            dropped_code(r#"{"code":"player_hit","payload":{"playerHit":"A1"}}"#),
            "player_hit"
        );
        assert_eq!(dropped_code("garbage"), "unrecognized");
    }
}
