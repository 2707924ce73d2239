//! Common test utilities for evbus-client integration tests
//!
//! [`MockBroker`] is a small in-process WebSocket endpoint that speaks the
//! bus protocol: it checks tokens, tracks subscriptions per connection,
//! answers pings and forwards published events to the other subscribed
//! connections. Every decoded client frame is also handed to the test.

use evbus_client::{BusConfig, ConnectionStatus, EventBus};
use evbus_core::{codec, ClientFrame, EventType, RawEvent, ServerFrame, TokenData};
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// The only token the broker accepts
pub const VALID_TOKEN: &str = "valid-token";

const WAIT: Duration = Duration::from_secs(5);

struct Connection {
    tx: mpsc::UnboundedSender<Message>,
    subscriptions: HashSet<EventType>,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    accepted: usize,
    mute_pongs: bool,
    connections: HashMap<u64, Connection>,
}

/// Mock event-bus endpoint
pub struct MockBroker {
    addr: SocketAddr,
    state: Arc<Mutex<BrokerState>>,
    frames_rx: mpsc::UnboundedReceiver<ClientFrame>,
    accept_task: JoinHandle<()>,
}

impl MockBroker {
    /// Bind to an ephemeral port and start accepting connections
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(BrokerState::default()));
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&accept_state), frames_tx.clone()));
            }
        });

        Self {
            addr,
            state,
            frames_rx,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Connections accepted since start
    pub fn accepted(&self) -> usize {
        self.state.lock().unwrap().accepted
    }

    /// Stop answering pings
    pub fn mute_pongs(&self, mute: bool) {
        self.state.lock().unwrap().mute_pongs = mute;
    }

    /// Close every open connection from the broker side
    pub fn drop_connections(&self) {
        let mut state = self.state.lock().unwrap();
        for (_, conn) in state.connections.drain() {
            let _ = conn.tx.send(Message::Close(None));
        }
    }

    /// Send a raw text frame to every open connection
    pub fn inject(&self, text: &str) {
        let state = self.state.lock().unwrap();
        for conn in state.connections.values() {
            let _ = conn.tx.send(Message::Text(text.to_string()));
        }
    }

    /// Next client frame, or `None` after a few seconds of silence
    pub async fn next_frame(&mut self) -> Option<ClientFrame> {
        tokio::time::timeout(WAIT, self.frames_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Skip frames until one matches
    pub async fn wait_for_frame<F>(&mut self, matches: F) -> Option<ClientFrame>
    where
        F: Fn(&ClientFrame) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.frames_rx.recv())
                .await
                .ok()
                .flatten()?;
            if matches(&frame) {
                return Some(frame);
            }
        }
    }

    /// Stop accepting and close every connection
    pub fn shutdown(self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

async fn serve(
    stream: TcpStream,
    state: Arc<Mutex<BrokerState>>,
    frames_tx: mpsc::UnboundedSender<ClientFrame>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let id = {
        let mut state = state.lock().unwrap();
        state.accepted += 1;
        state.next_id += 1;
        let id = state.next_id;
        state.connections.insert(
            id,
            Connection {
                tx: tx.clone(),
                subscriptions: HashSet::new(),
            },
        );
        id
    };

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if write.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(message)) = read.next().await {
        match message {
            Message::Text(text) => {
                let Ok(frame) = codec::decode_client_frame(&text) else {
                    continue;
                };
                handle_frame(&state, id, &tx, frame.clone());
                let _ = frames_tx.send(frame);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.lock().unwrap().connections.remove(&id);
    writer.abort();
}

fn send_frame(tx: &mpsc::UnboundedSender<Message>, frame: &ServerFrame) {
    let text = codec::encode_server_frame(frame).unwrap();
    let _ = tx.send(Message::Text(text));
}

fn handle_frame(
    state: &Mutex<BrokerState>,
    id: u64,
    tx: &mpsc::UnboundedSender<Message>,
    frame: ClientFrame,
) {
    let mut state = state.lock().unwrap();
    match frame {
        ClientFrame::AuthRequest { token, client_id } => {
            let reply = if token == VALID_TOKEN {
                ServerFrame::AuthSuccess {
                    token_data: TokenData {
                        user_id: format!("user-{}", client_id),
                        permissions: vec!["publish".into(), "subscribe".into()],
                    },
                }
            } else {
                ServerFrame::AuthFailed {
                    reason: "invalid token".into(),
                }
            };
            send_frame(tx, &reply);
        }
        ClientFrame::Subscribe { event_types } => {
            if let Some(conn) = state.connections.get_mut(&id) {
                conn.subscriptions.extend(event_types);
            }
        }
        ClientFrame::Unsubscribe { event_types } => {
            if let Some(conn) = state.connections.get_mut(&id) {
                for event_type in event_types {
                    conn.subscriptions.remove(&event_type);
                }
            }
        }
        ClientFrame::Ping => {
            if !state.mute_pongs {
                send_frame(tx, &ServerFrame::Pong);
            }
        }
        ClientFrame::PublishEvent(publish) => {
            let event_type = publish.event_type;
            let frame = ServerFrame::Event {
                event: RawEvent {
                    id: publish.event_id,
                    event_type: event_type.as_str().to_string(),
                    source: publish.source,
                    timestamp: publish.timestamp,
                    payload: publish.payload,
                    correlation_id: publish.correlation_id,
                    reply_to: publish.reply_to.map(|ty| ty.as_str().to_string()),
                    user_id: publish.user_id,
                },
            };
            for (other, conn) in &state.connections {
                if *other != id && conn.subscriptions.contains(&event_type) {
                    send_frame(&conn.tx, &frame);
                }
            }
        }
    }
}

/// Configuration with short delays suitable for tests
pub fn bus_config(url: &str, client_id: &str) -> BusConfig {
    BusConfig::new(url)
        .with_client_id(client_id)
        .with_auth_token(VALID_TOKEN)
        .with_reconnect_delay(Duration::from_millis(50), Duration::from_millis(500))
}

/// Wait until the bus reports `status`; false on timeout
pub async fn wait_for_status(bus: &EventBus, status: ConnectionStatus) -> bool {
    let mut changes = bus.status_changes();
    let reached = tokio::time::timeout(WAIT, changes.wait_for(|s| *s == status)).await;
    matches!(reached, Ok(Ok(_)))
}

/// Poll `condition` every 10ms until it holds; false on timeout
pub async fn eventually<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_broker_creation() {
        let broker = MockBroker::start().await;
        assert!(broker.url().starts_with("ws://127.0.0.1:"));
        assert_eq!(broker.accepted(), 0);
        broker.shutdown();
    }
}
