//! Transport abstraction and the WebSocket implementation
//!
//! The bus never touches a socket directly. A [`Connector`] opens a
//! [`Transport`]: a [`FrameSender`] for outbound text frames plus a receiver
//! of [`TransportEvent`]s. Every transport reports exactly one terminal event
//! (`Closed` or `Error`), after which its channel ends.
//!
//! [`WsConnector`] is the production connector; it runs one writer task and
//! one reader task per connection.

use async_trait::async_trait;
use evbus_core::{Error, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Something the transport reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived
    Frame(String),
    /// The transport closed; carries the close reason if one was given
    Closed(Option<String>),
    /// The transport failed
    Error(String),
}

#[derive(Debug)]
pub(crate) enum Outgoing {
    Text(String),
    Close,
}

/// Write half of an open transport
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl FrameSender {
    /// Queue a text frame
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` once the writer has shut down.
    pub fn send(&self, text: String) -> Result<()> {
        self.tx
            .send(Outgoing::Text(text))
            .map_err(|_| Error::Transport("transport writer closed".to_string()))
    }

    /// Ask the writer to close the connection
    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }

    /// True once the writer has shut down
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An open transport
#[derive(Debug)]
pub struct Transport {
    pub sender: FrameSender,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports to an endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport to `url`
    async fn connect(&self, url: &str) -> Result<Transport>;
}

/// WebSocket connector built on `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    #[tracing::instrument(skip(self))]
    async fn connect(&self, url: &str) -> Result<Transport> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(outgoing) = out_rx.recv().await {
                match outgoing {
                    Outgoing::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            tracing::debug!(error = %e, "WebSocket write failed");
                            break;
                        }
                    }
                    Outgoing::Close => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if event_tx.send(TransportEvent::Frame(text)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty());
                        let _ = event_tx.send(TransportEvent::Closed(reason));
                        return;
                    }
                    Err(e) => {
                        let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                    _ => {}
                }
            }
            let _ = event_tx.send(TransportEvent::Closed(None));
        });

        Ok(Transport {
            sender: FrameSender { tx: out_tx },
            events: event_rx,
        })
    }
}
