use futures::{channel::mpsc, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error};
use tungstenite::Message;

use crate::{error::Error, reading::Reading};

/// Something the relay sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A reading.
    Reading(Reading),

    /// Anything else, such as a reply to `ping`.
    Text(String),
}

impl Frame {
    fn parse(text: String) -> Self {
        match serde_json::from_str(&text) {
            Ok(reading) => Frame::Reading(reading),
            Err(_) => Frame::Text(text),
        }
    }
}

struct Client {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outgoing: mpsc::UnboundedReceiver<String>,
    incoming: mpsc::UnboundedSender<Frame>,
}

impl Client {
    async fn run(self) {
        let (mut ws_tx, mut ws_rx) = self.stream.split();

        let mut outgoing = self.outgoing;
        let mut incoming = self.incoming;

        let mut outgoing_handle = tokio::spawn(async move {
            while let Some(text) = outgoing.next().await {
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    error!(?e, "Could not send message to relay");
                    break;
                }
            }
        });

        let mut incoming_handle = tokio::spawn(async move {
            while let Some(Ok(message)) = ws_rx.next().await {
                let Message::Text(text) = message else {
                    continue;
                };

                if incoming.send(Frame::parse(text)).await.is_err() {
                    debug!("Client handle dropped");
                    break;
                }
            }
        });

        tokio::select! {
            _ = &mut outgoing_handle => {
                debug!("Outgoing loop returned");
            },
            _ = &mut incoming_handle => {
                debug!("Incoming loop returned");
            },
        }

        outgoing_handle.abort();
        incoming_handle.abort();
    }
}

/// A connection to a running relay.
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl ClientHandle {
    /// Connect to the relay at the given address and port.
    pub async fn new(address: &str, port: u16) -> Result<Self, Error> {
        let (stream, _) =
            tokio_tungstenite::connect_async(format!("ws://{address}:{port}/ws")).await?;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded();
        let (incoming_tx, incoming_rx) = mpsc::unbounded();

        let client = Client {
            stream,
            outgoing: outgoing_rx,
            incoming: incoming_tx,
        };

        tokio::spawn(client.run());

        Ok(Self {
            tx: outgoing_tx,
            rx: incoming_rx,
        })
    }

    /// Await whatever the relay sends next.
    pub async fn next_frame(&mut self) -> Result<Frame, Error> {
        self.rx
            .next()
            .await
            .ok_or_else(|| Error::WebsocketIssue("Connection closed".into()))
    }

    /// Await the next reading, skipping anything else.
    pub async fn next_reading(&mut self) -> Result<Reading, Error> {
        loop {
            if let Frame::Reading(reading) = self.next_frame().await? {
                return Ok(reading);
            }
        }
    }

    /// Send a text message to the relay.
    pub async fn send_text(&mut self, text: &str) -> Result<(), Error> {
        self.tx
            .send(text.into())
            .await
            .map_err(|e| Error::WebsocketIssue(e.to_string()))
    }

    /// Check the relay is responsive.
    /// Readings arriving in the meantime are skipped.
    pub async fn ping(&mut self) -> Result<(), Error> {
        self.send_text("ping").await?;

        loop {
            match self.next_frame().await? {
                Frame::Text(text) if text == "pong" => return Ok(()),
                Frame::Text(text) => debug!(%text, "Skipping while waiting for pong"),
                Frame::Reading(_) => {}
            }
        }
    }
}
