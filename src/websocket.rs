use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{
    registry::{Payload, RegistryHandle},
    status::StatusResponder,
};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(registry): Extension<RegistryHandle>,
    Extension(status): Extension<StatusResponder>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    } else {
        info!("`{addr}` connected");
    }

    ws.on_upgrade(move |socket| {
        let peer = addr.to_string();
        let span = info_span!("Subscriber", %peer);

        handle_websocket(socket, peer, registry, status).instrument(span)
    })
}

/// What to answer a text message from a subscriber with, if anything.
fn reply_to(text: &str) -> Option<String> {
    if text == "ping" {
        debug!("Ping, sending pong");
        return Some("pong".into());
    }

    if let Some(command) = text.strip_prefix("command:") {
        info!(%command, "Received command");

        let reply = serde_json::json!({
            "status": "ok",
            "message": format!("Received command: {command}"),
        });
        return Some(reply.to_string());
    }

    debug!(%text, "Ignoring message");
    None
}

async fn read<S>(mut receiver: S, replies: mpsc::UnboundedSender<String>)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                trace!(%text, "peer message");
                if let Some(reply) = reply_to(&text) {
                    if replies.send(reply).is_err() {
                        break;
                    }
                }
            }
            Message::Binary(_) => {
                debug!("client sent binary data");
            }
            Message::Ping(_) => {
                debug!("socket ping");
            }
            Message::Pong(_) => {
                debug!("socket pong");
            }
            Message::Close(_) => {
                debug!("client disconnected");
            }
        }
    }

    debug!("no more messages from peer");
}

async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut outbox: mpsc::Receiver<Payload>,
    mut replies: mpsc::UnboundedReceiver<String>,
) {
    loop {
        let text = tokio::select! {
            payload = outbox.recv() => match payload {
                Some(payload) => payload.to_string(),
                None => {
                    info!("Removed from the registry, closing");
                    return;
                }
            },
            Some(reply) = replies.recv() => reply,
        };

        if sender.send(Message::Text(text)).await.is_err() {
            debug!("client disconnected");
            return;
        }
        trace!("Message flushed");
    }
}

async fn handle_websocket(
    websocket: WebSocket,
    peer: String,
    registry: RegistryHandle,
    status: StatusResponder,
) {
    let (id, outbox) = match registry.register(&peer).await {
        Ok(registered) => registered,
        Err(e) => {
            warn!(%e, "Could not register subscriber");
            return;
        }
    };
    info!(%id, clients = registry.count(), "Subscriber registered");

    let (stream_sender, stream_receiver) = websocket.split();
    let (reply_sender, reply_receiver) = mpsc::unbounded_channel::<String>();

    // Newcomers get the latest reading right away instead of waiting for the next one.
    if let Some(reading) = status.last_reading() {
        match serde_json::to_string(&reading) {
            Ok(json) => {
                let _ = reply_sender.send(json);
            }
            Err(e) => warn!(%e, "Could not serialize last reading"),
        }
    }

    let mut read_handle =
        tokio::spawn(read(stream_receiver, reply_sender).instrument(info_span!("Read")));
    let mut write_handle = tokio::spawn(
        write(stream_sender, outbox, reply_receiver).instrument(info_span!("Write")),
    );

    tokio::select! {
        _ = &mut read_handle => debug!("Read task joined"),
        _ = &mut write_handle => debug!("Write task joined"),
    }

    // Aborting both ensures the underlying TCP connection gets closed,
    // which signals the peer that the session is over.
    read_handle.abort();
    write_handle.abort();

    registry.unregister(id);
}
