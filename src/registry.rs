//! The registry owns the set of live subscribers.
//!
//! It runs as an actor: every request is handled to completion before the next one,
//! so a delivery pass and a registration never interleave.
//! Use the cloneable [`RegistryHandle`] to talk to it.

use std::{collections::HashMap, fmt::Display, sync::Arc, time::Duration};

use futures::{channel::mpsc as requests, future::join_all, StreamExt};
use itertools::Itertools;
use tokio::sync::{
    mpsc::{self, error::SendTimeoutError},
    oneshot, watch,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Error;

/// Identifies a subscriber for as long as it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A serialized message, shared by every subscriber it is delivered to.
pub type Payload = Arc<str>;

/// The outcome of a delivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers which accepted the message.
    pub delivered: usize,

    /// Subscribers which did not, and were removed.
    pub pruned: usize,
}

#[derive(Debug)]
struct Subscriber {
    peer: String,
    outbox: mpsc::Sender<Payload>,
}

#[derive(Debug)]
enum Request {
    Register {
        peer: String,
        reply: oneshot::Sender<(SubscriberId, mpsc::Receiver<Payload>)>,
    },
    Unregister(SubscriberId),
    Deliver {
        payload: Payload,
        reply: oneshot::Sender<Delivery>,
    },
    Contains {
        id: SubscriberId,
        reply: oneshot::Sender<bool>,
    },
}

struct Registry {
    subscribers: HashMap<SubscriberId, Subscriber>,
    requests: requests::UnboundedReceiver<Request>,
    count: watch::Sender<usize>,
    buffer: usize,
    send_timeout: Duration,
}

impl Registry {
    fn publish_count(&self) {
        self.count.send_replace(self.subscribers.len());
    }

    fn register(&mut self, peer: String) -> (SubscriberId, mpsc::Receiver<Payload>) {
        let id = SubscriberId::new();
        let (outbox, inbox) = mpsc::channel(self.buffer);

        debug!(%id, %peer, "Registering subscriber");
        self.subscribers.insert(id, Subscriber { peer, outbox });
        self.publish_count();

        (id, inbox)
    }

    fn unregister(&mut self, id: SubscriberId) {
        if let Some(subscriber) = self.subscribers.remove(&id) {
            info!(%id, peer = %subscriber.peer, remaining = self.subscribers.len(), "Subscriber left");
            self.publish_count();
        }
    }

    async fn deliver(&mut self, payload: Payload) -> Delivery {
        if self.subscribers.is_empty() {
            return Delivery::default();
        }

        let send_timeout = self.send_timeout;

        let sends = self.subscribers.iter().map(|(&id, subscriber)| {
            let payload = payload.clone();
            async move {
                match subscriber.outbox.send_timeout(payload, send_timeout).await {
                    Ok(()) => Ok(id),
                    Err(SendTimeoutError::Timeout(_)) => Err(Error::SubscriberSend {
                        id,
                        problem: format!("not accepted within {send_timeout:?}"),
                    }),
                    Err(SendTimeoutError::Closed(_)) => Err(Error::SubscriberSend {
                        id,
                        problem: "channel closed".into(),
                    }),
                }
            }
        });

        let (delivered, failed): (Vec<SubscriberId>, Vec<Error>) =
            join_all(sends).await.into_iter().partition_result();

        for e in &failed {
            if let Error::SubscriberSend { id, .. } = e {
                warn!(%e, "Removing subscriber");
                self.subscribers.remove(id);
            }
        }

        if !failed.is_empty() {
            info!(
                pruned = failed.len(),
                remaining = self.subscribers.len(),
                "Pruned failed subscribers"
            );
            self.publish_count();
        }

        Delivery {
            delivered: delivered.len(),
            pruned: failed.len(),
        }
    }

    async fn run(mut self) {
        while let Some(request) = self.requests.next().await {
            match request {
                Request::Register { peer, reply } => {
                    let registered = self.register(peer);
                    if let Err((id, _)) = reply.send(registered) {
                        // Whoever asked is gone already.
                        self.unregister(id);
                    }
                }
                Request::Unregister(id) => self.unregister(id),
                Request::Deliver { payload, reply } => {
                    let delivery = self.deliver(payload).await;
                    let _ = reply.send(delivery);
                }
                Request::Contains { id, reply } => {
                    let _ = reply.send(self.subscribers.contains_key(&id));
                }
            }
        }

        debug!("All registry handles dropped");
    }
}

/// A handle to the subscriber registry.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    requests: requests::UnboundedSender<Request>,
    count: watch::Receiver<usize>,
}

impl RegistryHandle {
    /// Spawn a new registry.
    ///
    /// Each subscriber may have `buffer` messages waiting,
    /// and gets `send_timeout` to make room for a new one before it is removed.
    pub fn new(buffer: usize, send_timeout: Duration) -> Self {
        let (requests_tx, requests_rx) = requests::unbounded();
        let (count_tx, count_rx) = watch::channel(0);

        let registry = Registry {
            subscribers: HashMap::new(),
            requests: requests_rx,
            count: count_tx,
            buffer,
            send_timeout,
        };

        tokio::spawn(registry.run());

        Self {
            requests: requests_tx,
            count: count_rx,
        }
    }

    /// Add a subscriber.
    /// Messages for it arrive on the returned receiver.
    ///
    /// The subscriber is part of every delivery started after this returns.
    pub async fn register(
        &self,
        peer: &str,
    ) -> Result<(SubscriberId, mpsc::Receiver<Payload>), Error> {
        let (reply, response) = oneshot::channel();

        self.requests
            .unbounded_send(Request::Register {
                peer: peer.into(),
                reply,
            })
            .map_err(|_| Error::RegistryGone)?;

        response.await.map_err(|_| Error::RegistryGone)
    }

    /// Remove a subscriber whose peer disconnected.
    /// Unknown ids are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        if self
            .requests
            .unbounded_send(Request::Unregister(id))
            .is_err()
        {
            debug!(%id, "Registry gone, nothing to unregister from");
        }
    }

    /// Send a payload to every subscriber.
    pub async fn deliver(&self, payload: Payload) -> Delivery {
        let (reply, response) = oneshot::channel();

        if self
            .requests
            .unbounded_send(Request::Deliver { payload, reply })
            .is_err()
        {
            warn!("{}", Error::RegistryGone);
            return Delivery::default();
        }

        response.await.unwrap_or_default()
    }

    /// Is the subscriber currently registered?
    pub async fn contains(&self, id: SubscriberId) -> bool {
        let (reply, response) = oneshot::channel();

        if self
            .requests
            .unbounded_send(Request::Contains { id, reply })
            .is_err()
        {
            return false;
        }

        response.await.unwrap_or(false)
    }

    /// How many subscribers are registered right now.
    pub fn count(&self) -> usize {
        *self.count.borrow()
    }
}
