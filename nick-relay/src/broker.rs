use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tracing::{debug, info, warn};

use crate::message::Message;

pub type SessionId = u64;

/// What the broker keeps for a registered session: enough to tell sessions
/// apart and to push messages at them, never the connection itself.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub nickname: String,
    outbox: mpsc::Sender<Message>,
}

impl SessionHandle {
    pub fn new(id: SessionId, nickname: impl Into<String>, outbox: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            nickname: nickname.into(),
            outbox,
        }
    }
}

enum BrokerEvent {
    Route(Message),
    Register(SessionHandle),
    Deregister {
        id: SessionId,
        nickname: String,
    },
    Snapshot {
        respond_to: oneshot::Sender<Vec<(String, SessionId)>>,
    },
}

/// Nickname to session mapping. Only ever touched from the broker task.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<String, SessionHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the session, replacing whoever held the nickname before.
    ///
    /// Returns the displaced session. It is no longer reachable, but its outbox
    /// stays open for as long as its own handler holds a handle to it.
    pub fn register(&mut self, session: SessionHandle) -> Option<SessionHandle> {
        self.sessions.insert(session.nickname.clone(), session)
    }

    /// Removes `nickname` only while it still belongs to session `id`.
    pub fn deregister(&mut self, id: SessionId, nickname: &str) -> bool {
        match self.sessions.get(nickname) {
            Some(current) if current.id == id => {
                self.sessions.remove(nickname);
                true
            }
            _ => false,
        }
    }

    /// Hands `message` to every session registered under `message.to`.
    ///
    /// Never waits on a recipient: a full outbox drops the message. Returns
    /// the number of outboxes that accepted it.
    pub fn route(&self, message: Message) -> usize {
        let mut delivered = 0;
        for session in self.sessions.values().filter(|s| s.nickname == message.to) {
            match session.outbox.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        to = %session.nickname,
                        session = session.id,
                        "outbox full, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(to = %session.nickname, session = session.id, "outbox closed");
                }
            }
        }
        delivered
    }

    pub fn snapshot(&self) -> Vec<(String, SessionId)> {
        let mut entries: Vec<_> = self
            .sessions
            .values()
            .map(|session| (session.nickname.clone(), session.id))
            .collect();
        entries.sort();
        entries
    }
}

/// The single owner of the [`Registry`].
///
/// Every registration, removal and routing decision is an event on one FIFO
/// queue, processed one at a time by [`Broker::run`].
pub struct Broker {
    registry: Registry,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
}

impl Broker {
    /// Spawns the broker task and returns a handle for submitting events.
    pub fn spawn() -> BrokerHandle {
        let (events_tx, events) = mpsc::unbounded_channel();
        let broker = Broker {
            registry: Registry::new(),
            events,
        };
        tokio::spawn(broker.run());

        BrokerHandle {
            events: events_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }
        debug!("all broker handles dropped, broker stopping");
    }

    fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Route(message) => {
                let (from, to) = (message.from.clone(), message.to.clone());
                let delivered = self.registry.route(message);
                if delivered == 0 {
                    debug!(%from, %to, "no recipient, message dropped");
                } else {
                    debug!(%from, %to, delivered, "message routed");
                }
            }
            BrokerEvent::Register(session) => {
                let (nickname, id) = (session.nickname.clone(), session.id);
                match self.registry.register(session) {
                    Some(previous) => info!(
                        %nickname,
                        session = id,
                        replaced = previous.id,
                        "nickname taken over"
                    ),
                    None => info!(%nickname, session = id, "client registered"),
                }
            }
            BrokerEvent::Deregister { id, nickname } => {
                if self.registry.deregister(id, &nickname) {
                    info!(%nickname, session = id, "client deregistered");
                } else {
                    debug!(%nickname, session = id, "stale deregistration ignored");
                }
            }
            BrokerEvent::Snapshot { respond_to } => {
                let _ = respond_to.send(self.registry.snapshot());
            }
        }
    }
}

/// Cloneable producer side of the broker's event queue.
///
/// Submitting never blocks, so it is safe from `Drop` impls. Each method
/// returns `false` once the broker task has gone away.
#[derive(Clone)]
pub struct BrokerHandle {
    events: mpsc::UnboundedSender<BrokerEvent>,
    next_id: Arc<AtomicU64>,
}

impl BrokerHandle {
    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self, session: SessionHandle) -> bool {
        self.submit(BrokerEvent::Register(session))
    }

    pub fn deregister(&self, id: SessionId, nickname: &str) -> bool {
        self.submit(BrokerEvent::Deregister {
            id,
            nickname: nickname.to_string(),
        })
    }

    pub fn route(&self, message: Message) -> bool {
        self.submit(BrokerEvent::Route(message))
    }

    /// Current registrations, sorted by nickname.
    ///
    /// The reply reflects every event submitted before this call.
    pub async fn snapshot(&self) -> Option<Vec<(String, SessionId)>> {
        let (respond_to, response) = oneshot::channel();
        if !self.submit(BrokerEvent::Snapshot { respond_to }) {
            return None;
        }
        response.await.ok()
    }

    fn submit(&self, event: BrokerEvent) -> bool {
        if self.events.send(event).is_err() {
            warn!("broker is gone, event discarded");
            return false;
        }
        true
    }
}
