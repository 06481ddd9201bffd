use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use teamserver_shared::{Event, EventData, TeamserverError, TeamserverResult};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// What a newly subscribed operator receives: the durable history at the
/// moment of subscription, then everything broadcast afterwards.
pub struct Subscription {
    /// Tells this queue apart from a later one under the same username.
    pub id: u64,
    pub replay: Vec<Arc<Event>>,
    pub events: mpsc::Receiver<Arc<Event>>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<Event>>,
}

#[derive(Default)]
struct BusState {
    durable: Vec<Arc<Event>>,
    subscribers: HashMap<String, Subscriber>,
    next_id: u64,
}

/// Fans events out to connected operators.
///
/// The durable list and the subscriber table share one lock, so a durable
/// event reaches a given operator exactly once: through replay or through
/// fan-out. Delivery never waits on a slow operator; a full queue drops
/// that operator.
pub struct EventBus {
    state: Mutex<BusState>,
    capacity: usize,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            capacity: capacity.max(1),
        }
    }

    #[must_use]
    pub fn create(data: EventData) -> Event {
        Event::new(data)
    }

    /// Broadcasts with durability taken from the event kind.
    pub fn emit(&self, data: EventData) -> Arc<Event> {
        let durable = data.kind().is_durable();
        self.broadcast(durable, Self::create(data))
    }

    pub fn broadcast(&self, durable: bool, event: Event) -> Arc<Event> {
        let event = Arc::new(event);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if durable {
            state.durable.push(event.clone());
        }

        state.subscribers.retain(|username, sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(operator = %username, "🐢 Operator event queue full, dropping subscriber");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(operator = %username, "Pruning closed operator queue");
                false
            }
        });

        debug!(kind = ?event.kind(), durable, "📣 Event broadcast");
        event
    }

    /// Sends one event to one operator only.
    pub fn send(&self, username: &str, event: Event) -> TeamserverResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sub) = state.subscribers.get(username) else {
            return Err(TeamserverError::OperatorNotConnected(username.to_string()));
        };

        match sub.tx.try_send(Arc::new(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(operator = %username, "🐢 Operator event queue full, dropping subscriber");
                state.subscribers.remove(username);
                Err(TeamserverError::OperatorNotConnected(username.to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                state.subscribers.remove(username);
                Err(TeamserverError::OperatorNotConnected(username.to_string()))
            }
        }
    }

    /// Registers `username`, replacing any previous queue for that name.
    pub fn subscribe(&self, username: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let replay = state.durable.clone();
        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.insert(username.to_string(), Subscriber { id, tx });
        Subscription {
            id,
            replay,
            events: rx,
        }
    }

    /// Drops whatever queue `username` currently has.
    pub fn unsubscribe(&self, username: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.subscribers.remove(username).is_some()
    }

    /// Drops `username`'s queue only if it is still subscription `id`.
    pub fn unsubscribe_if(&self, username: &str, id: u64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.subscribers.get(username) {
            Some(sub) if sub.id == id => state.subscribers.remove(username).is_some(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_subscribed(&self, username: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.subscribers.contains_key(username)
    }

    #[must_use]
    pub fn durable_events(&self) -> Vec<Arc<Event>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.durable.clone()
    }
}
