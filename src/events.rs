//! Derived events published to subscribers
//!
//! External collaborators never see raw AMI event names; they subscribe to a
//! [`EventKind`] and receive a typed [`ProxyEvent`] carrying the changed entity's
//! current snapshot.

use crate::constants::EVENT_STREAM_CAPACITY;
use crate::state::model::{
    CallDetailRecord, Conference, Dialing, Extension, Parking, Queue, QueueMember, RecallMatch,
    Trunk, VoicemailCounters,
};
use futures_util::Stream;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::broadcast;
use tracing::{error, warn};

define_wire_enum! {
    /// Names of derived events
    pub enum EventKind: ParseEventKindError("event kind") {
        Ready => "ready",
        ExtensionChanged => "extension-changed",
        QueueChanged => "queue-changed",
        QueueMemberChanged => "queue-member-changed",
        TrunkChanged => "trunk-changed",
        ParkingChanged => "parking-changed",
        ConferenceChanged => "conference-changed",
        ConferenceEnded => "conference-ended",
        NewCallDetailRecord => "new-call-detail-record",
        NewVoicemail => "new-voicemail",
        VoicemailCountersUpdated => "voicemail-counters-updated",
        DialingStarted => "dialing-started",
        QueueRecallMatched => "queue-recall-matched",
    }
}

/// Counts of what the structural description seeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadySummary {
    pub extensions: usize,
    pub queues: usize,
    pub trunks: usize,
    pub parkings: usize,
}

/// A derived event with its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ProxyEvent {
    Ready(ReadySummary),
    ExtensionChanged(Extension),
    QueueChanged(Queue),
    QueueMemberChanged(QueueMember),
    TrunkChanged(Trunk),
    ParkingChanged(Parking),
    ConferenceChanged(Conference),
    ConferenceEnded { id: String },
    NewCallDetailRecord(CallDetailRecord),
    NewVoicemail(VoicemailCounters),
    VoicemailCountersUpdated(VoicemailCounters),
    DialingStarted(Dialing),
    QueueRecallMatched(RecallMatch),
}

impl ProxyEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ProxyEvent::Ready(_) => EventKind::Ready,
            ProxyEvent::ExtensionChanged(_) => EventKind::ExtensionChanged,
            ProxyEvent::QueueChanged(_) => EventKind::QueueChanged,
            ProxyEvent::QueueMemberChanged(_) => EventKind::QueueMemberChanged,
            ProxyEvent::TrunkChanged(_) => EventKind::TrunkChanged,
            ProxyEvent::ParkingChanged(_) => EventKind::ParkingChanged,
            ProxyEvent::ConferenceChanged(_) => EventKind::ConferenceChanged,
            ProxyEvent::ConferenceEnded { .. } => EventKind::ConferenceEnded,
            ProxyEvent::NewCallDetailRecord(_) => EventKind::NewCallDetailRecord,
            ProxyEvent::NewVoicemail(_) => EventKind::NewVoicemail,
            ProxyEvent::VoicemailCountersUpdated(_) => EventKind::VoicemailCountersUpdated,
            ProxyEvent::DialingStarted(_) => EventKind::DialingStarted,
            ProxyEvent::QueueRecallMatched(_) => EventKind::QueueRecallMatched,
        }
    }

    /// Identifier of the entity the event is about, when there is one
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            ProxyEvent::ExtensionChanged(e) => Some(&e.id),
            ProxyEvent::QueueChanged(q) => Some(&q.id),
            ProxyEvent::QueueMemberChanged(m) => Some(&m.id),
            ProxyEvent::TrunkChanged(t) => Some(&t.id),
            ProxyEvent::ParkingChanged(p) => Some(&p.id),
            ProxyEvent::ConferenceChanged(c) => Some(&c.id),
            ProxyEvent::ConferenceEnded { id } => Some(id),
            ProxyEvent::NewVoicemail(v) | ProxyEvent::VoicemailCountersUpdated(v) => {
                Some(&v.mailbox)
            }
            ProxyEvent::DialingStarted(d) => Some(&d.extension),
            ProxyEvent::QueueRecallMatched(r) => Some(&r.queue),
            ProxyEvent::Ready(_) | ProxyEvent::NewCallDetailRecord(_) => None,
        }
    }
}

/// Subscriber callback
pub type EventHandler = Arc<dyn Fn(&ProxyEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(u64, EventHandler)>>,
}

/// Fan-out of derived events to per-kind handlers and to broadcast streams
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    stream_tx: broadcast::Sender<ProxyEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("stream_receivers", &self.stream_tx.receiver_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (stream_tx, _) = broadcast::channel(EVENT_STREAM_CAPACITY);
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            stream_tx,
        }
    }

    /// Register `handler` for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ProxyEvent) + Send + Sync + 'static,
    {
        let mut registry = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Receiver of every published event
    pub fn event_stream(&self) -> EventStream {
        EventStream {
            rx: self
                .stream_tx
                .subscribe(),
        }
    }

    /// Deliver `event` to its handlers, then to the streams.
    ///
    /// Handlers run outside the registry lock; a panicking handler is logged and skipped.
    pub fn publish(&self, event: ProxyEvent) {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = {
            let registry = self
                .registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            registry
                .handlers
                .get(&kind)
                .map(|list| {
                    list.iter()
                        .map(|(_, h)| h.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        for handler in handlers {
            let outcome =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&event)));
            if outcome.is_err() {
                error!(event = %kind, "[EVENT] subscriber handler panicked");
            }
        }

        // No receivers is fine.
        let _ = self
            .stream_tx
            .send(event);
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it keeps the handler registered.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self
            .registry
            .upgrade()
        else {
            return false;
        };
        let mut registry = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(list) = registry
            .handlers
            .get_mut(&self.kind)
        else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != self.id);
        before != list.len()
    }
}

/// Broadcast receiver of every derived event
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<ProxyEvent>,
}

impl EventStream {
    /// Next event; `None` once the proxy is dropped. Lagged events are skipped with a warning.
    pub async fn recv(&mut self) -> Option<ProxyEvent> {
        loop {
            match self
                .rx
                .recv()
                .await
            {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[EVENT] event stream lagged, {} events skipped", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a `futures` stream
    pub fn into_stream(self) -> impl Stream<Item = ProxyEvent> + Send {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream
                .recv()
                .await
                .map(|event| (event, stream))
        })
    }
}
