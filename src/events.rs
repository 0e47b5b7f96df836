//! Structured event bus (§4.H): every lifecycle and self-test operation
//! emits exactly one event on success and on failure.
//!
//! Non-critical events are handed to a bounded channel drained by a
//! dedicated consumer thread, so a slow sink never stalls the caller beyond
//! a non-blocking `try_send`; events dropped under backpressure increment
//! `events_dropped` rather than failing the underlying crypto operation.
//! Security-category `critical` events bypass the channel and call the sink
//! directly, blocking the caller, per §4.H.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EventCategory {
    Security,
    Operation,
    System,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Event {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub category: EventCategory,
    pub severity: Severity,
    pub kind: String,
    pub details: String,
    pub actor: Option<String>,
}

impl Event {
    #[must_use]
    pub fn new(category: EventCategory, severity: Severity, kind: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            category,
            severity,
            kind: kind.into(),
            details: details.into(),
            actor: None,
        }
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.category == EventCategory::Security && self.severity == Severity::Critical
    }
}

/// Implemented by the embedding application to durably record events. The
/// core never fails an operation because a sink is slow or absent.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Discards every event; the default when no sink has been configured yet.
pub struct NullSink;
impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

const CHANNEL_CAPACITY: usize = 256;

struct Dispatcher {
    sender: SyncSender<Event>,
}

type SinkSlot = Arc<parking_lot::RwLock<Arc<dyn EventSink>>>;

/// Owns the bounded channel, the background drain thread, and the drop
/// counter. Swapping the sink (`set_sink`) replaces what the drain thread
/// forwards to without the core needing to know a sink changed mid-flight.
///
/// The drain thread holds only a clone of the sink slot, never an `Arc<Self>`:
/// the bus's `sender` half lives in `dispatcher`, so dropping the bus drops
/// the sender, `rx` disconnects, and the thread's `for event in rx` loop ends
/// on its own. An `Arc<Self>` captured by the thread would keep the bus's
/// refcount above zero forever and leak both the thread and the bus.
pub struct EventBus {
    sink: SinkSlot,
    dispatcher: parking_lot::Mutex<Option<Dispatcher>>,
    events_dropped: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let sink: SinkSlot = Arc::new(parking_lot::RwLock::new(Arc::new(NullSink)));
        let (tx, rx) = sync_channel::<Event>(CHANNEL_CAPACITY);

        let drain_sink = sink.clone();
        std::thread::spawn(move || {
            for event in rx {
                let sink = drain_sink.read().clone();
                sink.emit(event);
            }
        });

        Arc::new(Self {
            sink,
            dispatcher: parking_lot::Mutex::new(Some(Dispatcher { sender: tx })),
            events_dropped: AtomicU64::new(0),
        })
    }

    pub fn set_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write() = sink;
    }

    /// Drops the channel sender, disconnecting the drain thread's receiver
    /// so it exits. Idempotent; also runs implicitly when the bus drops.
    pub fn shutdown(&self) {
        self.dispatcher.lock().take();
    }

    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Dispatches `event`. Security/critical events are delivered
    /// synchronously and block the caller; everything else is a
    /// non-blocking `try_send` that drops and counts on backpressure.
    pub fn dispatch(&self, event: Event) {
        if event.is_blocking() {
            let sink = self.sink.read().clone();
            sink.emit(event);
            return;
        }

        let sent = self
            .dispatcher
            .lock()
            .as_ref()
            .is_some_and(|d| d.sender.try_send(event).is_ok());

        if !sent {
            self.events_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events_dropped", &self.events_dropped())
            .finish()
    }
}
