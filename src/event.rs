use crate::{address::ServerAddress, sdam::description::topology::TopologyDescription};

/// The lifecycle and change events a [`crate::manager::TopologyManager`] publishes, per the
/// SDAM monitoring specification's event catalogue.
///
/// Unlike the upstream driver, which routes these through a process-wide handler registry,
/// this crate takes an [`EventSink`] at `TopologyManager::start` time so the core stays
/// testable and free of global state.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SdamEvent {
    TopologyOpening,
    TopologyClosed,
    TopologyDescriptionChanged {
        previous: TopologyDescription,
        new: TopologyDescription,
    },
    ServerOpening {
        address: ServerAddress,
    },
    ServerClosed {
        address: ServerAddress,
    },
    ServerDescriptionChanged {
        address: ServerAddress,
        previous: crate::sdam::description::server::ServerDescription,
        new: crate::sdam::description::server::ServerDescription,
    },
}

/// Receives the events a `TopologyManager` emits.
///
/// Events for a single `submit` call are delivered to a given sink in the order laid out by
/// the reconciliation algorithm. A sink must not block the manager's actor task indefinitely;
/// [`BroadcastEventSink`] satisfies this by dropping events for subscribers that fall behind
/// rather than applying backpressure.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SdamEvent);
}

/// The default `EventSink`, backed by a bounded [`tokio::sync::broadcast`] channel.
///
/// A lagging subscriber's next `recv()` returns `Lagged(n)` rather than blocking the sender;
/// this is the chosen resolution to the "slow subscriber" open question in the core's design
/// notes (bounded delivery with an observable gap, not backpressure on the manager).
pub struct BroadcastEventSink {
    sender: tokio::sync::broadcast::Sender<SdamEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SdamEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: SdamEvent) {
        // No receivers is the common case in tests; a send error here just means nobody is
        // listening, which is not a failure of the manager.
        let _ = self.sender.send(event);
    }
}

/// An `EventSink` that discards every event. Useful when an embedder has no interest in SDAM
/// observability.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: SdamEvent) {}
}
