//! Event fan-out to channel subscribers and weak delegates.

use std::sync::{Arc, Weak};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::events::{LiveStreamDelegate, LiveStreamEvent};
use crate::types::Protocol;

/// Dispatches events to the caller.
///
/// Only events originating from the current transport are delivered; events
/// from an adapter that is no longer current are dropped.
pub struct EventDispatcher {
    current: RwLock<Protocol>,
    subscribers: Mutex<Vec<Sender<LiveStreamEvent>>>,
    delegates: Mutex<Vec<Weak<dyn LiveStreamDelegate>>>,
}

impl EventDispatcher {
    /// Create a dispatcher with `current` as the active origin.
    pub fn new(current: Protocol) -> Self {
        Self {
            current: RwLock::new(current),
            subscribers: Mutex::new(Vec::new()),
            delegates: Mutex::new(Vec::new()),
        }
    }

    /// Register a channel subscriber.
    pub fn subscribe(&self) -> Receiver<LiveStreamEvent> {
        let (tx, rx) = crate::event_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Register a delegate. Only a weak handle is kept; the caller owns it.
    pub fn add_delegate(&self, delegate: &Arc<dyn LiveStreamDelegate>) {
        self.delegates.lock().push(Arc::downgrade(delegate));
    }

    /// The origin whose events are currently delivered.
    pub fn current(&self) -> Protocol {
        *self.current.read()
    }

    /// Switch the delivered origin.
    pub fn set_current(&self, protocol: Protocol) {
        *self.current.write() = protocol;
    }

    /// Create a sink tagged with `origin`.
    pub fn sink(self: &Arc<Self>, origin: Protocol) -> EventSink {
        EventSink {
            dispatcher: Arc::clone(self),
            origin,
        }
    }

    /// Deliver `event` from `origin`. Returns false if it was filtered out.
    pub fn dispatch(&self, origin: Protocol, event: LiveStreamEvent) -> bool {
        if origin != self.current() {
            debug!(?origin, event = event.name(), "Dropping event from inactive transport");
            return false;
        }

        debug!(?origin, event = event.name(), "Dispatching event");

        self.subscribers
            .lock()
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Event subscriber is full, dropping {}", event.name());
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });

        let delegates: Vec<Arc<dyn LiveStreamDelegate>> = {
            let mut delegates = self.delegates.lock();
            delegates.retain(|weak| weak.strong_count() > 0);
            delegates.iter().filter_map(Weak::upgrade).collect()
        };

        // Callbacks run outside the lock so a delegate may register others.
        for delegate in delegates {
            event.deliver(delegate.as_ref());
        }

        true
    }
}

/// An event source bound to one transport adapter.
#[derive(Clone)]
pub struct EventSink {
    dispatcher: Arc<EventDispatcher>,
    origin: Protocol,
}

impl EventSink {
    /// Origin of events emitted through this sink.
    pub fn origin(&self) -> Protocol {
        self.origin
    }

    /// Emit an event.
    pub fn emit(&self, event: LiveStreamEvent) -> bool {
        self.dispatcher.dispatch(self.origin, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDelegate {
        successes: AtomicUsize,
        disconnections: AtomicUsize,
    }

    impl LiveStreamDelegate for CountingDelegate {
        fn connection_success(&self) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }

        fn disconnection(&self) {
            self.disconnections.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_events_from_inactive_origin_are_dropped() {
        let dispatcher = Arc::new(EventDispatcher::new(Protocol::Rtmp));
        let rx = dispatcher.subscribe();

        assert!(!dispatcher.sink(Protocol::Srt).emit(LiveStreamEvent::Disconnection));
        assert!(dispatcher.sink(Protocol::Rtmp).emit(LiveStreamEvent::ConnectionSuccess));

        assert_eq!(rx.try_recv().unwrap(), LiveStreamEvent::ConnectionSuccess);
        assert!(rx.try_recv().is_err());

        dispatcher.set_current(Protocol::Srt);
        assert!(!dispatcher.sink(Protocol::Rtmp).emit(LiveStreamEvent::Disconnection));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_delegate_is_weak() {
        let dispatcher = Arc::new(EventDispatcher::new(Protocol::Rtmp));
        let counting = Arc::new(CountingDelegate::default());
        let delegate: Arc<dyn LiveStreamDelegate> = counting.clone();
        dispatcher.add_delegate(&delegate);

        dispatcher.dispatch(Protocol::Rtmp, LiveStreamEvent::ConnectionSuccess);
        dispatcher.dispatch(Protocol::Rtmp, LiveStreamEvent::Disconnection);
        assert_eq!(counting.successes.load(Ordering::SeqCst), 1);
        assert_eq!(counting.disconnections.load(Ordering::SeqCst), 1);

        drop(delegate);
        drop(counting);
        assert!(dispatcher.dispatch(Protocol::Rtmp, LiveStreamEvent::ConnectionSuccess));
        assert!(dispatcher.delegates.lock().is_empty());
    }

    #[test]
    fn test_closed_subscriber_is_pruned() {
        let dispatcher = EventDispatcher::new(Protocol::Rtmp);
        let rx = dispatcher.subscribe();
        drop(rx);

        dispatcher.dispatch(Protocol::Rtmp, LiveStreamEvent::Disconnection);
        assert!(dispatcher.subscribers.lock().is_empty());
    }
}
