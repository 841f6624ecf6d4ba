//! Broadcast hub
//!
//! Owns the set of live observers and fans progress events out to them.
//! Delivery never blocks the caller and never fails it: an observer whose
//! delivery fails is dropped from the set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::event::ProgressEvent;

/// Events an observer may have queued before it counts as unreachable
pub const OBSERVER_QUEUE_CAPACITY: usize = 256;

/// Why a delivery to one observer failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("observer channel closed")]
    Closed,

    #[error("observer queue full")]
    Full,

    #[error("delivery failed: {0}")]
    Failed(String),
}

/// A connected delivery channel.
///
/// `deliver` must not block; transports that need to await I/O queue the
/// event and flush it from their own task.
pub trait Observer: Send + Sync {
    fn deliver(&self, event: &ProgressEvent) -> Result<(), DeliveryError>;

    /// Ask the transport to close. Called on hub shutdown.
    fn close(&self) {}
}

/// Handle identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// What a [`ChannelObserver`] hands to its transport task
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverMessage {
    Event(ProgressEvent),
    Close,
}

/// Observer backed by a bounded channel.
///
/// Events are queued in emission order; the receiving side (a socket writer,
/// a test) drains them at its own pace. A receiver that falls
/// [`OBSERVER_QUEUE_CAPACITY`] events behind fails delivery and is dropped
/// by the hub.
pub struct ChannelObserver {
    tx: mpsc::Sender<ObserverMessage>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::Receiver<ObserverMessage>) {
        Self::with_capacity(OBSERVER_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<ObserverMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Observer for ChannelObserver {
    fn deliver(&self, event: &ProgressEvent) -> Result<(), DeliveryError> {
        self.tx
            .try_send(ObserverMessage::Event(event.clone()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    fn close(&self) {
        // A full queue belongs to a reader that is already gone or stalled
        let _ = self.tx.try_send(ObserverMessage::Close);
    }
}

/// Shared observer registry and event fan-out.
///
/// Construct once per process and pass an `Arc<BroadcastHub>` to every
/// component that emits or registers.
pub struct BroadcastHub {
    observers: Mutex<HashMap<ObserverId, Arc<dyn Observer>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ObserverId, Arc<dyn Observer>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an observer. It receives only events emitted after this call.
    pub fn register(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let total = {
            let mut observers = self.lock();
            observers.insert(id, observer);
            observers.len()
        };
        info!("Observer {} connected. Total: {}", id.0, total);
        id
    }

    /// Remove an observer. Returns false if it was already gone.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let (removed, total) = {
            let mut observers = self.lock();
            let removed = observers.remove(&id).is_some();
            (removed, observers.len())
        };
        if removed {
            info!("Observer {} disconnected. Total: {}", id.0, total);
        }
        removed
    }

    /// Number of currently registered observers
    pub fn observer_count(&self) -> usize {
        self.lock().len()
    }

    /// Push an event to every registered observer.
    ///
    /// Fills in the timestamp if missing. Observers that fail delivery are
    /// unregistered; the rest still receive the event. Returns the number of
    /// successful deliveries.
    pub fn emit(&self, event: ProgressEvent) -> usize {
        let event = event.stamped();
        info!("{}", event.log_line());

        let snapshot: Vec<(ObserverId, Arc<dyn Observer>)> = self
            .lock()
            .iter()
            .map(|(id, observer)| (*id, Arc::clone(observer)))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, observer) in snapshot {
            match observer.deliver(&event) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Error sending to observer {}: {}", id.0, e);
                    failed.push(id);
                }
            }
        }

        for id in failed {
            self.unregister(id);
        }

        delivered
    }

    /// Close and drop every registration
    pub fn shutdown(&self) {
        let drained: Vec<Arc<dyn Observer>> = self.lock().drain().map(|(_, o)| o).collect();
        debug!("Closing {} observer(s)", drained.len());
        for observer in drained {
            observer.close();
        }
        info!("Broadcast hub shut down");
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::event::{AgentKind, AgentStatus};

    struct FailingObserver;

    impl Observer for FailingObserver {
        fn deliver(&self, _event: &ProgressEvent) -> Result<(), DeliveryError> {
            Err(DeliveryError::Failed("socket gone".to_string()))
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ObserverMessage>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let ObserverMessage::Event(event) = msg {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn test_emit_preserves_order_per_observer() {
        let hub = BroadcastHub::new();
        let (observer, mut rx) = ChannelObserver::new();
        hub.register(Arc::new(observer));

        for status in [AgentStatus::Thinking, AgentStatus::Working, AgentStatus::Done] {
            hub.emit(ProgressEvent::new(AgentKind::Researcher, status, ""));
        }

        let statuses: Vec<_> = drain(&mut rx).into_iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![AgentStatus::Thinking, AgentStatus::Working, AgentStatus::Done]
        );
    }

    #[test]
    fn test_emit_fills_timestamp() {
        let hub = BroadcastHub::new();
        let (observer, mut rx) = ChannelObserver::new();
        hub.register(Arc::new(observer));

        hub.emit(ProgressEvent::system(AgentStatus::Started, "go"));

        let events = drain(&mut rx);
        assert!(events[0].timestamp.is_some());
    }

    #[test]
    fn test_failed_observer_is_dropped_without_affecting_others() {
        let hub = BroadcastHub::new();
        let (good, mut rx) = ChannelObserver::new();
        hub.register(Arc::new(good));
        hub.register(Arc::new(FailingObserver));
        assert_eq!(hub.observer_count(), 2);

        let delivered = hub.emit(ProgressEvent::system(AgentStatus::Started, "one"));
        assert_eq!(delivered, 1);
        assert_eq!(hub.observer_count(), 1);

        hub.emit(ProgressEvent::system(AgentStatus::Completed, "two"));
        let messages: Vec<_> = drain(&mut rx).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["one", "two"]);
    }

    #[test]
    fn test_stalled_observer_is_dropped_when_queue_fills() {
        let hub = BroadcastHub::new();
        let (stalled, _stalled_rx) = ChannelObserver::with_capacity(2);
        let (reader, mut rx) = ChannelObserver::new();
        hub.register(Arc::new(stalled));
        hub.register(Arc::new(reader));

        for i in 0..5 {
            hub.emit(ProgressEvent::system(AgentStatus::Working, format!("event {}", i)));
        }

        assert_eq!(hub.observer_count(), 1);
        let messages: Vec<_> = drain(&mut rx).into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec!["event 0", "event 1", "event 2", "event 3", "event 4"]
        );
    }

    #[test]
    fn test_full_queue_reports_full() {
        let (observer, _rx) = ChannelObserver::with_capacity(1);
        let event = ProgressEvent::system(AgentStatus::Ping, "");
        assert!(observer.deliver(&event).is_ok());
        assert_eq!(observer.deliver(&event), Err(DeliveryError::Full));
    }

    #[test]
    fn test_closed_receiver_is_unregistered() {
        let hub = BroadcastHub::new();
        let (observer, rx) = ChannelObserver::new();
        hub.register(Arc::new(observer));
        drop(rx);

        assert_eq!(hub.emit(ProgressEvent::system(AgentStatus::Ping, "")), 0);
        assert_eq!(hub.observer_count(), 0);
    }

    #[test]
    fn test_late_observer_gets_no_replay() {
        let hub = BroadcastHub::new();
        hub.emit(ProgressEvent::system(AgentStatus::Started, "before"));

        let (observer, mut rx) = ChannelObserver::new();
        hub.register(Arc::new(observer));
        hub.emit(ProgressEvent::system(AgentStatus::Completed, "after"));

        let messages: Vec<_> = drain(&mut rx).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["after"]);
    }

    #[test]
    fn test_registering_mid_run_leaves_existing_stream_intact() {
        let hub = BroadcastHub::new();
        let (first, mut first_rx) = ChannelObserver::new();
        hub.register(Arc::new(first));

        hub.emit(ProgressEvent::system(AgentStatus::Started, "a"));
        let (second, _second_rx) = ChannelObserver::new();
        hub.register(Arc::new(second));
        hub.emit(ProgressEvent::system(AgentStatus::Completed, "b"));

        let messages: Vec<_> = drain(&mut first_rx).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["a", "b"]);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let hub = BroadcastHub::new();
        let (observer, _rx) = ChannelObserver::new();
        let id = hub.register(Arc::new(observer));
        assert!(hub.unregister(id));
        assert!(!hub.unregister(id));
    }

    #[test]
    fn test_shutdown_closes_observers() {
        let hub = BroadcastHub::new();
        let (observer, mut rx) = ChannelObserver::new();
        hub.register(Arc::new(observer));

        hub.shutdown();

        assert_eq!(hub.observer_count(), 0);
        assert_eq!(rx.try_recv().unwrap(), ObserverMessage::Close);
    }

    #[tokio::test]
    async fn test_concurrent_register_and_emit() {
        let hub = Arc::new(BroadcastHub::new());
        let mut handles = Vec::new();

        for i in 0..16 {
            let hub = Arc::clone(&hub);
            handles.push(tokio::spawn(async move {
                let (observer, rx) = ChannelObserver::new();
                hub.register(Arc::new(observer));
                hub.emit(ProgressEvent::system(AgentStatus::Working, format!("event {}", i)));
                rx
            }));
        }

        let mut receivers = Vec::new();
        for handle in handles {
            receivers.push(handle.await.unwrap());
        }

        assert_eq!(hub.observer_count(), 16);
        // every observer saw at least the event emitted right after it registered
        for mut rx in receivers {
            assert!(!drain(&mut rx).is_empty());
        }
    }
}
