//! Observer fan-out registry.
//!
//! Three independent, append-only lists of callbacks keyed by event
//! category. Dispatch runs synchronously on the supervisor task, in
//! registration order. The registry's one correctness property is
//! isolation: a panicking observer is caught and logged, and dispatch
//! continues to the remaining observers.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::warn;

use sensorlink_types::PeerInfo;

/// Callback invoked for every matched advertisement packet.
pub type AdvertisementObserver = Box<dyn Fn(&PeerInfo) + Send + Sync>;

/// Callback invoked on every connection status transition.
pub type ConnectionObserver = Box<dyn Fn(bool) + Send + Sync>;

/// Callback invoked with the decoded text of every telemetry frame.
pub type TelemetryObserver = Box<dyn Fn(&str) + Send + Sync>;

/// Ordered callback lists, one per event category.
#[derive(Default)]
pub struct ObserverRegistry {
    advertisement: Vec<AdvertisementObserver>,
    connection: Vec<ConnectionObserver>,
    telemetry: Vec<TelemetryObserver>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("advertisement", &self.advertisement.len())
            .field("connection", &self.connection.len())
            .field("telemetry", &self.telemetry.len())
            .finish()
    }
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an advertisement observer.
    pub fn on_advertisement<F>(&mut self, callback: F)
    where
        F: Fn(&PeerInfo) + Send + Sync + 'static,
    {
        self.advertisement.push(Box::new(callback));
    }

    /// Register a connection-status observer.
    pub fn on_connection_status<F>(&mut self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.connection.push(Box::new(callback));
    }

    /// Register a telemetry observer. The payload is the decoded frame
    /// text, which is the integration point external state stores use
    /// to update their own published readings.
    pub fn on_telemetry<F>(&mut self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.telemetry.push(Box::new(callback));
    }

    /// Dispatch an advertisement to all registered observers.
    pub fn dispatch_advertisement(&self, peer: &PeerInfo) {
        for callback in &self.advertisement {
            if catch_unwind(AssertUnwindSafe(|| callback(peer))).is_err() {
                warn!("advertisement observer panicked; continuing dispatch");
            }
        }
    }

    /// Dispatch a connection status transition to all registered observers.
    pub fn dispatch_connection_status(&self, connected: bool) {
        for callback in &self.connection {
            if catch_unwind(AssertUnwindSafe(|| callback(connected))).is_err() {
                warn!("connection observer panicked; continuing dispatch");
            }
        }
    }

    /// Dispatch decoded frame text to all registered observers.
    pub fn dispatch_telemetry(&self, text: &str) {
        for callback in &self.telemetry {
            if catch_unwind(AssertUnwindSafe(|| callback(text))).is_err() {
                warn!("telemetry observer panicked; continuing dispatch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_dispatch_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            registry.on_telemetry(move |_| order.lock().unwrap().push(i));
        }

        registry.dispatch_telemetry("T:20.00");
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_observer_does_not_abort_dispatch() {
        let reached = Arc::new(AtomicUsize::new(0));
        let mut registry = ObserverRegistry::new();
        registry.on_telemetry(|_| panic!("observer bug"));
        {
            let reached = Arc::clone(&reached);
            registry.on_telemetry(move |_| {
                reached.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.dispatch_telemetry("T:20.00");
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_categories_are_independent() {
        let connection_seen = Arc::new(AtomicUsize::new(0));
        let advertisement_seen = Arc::new(AtomicUsize::new(0));
        let mut registry = ObserverRegistry::new();
        registry.on_telemetry(|_| panic!("always fails"));
        {
            let seen = Arc::clone(&connection_seen);
            registry.on_connection_status(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let seen = Arc::clone(&advertisement_seen);
            registry.on_advertisement(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Same dispatch cycle: telemetry panics, the rest still land.
        registry.dispatch_telemetry("T:20.00");
        registry.dispatch_connection_status(true);
        registry.dispatch_advertisement(&PeerInfo::new("aa:bb:cc:dd:ee:ff"));

        assert_eq!(connection_seen.load(Ordering::SeqCst), 1);
        assert_eq!(advertisement_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_with_no_observers_is_noop() {
        let registry = ObserverRegistry::new();
        registry.dispatch_connection_status(true);
        registry.dispatch_telemetry("T:20.00");
    }
}
