use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{info, warn};

/// Callback invoked with the new state on every online/offline edge
pub type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Single source of truth for "can we reach the network right now".
///
/// The platform's raw signal is taken as ground truth: no debouncing.
/// Listeners only see edges, setting the current state again is silent.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    /// Held across a state change and its notifications
    dispatch: Mutex<()>,
    online: Mutex<bool>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
}

impl ConnectivityMonitor {
    /// Start from the platform's last known reachability
    pub fn new(initially_online: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatch: Mutex::new(()),
                online: Mutex::new(initially_online),
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn current(&self) -> bool {
        match self.inner.online.lock() {
            Ok(online) => *online,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Feed the platform's connectivity signal into the monitor.
    ///
    /// Concurrent callers are serialized, so listeners see edges in the
    /// order the state changed. Listeners must not call `set_online`.
    pub fn set_online(&self, online: bool) {
        let _dispatch = match self.inner.dispatch.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let listeners: Vec<Listener> = {
            let mut state = match self.inner.online.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *state == online {
                return;
            }
            *state = online;

            match self.inner.listeners.lock() {
                Ok(listeners) => listeners.values().cloned().collect(),
                Err(_) => {
                    warn!("Connectivity listener registry is poisoned, skipping notification");
                    return;
                }
            }
        };

        if online {
            info!("Back online");
        } else {
            info!("Offline, captures will be queued locally");
        }

        // called outside the state locks so listeners may subscribe or query
        for listener in listeners {
            listener(online);
        }
    }

    /// Register a listener for every transition, in both directions.
    ///
    /// The listener stays registered until the returned `Subscription` is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.insert(id, Arc::new(listener));
        }
        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.current())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Registration handle returned by `ConnectivityMonitor::subscribe`
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    monitor: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            if let Ok(mut listeners) = inner.listeners.lock() {
                listeners.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder(monitor: &ConnectivityMonitor) -> (Arc<StdMutex<Vec<bool>>>, Subscription) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = monitor.subscribe(move |online| sink.lock().unwrap().push(online));
        (seen, sub)
    }

    #[test]
    fn current_reflects_initial_and_latest_state() {
        let monitor = ConnectivityMonitor::new(false);
        assert!(!monitor.current());
        monitor.set_online(true);
        assert!(monitor.current());
    }

    #[test]
    fn only_edges_are_notified() {
        let monitor = ConnectivityMonitor::new(true);
        let (seen, _sub) = recorder(&monitor);

        monitor.set_online(true);
        monitor.set_online(false);
        monitor.set_online(false);
        monitor.set_online(true);

        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn independent_subscribers_all_hear_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let (first, _a) = recorder(&monitor);
        let (second, _b) = recorder(&monitor);

        monitor.set_online(true);

        assert_eq!(*first.lock().unwrap(), vec![true]);
        assert_eq!(*second.lock().unwrap(), vec![true]);
    }

    #[test]
    fn unsubscribed_listener_is_not_called() {
        let monitor = ConnectivityMonitor::new(false);
        let (kept, _keep) = recorder(&monitor);
        let (gone, sub) = recorder(&monitor);
        assert_eq!(monitor.listener_count(), 2);

        sub.unsubscribe();
        assert_eq!(monitor.listener_count(), 1);
        monitor.set_online(true);

        assert_eq!(*kept.lock().unwrap(), vec![true]);
        assert!(gone.lock().unwrap().is_empty());
    }

    #[test]
    fn concurrent_setters_deliver_edges_in_order() {
        let monitor = ConnectivityMonitor::new(false);
        let (seen, _sub) = recorder(&monitor);

        let threads: Vec<_> = [true, false, true, false]
            .into_iter()
            .map(|online| {
                let monitor = monitor.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        monitor.set_online(online);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        // every delivered edge flips the previous one, starting from offline
        let mut last = false;
        for &online in seen.iter() {
            assert_ne!(online, last);
            last = online;
        }
        assert_eq!(last, monitor.current());
    }

    #[test]
    fn listener_may_query_monitor_during_notification() {
        let monitor = ConnectivityMonitor::new(false);
        let observed = Arc::new(StdMutex::new(None));
        let sink = observed.clone();
        let handle = monitor.clone();
        let _sub = monitor.subscribe(move |_| {
            *sink.lock().unwrap() = Some(handle.current());
        });

        monitor.set_online(true);
        assert_eq!(*observed.lock().unwrap(), Some(true));
    }
}
