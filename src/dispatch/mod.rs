//! Dispatch module - Routes inbound messages to subscribers by case
//!
//! A `Dispatcher` maps a key to the callbacks interested in it. Dispatching a
//! message fans it out to every callback currently registered for its key.
//! Register, deregister and dispatch share one lock, so a bucket is never
//! mutated while it is being walked.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A subscriber callback. Identity is the `Arc` allocation, so keep a clone
/// around to deregister it later.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Thread-safe registry of callbacks keyed by message case
pub struct Dispatcher<K, T> {
    handlers: Mutex<HashMap<K, Vec<Callback<T>>>>,
}

impl<K, T> Dispatcher<K, T>
where
    K: Eq + Hash + Copy + fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Append a callback to the bucket for `key`.
    ///
    /// The same callback may be registered under several keys, or twice
    /// under one key; every registration fires independently.
    pub fn register(&self, key: K, callback: Callback<T>) {
        self.handlers.lock().entry(key).or_default().push(callback);
    }

    /// Invoke every callback registered for `key`, in registration order.
    ///
    /// Unmatched keys are dropped silently. Callbacks run on the caller's
    /// thread with the registry locked: they must return promptly and must
    /// not touch the dispatcher themselves. A panicking callback is logged
    /// and does not stop the rest of the bucket.
    pub fn dispatch(&self, key: K, payload: &T) {
        let handlers = self.handlers.lock();

        let Some(bucket) = handlers.get(&key) else {
            tracing::trace!("No subscriber for {:?}", key);
            return;
        };

        tracing::trace!("Dispatching {:?} to {} subscriber(s)", key, bucket.len());

        for callback in bucket {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                tracing::error!("Subscriber for {:?} panicked during dispatch", key);
            }
        }
    }

    /// Remove the first registration of `callback`, whichever key it is under.
    ///
    /// Returns whether anything was removed; removing an unknown callback
    /// is a no-op.
    pub fn deregister(&self, callback: &Callback<T>) -> bool {
        let mut handlers = self.handlers.lock();

        let found = handlers.iter_mut().find_map(|(key, bucket)| {
            bucket
                .iter()
                .position(|registered| same_callback(registered, callback))
                .map(|index| {
                    bucket.remove(index);
                    (*key, bucket.is_empty())
                })
        });

        match found {
            Some((key, true)) => {
                handlers.remove(&key);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Number of callbacks registered for `key`
    pub fn subscriber_count(&self, key: K) -> usize {
        self.handlers.lock().get(&key).map_or(0, Vec::len)
    }

    /// Whether no callback is registered under any key
    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }
}

impl<K, T> Default for Dispatcher<K, T>
where
    K: Eq + Hash + Copy + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, T> fmt::Debug for Dispatcher<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.lock();
        let mut map = f.debug_map();
        for (key, bucket) in handlers.iter() {
            map.entry(key, &bucket.len());
        }
        map.finish()
    }
}

// Compare data pointers only; vtable pointers are not guaranteed unique.
fn same_callback<T>(a: &Callback<T>, b: &Callback<T>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Key {
        Ping,
        Observation,
        Step,
    }

    type Log = Arc<Mutex<Vec<(&'static str, u32)>>>;

    fn recorder(name: &'static str, log: &Log) -> Callback<u32> {
        let log = log.clone();
        Arc::new(move |value: &u32| log.lock().push((name, *value)))
    }

    #[test]
    fn test_dispatch_fans_out_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let log = Log::default();

        for name in ["first", "second", "third"] {
            dispatcher.register(Key::Ping, recorder(name, &log));
        }

        dispatcher.dispatch(Key::Ping, &7);

        assert_eq!(
            *log.lock(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn test_dispatch_without_subscribers_is_noop() {
        let dispatcher: Dispatcher<Key, u32> = Dispatcher::new();
        dispatcher.dispatch(Key::Step, &1);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_deregister_is_total_and_idempotent() {
        let dispatcher = Dispatcher::new();
        let log = Log::default();
        let callback = recorder("cb", &log);

        dispatcher.register(Key::Ping, callback.clone());
        assert!(dispatcher.deregister(&callback));
        assert!(!dispatcher.deregister(&callback));

        dispatcher.dispatch(Key::Ping, &1);
        dispatcher.dispatch(Key::Observation, &2);

        assert!(log.lock().is_empty());
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_shared_callback_scenario() {
        let dispatcher = Dispatcher::new();
        let log = Log::default();
        let a = recorder("A", &log);
        let b = recorder("B", &log);

        dispatcher.register(Key::Ping, a.clone());
        dispatcher.register(Key::Ping, b.clone());
        dispatcher.register(Key::Observation, b.clone());

        dispatcher.dispatch(Key::Ping, &1);
        assert_eq!(*log.lock(), vec![("A", 1), ("B", 1)]);

        dispatcher.deregister(&a);
        log.lock().clear();

        dispatcher.dispatch(Key::Ping, &2);
        dispatcher.dispatch(Key::Observation, &3);
        assert_eq!(*log.lock(), vec![("B", 2), ("B", 3)]);
    }

    #[test]
    fn test_duplicate_registration_fires_twice_and_deregisters_once() {
        let dispatcher = Dispatcher::new();
        let log = Log::default();
        let callback = recorder("dup", &log);

        dispatcher.register(Key::Step, callback.clone());
        dispatcher.register(Key::Step, callback.clone());

        dispatcher.dispatch(Key::Step, &5);
        assert_eq!(log.lock().len(), 2);

        dispatcher.deregister(&callback);
        assert_eq!(dispatcher.subscriber_count(Key::Step), 1);

        dispatcher.deregister(&callback);
        assert_eq!(dispatcher.subscriber_count(Key::Step), 0);
    }

    #[test]
    fn test_identical_closures_are_distinct_subscribers() {
        let dispatcher: Dispatcher<Key, u32> = Dispatcher::new();
        let first: Callback<u32> = Arc::new(|_: &u32| {});
        let second: Callback<u32> = Arc::new(|_: &u32| {});

        dispatcher.register(Key::Ping, first.clone());
        dispatcher.register(Key::Ping, second);

        assert!(dispatcher.deregister(&first));
        assert_eq!(dispatcher.subscriber_count(Key::Ping), 1);
    }

    #[test]
    fn test_panicking_callback_does_not_block_others() {
        let dispatcher: Dispatcher<Key, u32> = Dispatcher::new();
        let log = Log::default();

        dispatcher.register(Key::Ping, Arc::new(|_: &u32| panic!("subscriber failure")));
        dispatcher.register(Key::Ping, recorder("after", &log));

        dispatcher.dispatch(Key::Ping, &9);
        dispatcher.dispatch(Key::Ping, &10);

        assert_eq!(*log.lock(), vec![("after", 9), ("after", 10)]);
        assert_eq!(dispatcher.subscriber_count(Key::Ping), 2);
    }
}
