//! Latest-value publishing.
//!
//! A [`Publisher`] replaces the current value; any number of [`Subscriber`]s
//! read it. Values are handed out as `Arc<T>` snapshots, so a reader can never
//! observe a value the writer is still building, and the writer never mutates
//! anything a reader holds. The lock is only held to swap or clone an `Arc`.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Slot<T> {
    value: Arc<T>,
    version: u64,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    changed: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // Slot updates cannot panic halfway, so a poisoned lock still holds a
        // consistent value.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Creates a latest-value channel holding `initial` at version 0.
pub fn channel<T>(initial: T) -> (Publisher<T>, Subscriber<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            value: Arc::new(initial),
            version: 0,
        }),
        changed: Condvar::new(),
    });
    (
        Publisher {
            shared: Arc::clone(&shared),
        },
        Subscriber { shared },
    )
}

/// The single writer of a latest-value channel.
pub struct Publisher<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Publisher<T> {
    /// Replaces the current value and returns its version.
    pub fn publish(&self, value: T) -> u64 {
        let value = Arc::new(value);
        let version = {
            let mut slot = self.shared.lock();
            slot.value = value;
            slot.version += 1;
            slot.version
        };
        self.shared.changed.notify_all();
        version
    }
}

/// A reader of a latest-value channel.
pub struct Subscriber<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Subscriber<T> {
    /// Snapshot of the most recent value.
    pub fn latest(&self) -> Arc<T> {
        Arc::clone(&self.shared.lock().value)
    }

    /// Number of values published so far.
    pub fn version(&self) -> u64 {
        self.shared.lock().version
    }

    /// Blocks until a value newer than `seen_version` is published or the
    /// timeout elapses. Returns the newest snapshot and its version if one
    /// arrived.
    pub fn wait_for_update(&self, seen_version: u64, timeout: Duration) -> Option<(Arc<T>, u64)> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.lock();
        while slot.version <= seen_version {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = match self.shared.changed.wait_timeout(slot, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Some((Arc::clone(&slot.value), slot.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn latest_value_wins() {
        let (publisher, subscriber) = channel(0u32);
        assert_eq!(*subscriber.latest(), 0);
        assert_eq!(subscriber.version(), 0);

        publisher.publish(1);
        publisher.publish(2);
        assert_eq!(*subscriber.latest(), 2);
        assert_eq!(subscriber.version(), 2);
    }

    #[test]
    fn snapshots_are_not_affected_by_later_publishes() {
        let (publisher, subscriber) = channel(vec![1, 2, 3]);
        let snapshot = subscriber.latest();
        publisher.publish(vec![9]);
        assert_eq!(*snapshot, vec![1, 2, 3]);
        assert_eq!(*subscriber.clone().latest(), vec![9]);
    }

    #[test]
    fn wait_for_update_wakes_on_publish() {
        let (publisher, subscriber) = channel(0u32);
        let handle = thread::spawn(move || subscriber.wait_for_update(0, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        publisher.publish(7);
        let (value, version) = handle.join().unwrap().expect("update");
        assert_eq!(*value, 7);
        assert_eq!(version, 1);
    }

    #[test]
    fn wait_for_update_times_out() {
        let (_publisher, subscriber) = channel(0u32);
        assert!(subscriber.wait_for_update(0, Duration::from_millis(10)).is_none());
    }
}
