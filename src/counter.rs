use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Number of connections currently open on a server.
///
/// Cloning is cheap and every clone observes the same value.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCounter(Arc<AtomicUsize>);

impl ConnectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn increase(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Only reachable through a [`ConnectionGuard`], so every call is
    /// paired with an earlier `increase`.
    fn decrease(&self) {
        let previous = self.0.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "connection counter went below zero");
    }

    /// Snapshot of the open connections. May be slightly stale while
    /// connections are being accepted or closed.
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Counts one connection and hands back the guard that releases it.
    pub(crate) fn track(&self) -> ConnectionGuard {
        self.increase();
        ConnectionGuard {
            counter: Some(self.clone()),
        }
    }
}

/// Releases one counted connection, at most once.
#[derive(Debug)]
pub(crate) struct ConnectionGuard {
    counter: Option<ConnectionCounter>,
}

impl ConnectionGuard {
    pub(crate) fn release(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.decrease();
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.counter.is_none()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        assert_eq!(ConnectionCounter::new().count(), 0);
    }

    #[test]
    fn clones_share_the_count() {
        let counter = ConnectionCounter::new();
        let other = counter.clone();
        let _guard = counter.track();
        assert_eq!(other.count(), 1);
    }

    #[test]
    fn guard_releases_once() {
        let counter = ConnectionCounter::new();
        let mut guard = counter.track();
        let _other = counter.track();
        assert_eq!(counter.count(), 2);

        guard.release();
        guard.release();
        assert!(guard.is_released());
        assert_eq!(counter.count(), 1);

        drop(guard);
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn dropping_a_guard_releases_it() {
        let counter = ConnectionCounter::new();
        let guard = counter.track();
        drop(guard);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn concurrent_tracking_returns_to_zero() {
        let counter = ConnectionCounter::new();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        let guard = counter.track();
                        assert!(counter.count() >= 1);
                        drop(guard);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(counter.count(), 0);
    }
}
