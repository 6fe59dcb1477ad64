//! Ordered container of idle connection proxies
//!
//! Entries are stamped with their idle-start time on insertion, so stamps
//! are monotonically non-decreasing in insertion order and the chain is a
//! plain stamped sequence: the back is the most-recently-idle entry and
//! the front is the oldest. Reuse pops from the back (LIFO on idle time,
//! which maximizes warm reuse); eviction drains from the front.
//!
//! The chain is not internally synchronized: the pool manager is the
//! single serializer of chain mutations.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::proxy::ConnectionProxy;

struct IdleEntry {
    idle_since: Instant,
    proxy: Arc<ConnectionProxy>,
}

#[derive(Default)]
pub(crate) struct IdleChain {
    entries: VecDeque<IdleEntry>,
}

impl IdleChain {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Stamp `proxy` as idle now and insert it.
    pub(crate) fn add(&mut self, proxy: Arc<ConnectionProxy>) {
        self.add_stamped(proxy, Instant::now());
    }

    fn add_stamped(&mut self, proxy: Arc<ConnectionProxy>, idle_since: Instant) {
        debug_assert!(
            self.entries
                .back()
                .is_none_or(|last| last.idle_since <= idle_since),
            "idle stamps must be monotonic"
        );
        self.entries.push_back(IdleEntry { idle_since, proxy });
    }

    /// Insert with an explicit stamp; used by tests to backdate entries.
    #[cfg(test)]
    pub(crate) fn add_backdated(&mut self, proxy: Arc<ConnectionProxy>, age: Duration) {
        let idle_since = Instant::now()
            .checked_sub(age)
            .expect("test backdate within clock range");
        // Backdating only works onto an empty or older-stamped tail.
        self.add_stamped(proxy, idle_since);
    }

    /// Remove and return the youngest-idle entry, if any.
    pub(crate) fn pop_most_recent(&mut self) -> Option<Arc<ConnectionProxy>> {
        self.entries.pop_back().map(|entry| entry.proxy)
    }

    /// Remove and return the oldest-idle entry, if any.
    pub(crate) fn pop_oldest(&mut self) -> Option<Arc<ConnectionProxy>> {
        self.entries.pop_front().map(|entry| entry.proxy)
    }

    /// Remove up to `max` entries that have been idle longer than
    /// `threshold`, oldest first.
    pub(crate) fn remove_idle_longer_than(
        &mut self,
        threshold: Duration,
        max: usize,
    ) -> Vec<Arc<ConnectionProxy>> {
        // A threshold reaching past the clock's origin cannot match anything.
        let Some(cutoff) = Instant::now().checked_sub(threshold) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        while removed.len() < max {
            match self.entries.front() {
                Some(entry) if entry.idle_since <= cutoff => {
                    // Unwrap is fine: front() was Some.
                    let entry = self.entries.pop_front().expect("front checked");
                    removed.push(entry.proxy);
                }
                _ => break,
            }
        }
        removed
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{CommonConnection, DataSource, MockDataSource};
    use std::sync::Weak;

    async fn proxy() -> Arc<ConnectionProxy> {
        let common: CommonConnection = MockDataSource::new()
            .get_common_connection()
            .await
            .unwrap();
        ConnectionProxy::new(0, Weak::new(), common)
    }

    #[tokio::test]
    async fn test_pop_most_recent_is_lifo() {
        let mut chain = IdleChain::new();
        let first = proxy().await;
        let second = proxy().await;
        chain.add(Arc::clone(&first));
        chain.add(Arc::clone(&second));

        let popped = chain.pop_most_recent().unwrap();
        assert!(Arc::ptr_eq(&popped, &second));
        let popped = chain.pop_most_recent().unwrap();
        assert!(Arc::ptr_eq(&popped, &first));
        assert!(chain.pop_most_recent().is_none());
    }

    #[tokio::test]
    async fn test_remove_idle_longer_than_takes_oldest_first() {
        let mut chain = IdleChain::new();
        let old = proxy().await;
        let young = proxy().await;
        chain.add_backdated(Arc::clone(&old), Duration::from_secs(120));
        chain.add(Arc::clone(&young));

        let removed = chain.remove_idle_longer_than(Duration::from_secs(60), usize::MAX);
        assert_eq!(removed.len(), 1);
        assert!(Arc::ptr_eq(&removed[0], &old));
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_idle_respects_max() {
        let mut chain = IdleChain::new();
        for _ in 0..4 {
            chain.add_backdated(proxy().await, Duration::from_secs(120));
        }

        let removed = chain.remove_idle_longer_than(Duration::from_secs(60), 3);
        assert_eq!(removed.len(), 3);
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_threshold_evicts_everything() {
        let mut chain = IdleChain::new();
        chain.add(proxy().await);
        chain.add(proxy().await);

        let removed = chain.remove_idle_longer_than(Duration::ZERO, usize::MAX);
        assert_eq!(removed.len(), 2);
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn test_pop_oldest_drains_from_front() {
        let mut chain = IdleChain::new();
        let first = proxy().await;
        chain.add(Arc::clone(&first));
        chain.add(proxy().await);

        let popped = chain.pop_oldest().unwrap();
        assert!(Arc::ptr_eq(&popped, &first));
    }
}
