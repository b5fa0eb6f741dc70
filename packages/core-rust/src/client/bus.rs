//! Refetch bus: a single publish point for cache invalidation keys.
//!
//! Publishing replaces the bus state in one step; subscribers observe the
//! latest event on their next poll. Events published faster than a subscriber
//! polls are coalesced into the most recent one.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::debug;

/// Separator used when joining key segments.
pub const KEY_SEPARATOR: &str = "-";

/// A published invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefetchEvent {
    /// Milliseconds since the Unix epoch at publication.
    pub timestamp_ms: u64,
    pub key: String,
}

/// Joins key segments into the single string key used on the bus.
#[must_use]
pub fn join_key<S: AsRef<str>>(segments: &[S]) -> String {
    segments
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

/// Whether a hook registered under `subscriber_key` reacts to `published`.
#[must_use]
pub fn key_matches(published: &str, subscriber_key: &str) -> bool {
    subscriber_key.starts_with(published)
}

/// Process-local invalidation channel. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct RefetchBus {
    tx: Arc<watch::Sender<Option<RefetchEvent>>>,
}

impl RefetchBus {
    /// Creates a bus with no subscribers and no published event.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Publishes the joined `keys`. Returns the event that was published.
    pub fn refetch<S: AsRef<str>>(&self, keys: &[S]) -> RefetchEvent {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let event = RefetchEvent {
            timestamp_ms,
            key: join_key(keys),
        };
        debug!(key = %event.key, subscribers = self.tx.receiver_count(), "refetch published");
        self.tx.send_replace(Some(event.clone()));
        event
    }

    /// Most recently published event, if any.
    #[must_use]
    pub fn latest(&self) -> Option<RefetchEvent> {
        self.tx.borrow().clone()
    }

    /// Registers a subscriber. Only events published after this call are seen.
    /// Dropping the subscription unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> RefetchSubscription {
        RefetchSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RefetchBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`RefetchBus`].
#[derive(Debug)]
pub struct RefetchSubscription {
    rx: watch::Receiver<Option<RefetchEvent>>,
}

impl RefetchSubscription {
    /// Waits for the next published event. Returns `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<RefetchEvent> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(event) = self.rx.borrow_and_update().clone() {
                return Some(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn keys_are_joined() {
        assert_eq!(join_key(&["posts", "42"]), "posts-42");
        assert_eq!(join_key::<&str>(&[]), "");
    }

    #[test]
    fn prefix_matching() {
        assert!(key_matches("posts", "posts-42"));
        assert!(key_matches("posts-42", "posts-42"));
        assert!(!key_matches("posts-42", "posts"));
        assert!(!key_matches("users", "posts-42"));
    }

    #[tokio::test]
    async fn subscribers_see_events_published_after_subscribing() {
        let bus = RefetchBus::new();
        bus.refetch(&["before"]);

        let mut sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let published = bus.refetch(&["posts", "1"]);
        let seen = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, published);
        assert_eq!(seen.key, "posts-1");
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let bus = RefetchBus::new();
        let sub = bus.subscribe();
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    proptest::proptest! {
        #[test]
        fn joined_prefix_always_matches_full_key(
            segments in proptest::collection::vec("[a-z0-9]{1,8}", 1..5),
            cut in 0usize..5,
        ) {
            let full = join_key(&segments);
            let prefix = join_key(&segments[..cut.min(segments.len())]);
            proptest::prop_assert!(key_matches(&prefix, &full));
        }
    }

    #[tokio::test]
    async fn buses_are_independent() {
        let a = RefetchBus::new();
        let b = RefetchBus::new();
        a.refetch(&["x"]);
        assert!(a.latest().is_some());
        assert!(b.latest().is_none());
    }
}
