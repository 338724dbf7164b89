//! Per-user leaky bucket on inbound chat traffic.
//!
//! Every accepted frame pours one unit into the sender's bucket, which
//! drains at `rate` units per second. A frame that would overflow
//! `capacity` is refused.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use hub_shared::UserId;

#[derive(Debug, Clone, Copy)]
struct Level {
    fill: f64,
    seen: Instant,
}

impl Level {
    fn drained(self, rate: f64, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.seen).as_secs_f64();
        (self.fill - elapsed * rate).max(0.0)
    }
}

#[derive(Clone)]
pub struct ChatThrottle {
    levels: Arc<Mutex<HashMap<UserId, Level>>>,
    rate: f64,
    capacity: f64,
}

impl ChatThrottle {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            levels: Arc::new(Mutex::new(HashMap::new())),
            rate: rate.max(0.0),
            capacity: capacity.max(1.0),
        }
    }

    pub fn check(&self, user: &UserId) -> bool {
        self.admit(user, Instant::now())
    }

    fn admit(&self, user: &UserId, now: Instant) -> bool {
        let mut levels = self.levels.lock();
        let fill = levels
            .get(user)
            .map_or(0.0, |level| level.drained(self.rate, now));

        if fill + 1.0 > self.capacity {
            warn!(user = %user, "Chat rate limit exceeded");
            return false;
        }
        levels.insert(
            user.clone(),
            Level {
                fill: fill + 1.0,
                seen: now,
            },
        );
        true
    }

    /// Forget users with no accepted frame for `max_idle`.
    pub fn purge_stale(&self, max_idle: Duration) {
        let now = Instant::now();
        self.levels
            .lock()
            .retain(|_, level| now.saturating_duration_since(level.seen) < max_idle);
    }
}

impl Default for ChatThrottle {
    fn default() -> Self {
        Self::new(5.0, 20.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_burst_then_limits() {
        let throttle = ChatThrottle::new(0.001, 3.0);
        let alice = UserId::from("alice");

        for _ in 0..3 {
            assert!(throttle.check(&alice));
        }
        assert!(!throttle.check(&alice));
    }

    #[test]
    fn test_bucket_drains_over_time() {
        let throttle = ChatThrottle::new(2.0, 2.0);
        let alice = UserId::from("alice");
        let start = Instant::now();

        assert!(throttle.admit(&alice, start));
        assert!(throttle.admit(&alice, start));
        assert!(!throttle.admit(&alice, start));

        // Half a second drains one unit at two per second.
        let later = start + Duration::from_millis(500);
        assert!(throttle.admit(&alice, later));
        assert!(!throttle.admit(&alice, later));

        assert!(throttle.admit(&alice, later + Duration::from_secs(60)));
    }

    #[test]
    fn test_refusals_do_not_fill_the_bucket() {
        let throttle = ChatThrottle::new(1.0, 1.0);
        let bob = UserId::from("bob");
        let start = Instant::now();

        assert!(throttle.admit(&bob, start));
        for ms in [100, 200, 300] {
            assert!(!throttle.admit(&bob, start + Duration::from_millis(ms)));
        }
        assert!(throttle.admit(&bob, start + Duration::from_secs(1)));
    }

    #[test]
    fn test_users_are_independent() {
        let throttle = ChatThrottle::new(0.001, 1.0);
        assert!(throttle.check(&"alice".into()));
        assert!(!throttle.check(&"alice".into()));
        assert!(throttle.check(&"bob".into()));
    }

    #[test]
    fn test_purge_stale() {
        let throttle = ChatThrottle::default();
        assert!(throttle.check(&"alice".into()));

        throttle.purge_stale(Duration::from_secs(600));
        assert_eq!(throttle.levels.lock().len(), 1);

        throttle.purge_stale(Duration::ZERO);
        assert!(throttle.levels.lock().is_empty());
    }
}
