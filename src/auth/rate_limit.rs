use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use chrono::{DateTime, Utc, Duration};

/// Start of the sliding window that ends at `now`.
pub fn window_start(now: DateTime<Utc>, window_size: Duration) -> DateTime<Utc> {
    now - window_size
}

/// The limit counts requests issued, so `count` includes used and expired codes.
pub fn limit_reached(count: i64, max_requests: u32) -> bool {
    count >= i64::from(max_requests)
}

/// Per-phone-number serialization point for strict rate limiting.
///
/// Holding the guard across count-then-create makes the limit exact for one
/// process. Without it concurrent requests for the same number may overshoot
/// the limit slightly.
#[derive(Default)]
pub struct IdentityGate {
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl IdentityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, identity: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.write().await;
            locks
                .entry(identity.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drops locks nobody holds or waits on. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let mut locks = self.locks.write().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub async fn tracked(&self) -> usize {
        self.locks.read().await.len()
    }
}
