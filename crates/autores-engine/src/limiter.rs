//! Counted resolution slots
//!
//! Caps the number of resolutions executing at once:
//! - Acquisition waits up to a deadline, then fails with `CapacityExceeded`
//! - Capacity is passed per call so config changes apply to new requests
//!   without evicting in-flight holders
//! - Release validates the token; a stale or foreign token never corrupts
//!   the count

use crate::error::LimiterError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

static NEXT_LIMITER_ID: AtomicU64 = AtomicU64::new(1);

/// Proof of one held slot
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SlotToken {
    limiter: u64,
    id: u64,
}

impl SlotToken {
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Limiter statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterStats {
    /// Slots currently held
    pub in_flight: usize,
    /// Highest concurrent holders seen
    pub peak: usize,
    /// Successful acquisitions
    pub acquired: u64,
    /// Acquisitions that gave up waiting
    pub timed_out: u64,
}

#[derive(Debug, Default)]
struct LimiterState {
    outstanding: HashSet<u64>,
    next_token: u64,
    stats: LimiterStats,
}

/// Counting limiter over resolution slots
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    id: u64,
    state: Mutex<LimiterState>,
    released: Notify,
}

impl ConcurrencyLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_LIMITER_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(LimiterState::default()),
            released: Notify::new(),
        }
    }

    /// Take a slot without waiting
    pub fn try_acquire(&self, capacity: usize) -> Option<SlotToken> {
        let mut state = self.state.lock();
        if state.stats.in_flight >= capacity {
            return None;
        }
        state.next_token += 1;
        let id = state.next_token;
        state.outstanding.insert(id);
        state.stats.in_flight += 1;
        state.stats.acquired += 1;
        state.stats.peak = state.stats.peak.max(state.stats.in_flight);
        Some(SlotToken {
            limiter: self.id,
            id,
        })
    }

    /// Take a slot, waiting up to `wait` for one to free up
    ///
    /// # Errors
    /// - `LimiterError::CapacityExceeded` if no slot frees up in time
    pub async fn acquire(&self, capacity: usize, wait: Duration) -> Result<SlotToken, LimiterError> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before checking so a release in between is not lost
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(token) = self.try_acquire(capacity) {
                return Ok(token);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if let Some(token) = self.try_acquire(capacity) {
                    return Ok(token);
                }
                self.state.lock().stats.timed_out += 1;
                return Err(LimiterError::CapacityExceeded {
                    capacity,
                    waited: wait,
                });
            }
        }
    }

    /// Return a slot
    ///
    /// # Errors
    /// - `LimiterError::ForeignToken` if another limiter issued the token
    /// - `LimiterError::AlreadyReleased` if the token was already returned
    pub fn release(&self, token: &SlotToken) -> Result<(), LimiterError> {
        if token.limiter != self.id {
            return Err(LimiterError::ForeignToken(token.id));
        }
        {
            let mut state = self.state.lock();
            if !state.outstanding.remove(&token.id) {
                return Err(LimiterError::AlreadyReleased(token.id));
            }
            state.stats.in_flight -= 1;
        }
        self.released.notify_waiters();
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().stats.in_flight
    }

    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        self.state.lock().stats
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot released on drop, so a cancelled resolution still frees its slot
#[derive(Debug)]
pub struct SlotGuard<'a> {
    limiter: &'a ConcurrencyLimiter,
    token: Option<SlotToken>,
}

impl<'a> SlotGuard<'a> {
    #[must_use]
    pub fn new(limiter: &'a ConcurrencyLimiter, token: SlotToken) -> Self {
        Self {
            limiter,
            token: Some(token),
        }
    }

    /// Release now instead of at end of scope
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.limiter.release(&token) {
                tracing::error!(error = %e, "slot release failed");
            }
        }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn try_acquire_respects_capacity() {
        let limiter = ConcurrencyLimiter::new();
        let a = limiter.try_acquire(2).unwrap();
        let _b = limiter.try_acquire(2).unwrap();
        assert!(limiter.try_acquire(2).is_none());

        limiter.release(&a).unwrap();
        assert!(limiter.try_acquire(2).is_some());
        assert_eq!(limiter.stats().peak, 2);
    }

    #[test]
    fn double_release_is_refused() {
        let limiter = ConcurrencyLimiter::new();
        let token = limiter.try_acquire(1).unwrap();
        limiter.release(&token).unwrap();
        assert_eq!(
            limiter.release(&token),
            Err(LimiterError::AlreadyReleased(token.id()))
        );
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn foreign_token_is_refused() {
        let ours = ConcurrencyLimiter::new();
        let theirs = ConcurrencyLimiter::new();
        let _held = ours.try_acquire(1).unwrap();
        let foreign = theirs.try_acquire(1).unwrap();

        assert!(matches!(ours.release(&foreign), Err(LimiterError::ForeignToken(_))));
        assert_eq!(ours.in_flight(), 1);
        assert_eq!(theirs.in_flight(), 1);
    }

    #[test]
    fn shrinking_capacity_does_not_evict() {
        let limiter = ConcurrencyLimiter::new();
        let _a = limiter.try_acquire(3).unwrap();
        let _b = limiter.try_acquire(3).unwrap();

        assert!(limiter.try_acquire(1).is_none());
        assert_eq!(limiter.in_flight(), 2);
    }

    #[tokio::test]
    async fn acquire_times_out_when_full() {
        let limiter = ConcurrencyLimiter::new();
        let _held = limiter.try_acquire(1).unwrap();

        let err = limiter.acquire(1, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, LimiterError::CapacityExceeded { capacity: 1, .. }));
        assert_eq!(limiter.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn waiter_wakes_on_release() {
        let limiter = Arc::new(ConcurrencyLimiter::new());
        let held = limiter.try_acquire(1).unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                limiter
                    .acquire(1, Duration::from_secs(5))
                    .await
                    .map(|t| t.id())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        limiter.release(&held).unwrap();

        let id = waiter.await.unwrap().unwrap();
        assert_ne!(id, held.id());
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let limiter = ConcurrencyLimiter::new();
        {
            let token = limiter.acquire(1, Duration::ZERO).await.unwrap();
            let _guard = SlotGuard::new(&limiter, token);
            assert_eq!(limiter.in_flight(), 1);
        }
        assert_eq!(limiter.in_flight(), 0);
    }
}
