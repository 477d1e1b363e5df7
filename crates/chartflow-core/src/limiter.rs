//! Counting admission gate
//!
//! Bounds how many jobs are in flight at once. Capture and analysis each get
//! their own limiter, so the two tiers never share capacity:
//! - [`ConcurrencyLimiter::acquire`] waits for a slot
//! - the returned [`Permit`] frees the slot when dropped, on every exit path
//! - [`ConcurrencyLimiter::close`] rejects new and pending acquisitions

use crate::error::LimiterError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Limiter statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
    /// Configured bound
    pub capacity: usize,
    /// Permits currently held
    pub in_flight: usize,
    /// Highest simultaneous in-flight count observed
    pub peak: usize,
    /// Total permits handed out
    pub admitted: usize,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    admitted: AtomicUsize,
}

impl Counters {
    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.admitted.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded admission gate shared by every job of one tier
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl ConcurrencyLimiter {
    /// Create new limiter; a capacity of zero is raised to one
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Wait for a slot
    ///
    /// # Errors
    /// - `LimiterError::Closed` if the limiter was closed before a slot freed up
    pub async fn acquire(&self) -> Result<Permit, LimiterError> {
        let inner = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LimiterError::Closed)?;
        Ok(self.admit(inner))
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|inner| self.admit(inner))
    }

    fn admit(&self, inner: OwnedSemaphorePermit) -> Permit {
        self.counters.enter();
        Permit {
            _inner: inner,
            counters: Arc::clone(&self.counters),
        }
    }

    /// Stop admitting work; waiters wake with `LimiterError::Closed`
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Whether the limiter was closed
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Configured bound
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            capacity: self.capacity,
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            peak: self.counters.peak.load(Ordering::SeqCst),
            admitted: self.counters.admitted.load(Ordering::SeqCst),
        }
    }
}

/// A held slot; released on drop
#[derive(Debug)]
pub struct Permit {
    _inner: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Permit {
    /// Release explicitly
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.counters.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);
        assert!(limiter.try_acquire().is_none());

        a.release();
        assert_eq!(limiter.available(), 1);
        drop(b);

        let stats = limiter.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.peak, 2);
        assert_eq!(stats.admitted, 2);
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.try_acquire().unwrap();

        let mut waiter = tokio_test::task::spawn(limiter.acquire());
        tokio_test::assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        let permit = tokio_test::assert_ready_ok!(waiter.poll());
        assert_eq!(limiter.stats().in_flight, 1);
        drop(permit);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.capacity(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_close_rejects_waiters() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        limiter.close();

        assert_eq!(waiter.await.unwrap(), Err(LimiterError::Closed));
        assert!(limiter.is_closed());
        drop(held);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(3);
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let limiter = limiter.clone();
                async move {
                    let _permit = limiter.acquire().await.unwrap();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
            .collect();
        futures::future::join_all(tasks).await;

        let stats = limiter.stats();
        assert_eq!(stats.peak, 3);
        assert_eq!(stats.admitted, 10);
        assert_eq!(stats.in_flight, 0);
    }
}
