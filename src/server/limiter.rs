//! Connection Limiter: admission control for one listener.
//!
//! A token is taken before a connection is accepted and given back when
//! the connection is dropped. Closing the limiter wakes every blocked
//! acquire with `LimiterClosed`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::LimiterClosed;

pub struct ConnectionLimiter {
    /// `None` when unlimited.
    semaphore: Option<Arc<Semaphore>>,
    capacity: usize,
    in_use: Arc<AtomicUsize>,
    /// Tokens bound to an accepted socket.
    connections: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl ConnectionLimiter {
    /// `capacity <= 0` means unlimited.
    pub fn new(capacity: i64) -> Self {
        let capacity = usize::try_from(capacity).unwrap_or(0);
        let semaphore = (capacity > 0).then(|| Arc::new(Semaphore::new(capacity)));
        Self {
            semaphore,
            capacity,
            in_use: Arc::new(AtomicUsize::new(0)),
            connections: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Waits for a free slot. Cancel-safe.
    pub async fn acquire(&self) -> Result<AdmissionToken, LimiterClosed> {
        if self.is_closed() {
            return Err(LimiterClosed);
        }
        let permit = match &self.semaphore {
            Some(semaphore) => Some(
                Arc::clone(semaphore)
                    .acquire_owned()
                    .await
                    .map_err(|_| LimiterClosed)?,
            ),
            None => None,
        };
        self.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(AdmissionToken {
            permit: Mutex::new(permit),
            released: AtomicBool::new(false),
            attached: AtomicBool::new(false),
            in_use: Arc::clone(&self.in_use),
            connections: Arc::clone(&self.connections),
        })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(semaphore) = &self.semaphore {
            semaphore.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// `None` when unlimited.
    pub fn capacity(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|_| self.capacity)
    }

    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Outstanding tokens, including one an accept loop may hold while it
    /// waits for the next socket.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Live connections: tokens attached to an accepted socket.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Share of capacity in use; 0 when unlimited.
    pub fn utilization(&self) -> f64 {
        match self.capacity() {
            Some(capacity) => self.in_use() as f64 / capacity.max(1) as f64,
            None => 0.0,
        }
    }
}

/// One admitted connection's slot. Released on drop or on the first
/// `release`; later releases do nothing.
pub struct AdmissionToken {
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    released: AtomicBool,
    attached: AtomicBool,
    in_use: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
}

impl AdmissionToken {
    /// Bind the token to an accepted socket. Counted once, and not at all
    /// after release.
    pub fn attach(&self) {
        if self.is_released() || self.attached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.attached.load(Ordering::SeqCst) {
            self.connections.fetch_sub(1, Ordering::SeqCst);
        }
        self.permit.lock().take();
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for AdmissionToken {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for AdmissionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionToken")
            .field("attached", &self.attached.load(Ordering::SeqCst))
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn third_acquire_waits_for_a_release() {
        let limiter = Arc::new(ConnectionLimiter::new(2));
        let first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), Some(0));

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "third acquire must block");

        first.release();
        let third = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("third acquire should complete after release")
            .unwrap();
        assert!(third.is_ok());
        assert_eq!(limiter.in_use(), 2);
    }

    #[tokio::test]
    async fn close_unblocks_waiters() {
        let limiter = Arc::new(ConnectionLimiter::new(1));
        let _held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        limiter.close();

        let result = timeout(Duration::from_millis(500), waiter)
            .await
            .expect("blocked acquire must return after close")
            .unwrap();
        assert_eq!(result.unwrap_err(), LimiterClosed);
        assert!(limiter.acquire().await.is_err());
    }

    #[tokio::test]
    async fn double_release_is_a_no_op() {
        let limiter = ConnectionLimiter::new(2);
        let token = limiter.acquire().await.unwrap();
        token.release();
        token.release();
        drop(token);

        assert_eq!(limiter.available(), Some(2));
        assert_eq!(limiter.in_use(), 0);
    }

    #[tokio::test]
    async fn non_positive_capacity_is_unlimited() {
        for capacity in [0, -5] {
            let limiter = ConnectionLimiter::new(capacity);
            let tokens: Vec<_> = futures_util::future::join_all((0..1000).map(|_| limiter.acquire()))
                .await
                .into_iter()
                .map(Result::unwrap)
                .collect();
            assert_eq!(limiter.in_use(), 1000);
            assert_eq!(limiter.capacity(), None);
            assert_eq!(limiter.utilization(), 0.0);
            drop(tokens);
            assert_eq!(limiter.in_use(), 0);
        }
    }

    #[tokio::test]
    async fn utilization_tracks_tokens() {
        let limiter = ConnectionLimiter::new(4);
        let _a = limiter.acquire().await.unwrap();
        assert_eq!(limiter.utilization(), 0.25);
    }

    #[tokio::test]
    async fn attached_tokens_count_as_connections() {
        let limiter = ConnectionLimiter::new(4);
        let pending = limiter.acquire().await.unwrap();
        let admitted = limiter.acquire().await.unwrap();
        admitted.attach();
        admitted.attach();

        assert_eq!(limiter.in_use(), 2);
        assert_eq!(limiter.connections(), 1);

        admitted.release();
        admitted.attach();
        assert_eq!(limiter.connections(), 0);
        drop(pending);
        assert_eq!(limiter.in_use(), 0);
    }
}
