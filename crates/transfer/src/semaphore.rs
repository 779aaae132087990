//! Counting semaphore with FIFO hand-off.
//!
//! `release` hands a freed permit straight to the oldest waiter instead of
//! returning it to the pool, so late arrivals cannot overtake queued
//! acquirers and the pool never shows spurious spare capacity.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;

/// Bounds the number of simultaneously running operations.
pub struct Semaphore {
    inner: Mutex<SemaphoreInner>,
}

struct SemaphoreInner {
    permits: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl Semaphore {
    /// Creates a semaphore with `permits` initially available.
    pub fn new(permits: usize) -> Self {
        Self {
            inner: Mutex::new(SemaphoreInner {
                permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Waits for a permit. The permit is released when the guard drops,
    /// on both the success and the error path of the guarded operation.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        let rx = {
            let mut inner = self.inner.lock().unwrap();
            if inner.permits > 0 {
                inner.permits -= 1;
                return SemaphorePermit { semaphore: self };
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };

        let mut waiter = Waiter {
            semaphore: self,
            rx: Some(rx),
        };
        waiter.wait().await;
        SemaphorePermit { semaphore: self }
    }

    /// Returns a permit, waking the oldest live waiter if there is one.
    fn release(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.permits += 1;
        while let Some(tx) = inner.waiters.pop_front() {
            // A failed send means the waiter gave up; try the next one.
            if tx.send(()).is_ok() {
                inner.permits -= 1;
                break;
            }
        }
    }

    /// Permits currently available.
    pub fn available_permits(&self) -> usize {
        self.inner.lock().unwrap().permits
    }

    /// Number of queued acquirers.
    pub fn waiting(&self) -> usize {
        self.inner.lock().unwrap().waiters.len()
    }
}

/// RAII permit; dropping it releases the slot.
#[must_use = "the permit is released as soon as it is dropped"]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// A queued acquire. If dropped after a permit was handed to it but before
/// observing it, the permit is passed on instead of leaking.
struct Waiter<'a> {
    semaphore: &'a Semaphore,
    rx: Option<oneshot::Receiver<()>>,
}

impl Waiter<'_> {
    async fn wait(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            let _ = rx.await;
        }
        self.rx = None;
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.semaphore.release();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_with_free_permit_is_immediate() {
        let sem = Semaphore::new(2);
        let p1 = sem.acquire().await;
        let p2 = sem.acquire().await;
        assert_eq!(sem.available_permits(), 0);
        drop(p1);
        assert_eq!(sem.available_permits(), 1);
        drop(p2);
        assert_eq!(sem.available_permits(), 2);
    }

    #[tokio::test]
    async fn release_hands_permit_to_waiter() {
        let sem = Arc::new(Semaphore::new(1));
        let held = sem.acquire().await;

        let sem2 = Arc::clone(&sem);
        let task = tokio::spawn(async move {
            let _p = sem2.acquire().await;
        });
        while sem.waiting() == 0 {
            tokio::task::yield_now().await;
        }

        drop(held);
        // The permit went to the waiter, not back into the pool.
        assert_eq!(sem.waiting(), 0);
        task.await.unwrap();
        assert_eq!(sem.available_permits(), 1);
    }

    #[tokio::test]
    async fn waiters_are_woken_in_fifo_order() {
        let sem = Arc::new(Semaphore::new(1));
        let order = Arc::new(Mutex::new(Vec::new()));
        let held = sem.acquire().await;

        let mut handles = Vec::new();
        for i in 0..4 {
            let s = Arc::clone(&sem);
            let o = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _p = s.acquire().await;
                o.lock().unwrap().push(i);
            }));
            // Make sure waiter `i` is queued before spawning the next.
            while sem.waiting() < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(held);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_leak_permit() {
        let sem = Semaphore::new(1);
        let held = sem.acquire().await;

        {
            let pending = sem.acquire();
            tokio::pin!(pending);
            // Poll once so it queues, then abandon it.
            assert!(
                tokio::time::timeout(Duration::from_millis(1), &mut pending)
                    .await
                    .is_err()
            );
        }

        drop(held);
        assert_eq!(sem.available_permits(), 1);
        let _again = sem.acquire().await;
        assert_eq!(sem.available_permits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounds_concurrency() {
        let sem = Arc::new(Semaphore::new(3));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let s = Arc::clone(&sem);
            let f = Arc::clone(&in_flight);
            let pk = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _p = s.acquire().await;
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                pk.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                f.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(sem.available_permits(), 3);
    }
}
