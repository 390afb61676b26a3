//! Concurrency governor.
//!
//! A counting admission gate that bounds how many executions are in flight.
//! Waiters suspend cooperatively and are admitted in arrival order (tokio's
//! semaphore is fair). Holding a [`GovernorPermit`] is holding a slot; the
//! slot is returned when the permit drops, on every exit path.
//!
//! The governor does not time anything out. A future that never resolves
//! keeps its slot forever.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{StashError, StashResult};

/// Bounded admission for concurrent work.
#[derive(Debug, Clone)]
pub struct Governor {
    semaphore: Arc<Semaphore>,
    max: usize,
}

/// One admitted slot. Released on drop.
#[derive(Debug)]
pub struct GovernorPermit {
    _permit: OwnedSemaphorePermit,
}

impl Governor {
    /// Create a governor admitting at most `max` holders (at least one).
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Configured width.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.max.saturating_sub(self.available())
    }

    /// Wait for a slot.
    pub async fn acquire(&self) -> StashResult<GovernorPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| StashError::GovernorClosed)?;
        Ok(GovernorPermit { _permit: permit })
    }

    /// Run `fut` while holding a slot.
    pub async fn run<F, T>(&self, fut: F) -> StashResult<T>
    where
        F: Future<Output = StashResult<T>>,
    {
        let _permit = self.acquire().await?;
        fut.await
    }

    /// Refuse all further admissions. Current holders keep their slots;
    /// pending and future `acquire` calls fail with `GovernorClosed`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExecutionError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_width_is_at_least_one() {
        let governor = Governor::new(0);
        assert_eq!(governor.max(), 1);
        assert_eq!(governor.available(), 1);
        assert_eq!(governor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_permit_drop_releases_slot() {
        let governor = Governor::new(2);
        let a = governor.acquire().await.unwrap();
        let _b = governor.acquire().await.unwrap();
        assert_eq!(governor.in_flight(), 2);
        assert_eq!(governor.available(), 0);
        drop(a);
        assert_eq!(governor.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_run_releases_on_error() {
        let governor = Governor::new(1);
        let result: StashResult<()> = governor
            .run(async { Err(ExecutionError::new("op", "boom").into()) })
            .await;
        assert!(matches!(result, Err(StashError::Execution(_))));
        assert_eq!(governor.available(), 1);

        let value = governor.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(governor.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_never_exceeds_max() {
        let governor = Governor::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let governor = governor.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                governor
                    .run(async {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(governor.available(), 3);
    }

    #[tokio::test]
    async fn test_admission_is_fifo() {
        let governor = Governor::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = governor.acquire().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..5 {
            let governor = governor.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = governor.acquire().await.unwrap();
                order.lock().unwrap().push(i);
            }));
            // let the task park on acquire before queueing the next one
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drop(gate);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_close_rejects_waiters() {
        let governor = Governor::new(1);
        let held = governor.acquire().await.unwrap();
        governor.close();
        assert!(governor.is_closed());
        assert!(matches!(
            governor.acquire().await,
            Err(StashError::GovernorClosed)
        ));
        drop(held);
    }
}
