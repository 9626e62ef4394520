//! Bounded task pools.
//!
//! The engine keeps two pools: one for inbound (server side) connection work
//! and one for outbound (client side). A spawned task waits for a permit
//! before it runs, so an exhausted pool delays new work instead of
//! rejecting it.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// A semaphore-bounded spawner.
#[derive(Clone)]
pub struct TaskPool {
    name: &'static str,
    size: usize,
    semaphore: Arc<Semaphore>,
}

impl TaskPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            size,
            semaphore: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks currently holding a permit.
    pub fn running(&self) -> usize {
        self.size - self.semaphore.available_permits()
    }

    /// Spawn `fut` on `runtime` once a permit is free.
    pub fn spawn<F>(&self, runtime: &Handle, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let name = self.name;
        runtime.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    tracing::debug!(pool = name, "pool closed, task dropped");
                    return;
                }
            };
            fut.await;
        })
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("running", &self.running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let pool = TaskPool::new("test", 2);
        let runtime = Handle::current();
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let live = live.clone();
                let peak = peak.clone();
                pool.spawn(&runtime, async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.running(), 0);
    }

    #[test]
    fn test_zero_size_is_one() {
        assert_eq!(TaskPool::new("tiny", 0).size(), 1);
    }
}
