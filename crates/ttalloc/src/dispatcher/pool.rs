use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

/// Bounded pool shared by every fan-out of a dispatcher.
///
/// Each unit runs in its own task. A call admits at most as many tasks as it
/// has units, and all calls together never exceed `max_workers`.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs all units and waits until every one of them has finished.
    ///
    /// Results keep the order of `units`; a unit whose task panicked yields
    /// `None`. Units must not fan out through the same pool again.
    pub async fn run_all<Fut>(
        &self,
        units: impl IntoIterator<Item = Fut>,
    ) -> Vec<Option<Fut::Output>>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let handles: Vec<_> = units
            .into_iter()
            .map(|unit| {
                let permits = self.permits.clone();
                tokio::spawn(async move {
                    // The semaphore is never closed.
                    let _permit = permits.acquire_owned().await.ok();
                    unit.await
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|result| match result {
                Ok(output) => Some(output),
                Err(error) => {
                    log::error!("Fan-out task failed: {error}");
                    None
                }
            })
            .collect()
    }
}
