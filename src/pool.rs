use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::error;

/// Bounded-concurrency executor shared by the channel, video and segment
/// levels. At most `max_workers` items are in flight; outcomes come back
/// in item order regardless of completion order.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run `worker` over all items. A single item's failure is that
    /// item's outcome and never cancels its siblings; workers encode
    /// failure in their return value.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, worker: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let worker = Arc::new(worker);
        let (tx, mut rx) = mpsc::channel(total);

        for (index, item) in items.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let worker = Arc::clone(&worker);
            let tx = tx.clone();

            tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();
                let result = (*worker)(index, item).await;
                if let Err(e) = tx.send((index, result)).await {
                    error!("Failed to deliver worker result: {}", e);
                }
            });
        }
        drop(tx);

        let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
        while let Some((index, result)) = rx.recv().await {
            slots[index] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }
}
