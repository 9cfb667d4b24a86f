//! Request concurrency budget.
//!
//! Every request runs all value queries of its feature type at once, so the
//! number of concurrent requests is the connection budget divided by the
//! largest number of value queries any registered feature type needs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use featsql_core::config::{ProviderConfig, MIN_QUEUE_SIZE};

use crate::error::{Error, Result};

/// Bounded number of running requests with a bounded wait queue.
#[derive(Debug, Clone)]
pub struct ConcurrencyBudget {
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    capacity: usize,
    queue_size: usize,
    max_connections: usize,
}

/// Slot held by a running request, released on drop.
#[derive(Debug)]
pub struct RequestPermit {
    _permit: OwnedSemaphorePermit,
}

struct Waiting<'a>(&'a AtomicUsize);

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyBudget {
    /// Budget for the machine's available parallelism.
    pub fn new(config: &ProviderConfig, max_queries: usize) -> Result<Self> {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_cpus(config, max_queries, cpus)
    }

    pub fn with_cpus(config: &ProviderConfig, max_queries: usize, cpus: usize) -> Result<Self> {
        let max_queries = max_queries.max(1);
        let max_connections = if config.max_connections == 0 {
            max_queries * cpus
        } else {
            config.max_connections
        };
        let capacity = cpus.min(max_connections / max_queries);
        if capacity == 0 {
            return Err(Error::CapacityTooLow {
                max_connections,
                required: max_queries,
            });
        }
        let queue_size = config
            .queue_size
            .unwrap_or_else(|| MIN_QUEUE_SIZE.max(max_connections * capacity * 2) / max_queries);

        debug!(
            capacity,
            queue_size, max_connections, max_queries, "created concurrency budget"
        );
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            waiting: Arc::new(AtomicUsize::new(0)),
            capacity,
            queue_size,
            max_connections,
        })
    }

    /// Requests that may run at the same time.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Requests that may wait for a slot.
    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Requests currently waiting.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Wait for a slot. Fails at once when the queue is full.
    pub async fn acquire(&self) -> Result<RequestPermit> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(RequestPermit { _permit: permit });
        }
        let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = Waiting(&self.waiting);
        if queued >= self.queue_size {
            return Err(Error::QueueFull(queued));
        }
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Closed)?;
        Ok(RequestPermit { _permit: permit })
    }

    /// Reject every waiting and future request.
    pub fn close(&self) {
        self.semaphore.close();
    }
}
