//! Bulkhead pattern implementation
//!
//! Limits concurrent access to a resource to prevent overload. Callers that
//! cannot get a permit wait; the wait can optionally be bounded in time and
//! in the number of simultaneous waiters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, warn};

/// Bulkhead configuration
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Name of this bulkhead (for logging)
    pub name: String,
    /// Maximum concurrent executions
    pub max_concurrent: usize,
    /// Maximum wait time for acquiring a permit (None waits indefinitely)
    pub max_wait: Option<Duration>,
    /// Maximum number of callers waiting for a permit (None is unbounded)
    pub max_queue_depth: Option<usize>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_concurrent: 10,
            max_wait: None,
            max_queue_depth: None,
        }
    }
}

impl BulkheadConfig {
    /// Create a new bulkhead config with a name
    pub fn new(name: &str, max_concurrent: usize) -> Self {
        Self {
            name: name.to_string(),
            max_concurrent,
            ..Default::default()
        }
    }

    /// Set max wait time
    pub fn with_max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait);
        self
    }

    /// Bound the number of waiting callers; further callers are rejected
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }
}

/// A permit that must be held while executing a bulkhead-protected operation
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
    bulkhead_name: Arc<str>,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        debug!(bulkhead = %self.bulkhead_name, "Bulkhead permit released");
    }
}

/// Point-in-time view of a bulkhead
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadSnapshot {
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub waiting: usize,
    pub closed: bool,
}

/// Errors returned when a permit cannot be obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkheadError {
    /// Too many callers are already waiting
    QueueFull { max_queue_depth: usize },
    /// No permit became available within the configured wait
    Timeout { waited: Duration },
    /// The bulkhead was closed and admits nothing
    Closed,
}

impl std::fmt::Display for BulkheadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BulkheadError::QueueFull { max_queue_depth } => {
                write!(f, "Admission queue is full ({} waiting)", max_queue_depth)
            }
            BulkheadError::Timeout { waited } => {
                write!(f, "Timed out after {}ms waiting for capacity", waited.as_millis())
            }
            BulkheadError::Closed => write!(f, "Bulkhead is closed"),
        }
    }
}

impl std::error::Error for BulkheadError {}

/// Decrements the waiting counter however the wait ends.
struct WaitingGuard(Arc<AtomicUsize>);

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bulkhead for limiting concurrent executions
#[derive(Clone)]
pub struct Bulkhead {
    config: BulkheadConfig,
    name: Arc<str>,
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
}

impl Bulkhead {
    /// Create a new bulkhead with the given configuration
    pub fn new(config: BulkheadConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            name: Arc::from(config.name.as_str()),
            config,
            semaphore,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn permit(&self, permit: OwnedSemaphorePermit) -> BulkheadPermit {
        debug!(bulkhead = %self.name, "Bulkhead permit acquired");
        BulkheadPermit {
            _permit: permit,
            bulkhead_name: Arc::clone(&self.name),
        }
    }

    /// Acquire a permit, suspending until one frees up.
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => return Ok(self.permit(permit)),
            Err(TryAcquireError::Closed) => return Err(BulkheadError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let previously_waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _guard = WaitingGuard(Arc::clone(&self.waiting));

        if let Some(max_queue_depth) = self.config.max_queue_depth {
            if previously_waiting >= max_queue_depth {
                warn!(
                    bulkhead = %self.name,
                    max_concurrent = self.config.max_concurrent,
                    max_queue_depth,
                    "Bulkhead rejected request (queue full)"
                );
                return Err(BulkheadError::QueueFull { max_queue_depth });
            }
        }

        let acquired = match self.config.max_wait {
            Some(max_wait) => {
                match tokio::time::timeout(max_wait, self.semaphore.clone().acquire_owned()).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            bulkhead = %self.name,
                            max_wait_ms = max_wait.as_millis() as u64,
                            "Bulkhead timed out waiting for permit"
                        );
                        return Err(BulkheadError::Timeout { waited: max_wait });
                    }
                }
            }
            None => self.semaphore.clone().acquire_owned().await,
        };

        match acquired {
            Ok(permit) => Ok(self.permit(permit)),
            Err(_) => {
                warn!(bulkhead = %self.name, "Bulkhead semaphore closed");
                Err(BulkheadError::Closed)
            }
        }
    }

    /// Stop admitting work. Waiters and later callers get `Closed`;
    /// permits already handed out stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Get the number of available permits
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn snapshot(&self) -> BulkheadSnapshot {
        BulkheadSnapshot {
            max_concurrent: self.config.max_concurrent,
            in_flight: self
                .config
                .max_concurrent
                .saturating_sub(self.semaphore.available_permits()),
            waiting: self.waiting.load(Ordering::SeqCst),
            closed: self.semaphore.is_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulkhead(max_concurrent: usize) -> Bulkhead {
        Bulkhead::new(BulkheadConfig::new("test", max_concurrent))
    }

    #[tokio::test]
    async fn test_bulkhead_limits_concurrency() {
        let config = BulkheadConfig::new("test", 2).with_max_wait(Duration::from_millis(20));
        let bulkhead = Bulkhead::new(config);

        let permit1 = bulkhead.acquire().await.unwrap();
        let _permit2 = bulkhead.acquire().await.unwrap();

        // Third waits out the deadline
        assert!(matches!(bulkhead.acquire().await, Err(BulkheadError::Timeout { .. })));
        assert_eq!(bulkhead.snapshot().in_flight, 2);

        drop(permit1);
        assert!(bulkhead.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_bulkhead_available_permits() {
        let bulkhead = bulkhead(5);
        assert_eq!(bulkhead.available_permits(), 5);

        let permit = bulkhead.acquire().await.unwrap();
        assert_eq!(bulkhead.available_permits(), 4);

        drop(permit);
        assert_eq!(bulkhead.available_permits(), 5);
    }

    #[tokio::test]
    async fn test_waiter_resumes_when_permit_frees() {
        let bulkhead = bulkhead(1);
        let held = bulkhead.acquire().await.unwrap();

        let waiter = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bulkhead.snapshot().waiting, 1);

        drop(held);
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(bulkhead.snapshot().waiting, 0);
    }

    #[tokio::test]
    async fn test_bulkhead_wait_timeout() {
        let config = BulkheadConfig::new("test", 1).with_max_wait(Duration::from_millis(50));
        let bulkhead = Bulkhead::new(config);

        let _permit = bulkhead.acquire().await.unwrap();

        let result = bulkhead.acquire().await;
        assert!(matches!(result, Err(BulkheadError::Timeout { .. })));
        assert_eq!(bulkhead.snapshot().waiting, 0);
    }

    #[tokio::test]
    async fn test_queue_depth_rejects_excess_waiters() {
        let config = BulkheadConfig::new("test", 1).with_max_queue_depth(1);
        let bulkhead = Bulkhead::new(config);
        let _held = bulkhead.acquire().await.unwrap();

        let first_waiter = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let rejected = bulkhead.acquire().await;
        assert_eq!(rejected.unwrap_err(), BulkheadError::QueueFull { max_queue_depth: 1 });

        first_waiter.abort();
    }

    #[tokio::test]
    async fn test_close_rejects_new_callers() {
        let bulkhead = bulkhead(2);
        bulkhead.close();

        assert_eq!(bulkhead.acquire().await.unwrap_err(), BulkheadError::Closed);
        assert!(bulkhead.snapshot().closed);
    }

    #[tokio::test]
    async fn test_bulkhead_concurrent_execution() {
        let bulkhead = Arc::new(bulkhead(3));
        let counter = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];

        for _ in 0..10 {
            let bulkhead = Arc::clone(&bulkhead);
            let counter = Arc::clone(&counter);
            let max_concurrent = Arc::clone(&max_concurrent);

            handles.push(tokio::spawn(async move {
                let _permit = bulkhead.acquire().await.unwrap();
                let current = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(current, Ordering::SeqCst);

                tokio::time::sleep(Duration::from_millis(10)).await;

                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        // Max concurrent should not exceed bulkhead limit
        assert!(max_concurrent.load(Ordering::SeqCst) <= 3);
    }
}
