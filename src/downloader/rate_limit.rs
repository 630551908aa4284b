//! Shared sliding-window rate limiter
//!
//! Permits drawn for a request are held for the full window and then released,
//! so at most `max_weight` units are in flight per window across every job
//! sharing the limiter.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::downloader::config::RateLimitConfig;

/// Weight-based rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    max_weight: usize,
    semaphore: Arc<Semaphore>,
    window: Duration,
}

impl RateLimiter {
    /// Create a weight-based rate limiter
    ///
    /// # Arguments
    /// * `max_weight` - Maximum weight units per window
    /// * `window` - Time window for rate limit
    pub fn weight_based(max_weight: usize, window: Duration) -> Self {
        Self {
            max_weight,
            semaphore: Arc::new(Semaphore::new(max_weight)),
            window,
        }
    }

    /// Limiter sized from config
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::weight_based(config.max_weight, config.window)
    }

    /// Budget per window
    pub fn capacity(&self) -> usize {
        self.max_weight
    }

    /// Units currently available
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquire permits for a request
    ///
    /// Waits until `weight` units are free. The permits are returned to the pool
    /// once the window has elapsed, not when the request completes.
    pub async fn acquire(&self, weight: usize) -> Result<(), RateLimitError> {
        if weight > self.capacity() {
            return Err(RateLimitError::ExceedsCapacity {
                weight,
                capacity: self.capacity(),
            });
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_many_owned(weight as u32)
            .await
            .map_err(|e| RateLimitError::AcquireError(e.to_string()))?;

        let window = self.window;
        tokio::spawn(async move {
            sleep(window).await;
            drop(permit);
        });

        Ok(())
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Failed to acquire permits
    #[error("failed to acquire rate limit permits: {0}")]
    AcquireError(String),

    /// Request weight larger than the whole budget
    #[error("request weight {weight} exceeds rate limit capacity {capacity}")]
    ExceedsCapacity {
        /// Requested weight
        weight: usize,
        /// Budget per window
        capacity: usize,
    },
}
