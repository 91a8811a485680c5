//! Execution context for a job run.
//!
//! The context carries the caller's concurrency limit: how many items may be
//! generated but not yet fully consumed at any instant.

use thiserror::Error;

/// Errors that can occur when building an execution context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The in-flight limit must allow at least one item.
    #[error("max_in_flight must be at least 1, got {0}")]
    ZeroCapacity(usize),

    /// The in-flight limit exceeds what the permit counter can represent.
    #[error("max_in_flight {0} exceeds the supported maximum of {max}", max = ExecutionContext::MAX_IN_FLIGHT)]
    TooLarge(usize),
}

/// Caller-supplied settings for one `execute` call.
///
/// The default context allows a single item in flight, which processes the
/// stream fully sequentially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    max_in_flight: usize,
}

impl ExecutionContext {
    /// Largest accepted limit. Drain acquires every permit in one `u32` batch.
    pub const MAX_IN_FLIGHT: usize = u32::MAX as usize >> 3;

    /// Create a context allowing `max_in_flight` concurrent items.
    pub fn new(max_in_flight: usize) -> Result<Self, ContextError> {
        if max_in_flight == 0 {
            return Err(ContextError::ZeroCapacity(max_in_flight));
        }
        if max_in_flight > Self::MAX_IN_FLIGHT {
            return Err(ContextError::TooLarge(max_in_flight));
        }
        Ok(Self { max_in_flight })
    }

    /// Context with one item in flight at a time.
    pub fn sequential() -> Self {
        Self { max_in_flight: 1 }
    }

    /// Get the concurrency limit.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::sequential()
    }
}
