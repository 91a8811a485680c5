//! Per-task worker pool cache.
//!
//! Every distinct task of a job gets one worker pool, created on first use and
//! reused for every item of the run. The cache is owned by a single `execute`
//! call and releases all its pools together once the run has drained.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::core::types::TaskKey;

use super::error::EngineError;
use super::pool::{PoolFactory, WorkerPool};

#[derive(Default)]
struct CacheState {
    pools: HashMap<TaskKey, Arc<WorkerPool>>,
    released: bool,
}

/// Lazily created, memoized worker pools keyed by task identity.
pub struct PoolCache {
    factory: Arc<dyn PoolFactory>,
    state: Mutex<CacheState>,
}

impl PoolCache {
    /// Create an empty cache drawing pools from `factory`.
    pub fn new(factory: Arc<dyn PoolFactory>) -> Self {
        Self {
            factory,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Get the pool for `key`, creating it with `workers` workers if absent.
    ///
    /// Lookup and insertion happen under one lock, so concurrent callers for
    /// the same key never create duplicate pools.
    pub fn get_or_create(
        &self,
        key: TaskKey,
        name: &str,
        workers: usize,
    ) -> Result<Arc<WorkerPool>, EngineError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.released {
            return Err(EngineError::CacheReleased);
        }
        if let Some(pool) = state.pools.get(&key) {
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(self.factory.create(name, workers)?);
        debug!(pool = %name, workers = workers, "created task pool");
        state.pools.insert(key, Arc::clone(&pool));
        Ok(pool)
    }

    /// Number of pools currently held.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pools
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`release_all`](Self::release_all) has been called.
    pub fn is_released(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .released
    }

    /// Shut down every pool and refuse further creations.
    pub async fn release_all(&self) {
        let pools: Vec<Arc<WorkerPool>> = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.released = true;
            state.pools.drain().map(|(_, pool)| pool).collect()
        };

        debug!(count = pools.len(), "releasing task pools");
        for pool in pools {
            pool.shutdown().await;
        }
    }
}

impl std::fmt::Debug for PoolCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolCache")
            .field("pools", &self.len())
            .field("released", &self.is_released())
            .finish()
    }
}
