//! Execution context for list operations
//!
//! A `Resources` handle bundles the two things every storage operation needs:
//! - a compute pool (rayon) on which pack/unpack/copy work is issued
//! - a `MemoryBudget` that accounts for every list buffer it hands out
//!
//! Work issued through `Resources::install` has completed when the call
//! returns, so the publication of a list's size can always be ordered after
//! the writes it covers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for an execution context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesConfig {
    /// Number of compute threads (0 = rayon default)
    pub num_threads: usize,
    /// Upper bound for bytes held by list buffers (None = unlimited)
    pub memory_limit_bytes: Option<usize>,
}

impl ResourcesConfig {
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }
}

/// Byte accounting for list buffers.
///
/// Reservations are RAII: the bytes return to the budget when the
/// `Reservation` (held by the owning list) is dropped.
#[derive(Debug)]
pub struct MemoryBudget {
    limit: Option<usize>,
    in_use: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Bytes currently held by live reservations
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Reserve `bytes`, failing without side effects if the limit would be exceeded.
    pub fn reserve(self: &Arc<Self>, bytes: usize) -> Result<Reservation> {
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            let next = current.checked_add(bytes).ok_or_else(|| Error::Allocation {
                bytes,
                reason: "byte count overflow".to_string(),
            })?;
            if let Some(limit) = self.limit
                && next > limit
            {
                return Err(Error::Allocation {
                    bytes,
                    reason: format!("memory budget exhausted ({current} of {limit} bytes in use)"),
                });
            }
            match self.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Ok(Reservation {
                        budget: Arc::clone(self),
                        bytes,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }
}

/// Bytes held against a `MemoryBudget`; released on drop.
#[derive(Debug)]
pub struct Reservation {
    budget: Arc<MemoryBudget>,
    bytes: usize,
}

impl Reservation {
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.budget.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// Execution context: compute pool plus allocator.
///
/// Cheap to clone; clones share the pool and the budget.
#[derive(Debug, Clone)]
pub struct Resources {
    pool: Arc<rayon::ThreadPool>,
    memory: Arc<MemoryBudget>,
}

impl Resources {
    /// Context with a default-sized pool and no memory limit
    pub fn new() -> Result<Self> {
        Self::with_config(&ResourcesConfig::default())
    }

    pub fn with_config(config: &ResourcesConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("ivf-compute-{i}"))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build compute pool: {e}")))?;
        Ok(Self {
            pool: Arc::new(pool),
            memory: Arc::new(MemoryBudget::new(config.memory_limit_bytes)),
        })
    }

    /// Run `op` on the compute pool and wait for it
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    pub fn memory(&self) -> &Arc<MemoryBudget> {
        &self.memory
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Allocate a buffer of `len` values produced by `fill`, charged to the budget.
    pub(crate) fn alloc_with<T, F>(&self, len: usize, fill: F) -> Result<(Vec<T>, Reservation)>
    where
        F: FnMut() -> T,
    {
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| Error::Allocation {
                bytes: usize::MAX,
                reason: "buffer size overflow".to_string(),
            })?;
        let reservation = self.memory.reserve(bytes)?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).map_err(|e| Error::Allocation {
            bytes,
            reason: e.to_string(),
        })?;
        buf.resize_with(len, fill);
        Ok((buf, reservation))
    }
}
