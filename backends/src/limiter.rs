//! Bounded per-group concurrency for backend requests.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::BackendError;

/// Caps the number of in-flight transport attempts per replica group.
///
/// Waiters on one group are served in FIFO order. The permit is an RAII
/// guard, so a slot is returned on every exit path; cancelling a caller that
/// is still waiting (by dropping its future) simply removes it from the
/// queue.
#[derive(Clone)]
pub struct ServerLimiter {
    slots: Option<Arc<HashMap<String, Arc<Semaphore>>>>,
}

/// One acquired slot. Dropping it releases the slot exactly once.
pub struct LimiterPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ServerLimiter {
    /// Limiter with `capacity` concurrent slots for each named group.
    pub fn new<S: AsRef<str>>(groups: &[S], capacity: usize) -> Self {
        let slots = groups
            .iter()
            .map(|group| (group.as_ref().to_string(), Arc::new(Semaphore::new(capacity))))
            .collect();

        ServerLimiter {
            slots: Some(Arc::new(slots)),
        }
    }

    /// Limiter that never blocks, used when no concurrency limit is
    /// configured for a group.
    pub fn unbounded() -> Self {
        ServerLimiter { slots: None }
    }

    /// Acquires a slot for `group`, waiting until one frees up.
    pub async fn enter(&self, group: &str) -> Result<LimiterPermit, BackendError> {
        let Some(slots) = &self.slots else {
            return Ok(LimiterPermit { _permit: None });
        };

        let semaphore = slots.get(group).ok_or_else(|| {
            BackendError::Limiter(format!("no limiter slots configured for group {group}"))
        })?;

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| BackendError::Limiter(e.to_string()))?;

        Ok(LimiterPermit {
            _permit: Some(permit),
        })
    }
}
