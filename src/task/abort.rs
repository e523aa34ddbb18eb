//! Cancellation predicate derived from registry state.

use std::sync::Arc;

use super::TaskRegistry;

/// Owned abort check handed to producers.
///
/// Cheap to clone and callable from blocking threads. Returns `true` once the
/// task should stop.
pub type AbortPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Predicate that never fires, used before a task has an id.
pub fn never_abort() -> AbortPredicate {
    Arc::new(|| false)
}

/// Answers "should this task stop?" from the registry.
///
/// The answer is recomputed on every call; nothing is cached, so an abort
/// requested concurrently is visible at the very next check.
#[derive(Debug, Clone)]
pub struct AbortCoordinator {
    registry: TaskRegistry,
}

impl AbortCoordinator {
    pub fn new(registry: TaskRegistry) -> Self {
        Self { registry }
    }

    /// A task is aborted when its record is gone or its active flag is cleared.
    pub fn is_aborted(&self, task_id: &str) -> bool {
        !self.registry.is_active(task_id)
    }

    /// Bind [`is_aborted`](Self::is_aborted) to one task id.
    pub fn predicate(&self, task_id: &str) -> AbortPredicate {
        let coordinator = self.clone();
        let task_id = task_id.to_string();
        Arc::new(move || coordinator.is_aborted(&task_id))
    }
}
