//! Shared in-memory registry of generation tasks.
//!
//! The registry is the single synchronization domain for task state. Every
//! operation takes the lock for exactly one lookup or update, so a slow
//! producer working on one task never blocks accessors for another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::TaskError;

/// Internal record. Never handed out; see [`TaskSnapshot`].
#[derive(Debug, Clone)]
struct TaskRecord {
    subject: String,
    /// False once an abort was requested.
    active: bool,
    generated_count: u32,
    /// Duplicate-stream guard.
    streaming: bool,
    created_at: DateTime<Utc>,
    last_touched: Instant,
}

impl TaskRecord {
    fn touch(&mut self) {
        self.last_touched = Instant::now();
    }
}

/// Point-in-time copy of a task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub subject: String,
    pub active: bool,
    pub generated_count: u32,
    pub streaming: bool,
    pub created_at: DateTime<Utc>,
}

/// Process-wide task store, cheap to clone and shared through `AppState`.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    records: Arc<Mutex<HashMap<String, TaskRecord>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskRecord>> {
        // Critical sections are single assignments, so a poisoned map is still consistent.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a task whose first artifact has already been produced.
    pub fn create(&self, subject: impl Into<String>) -> String {
        let task_id = Uuid::new_v4().to_string();
        let record = TaskRecord {
            subject: subject.into(),
            active: true,
            generated_count: 1,
            streaming: false,
            created_at: Utc::now(),
            last_touched: Instant::now(),
        };
        self.lock().insert(task_id.clone(), record);
        task_id
    }

    pub fn get(&self, task_id: &str) -> Result<TaskSnapshot, TaskError> {
        self.lock()
            .get(task_id)
            .map(|record| TaskSnapshot {
                task_id: task_id.to_string(),
                subject: record.subject.clone(),
                active: record.active,
                generated_count: record.generated_count,
                streaming: record.streaming,
                created_at: record.created_at,
            })
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))
    }

    /// True only if the record exists and no abort was requested.
    pub fn is_active(&self, task_id: &str) -> bool {
        self.lock()
            .get(task_id)
            .map(|record| record.active)
            .unwrap_or(false)
    }

    /// Set the active flag, returning the number of artifacts generated so far.
    pub fn set_active(&self, task_id: &str, active: bool) -> Result<u32, TaskError> {
        let mut records = self.lock();
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
        record.active = active;
        record.touch();
        Ok(record.generated_count)
    }

    /// Record one more committed artifact. The count saturates at `total`.
    pub fn increment_count(&self, task_id: &str, total: u32) -> Result<u32, TaskError> {
        let mut records = self.lock();
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
        record.generated_count = record.generated_count.saturating_add(1).min(total);
        record.touch();
        Ok(record.generated_count)
    }

    /// Atomically claim the task's stream.
    ///
    /// Fails with [`TaskError::DuplicateStream`] without touching the record if
    /// another consumer holds it.
    pub fn try_begin_stream(&self, task_id: &str) -> Result<(), TaskError> {
        let mut records = self.lock();
        let record = records
            .get_mut(task_id)
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
        if record.streaming {
            return Err(TaskError::DuplicateStream(task_id.to_string()));
        }
        record.streaming = true;
        record.touch();
        Ok(())
    }

    /// Claim the task's stream and return a guard that releases it on drop.
    pub fn begin_stream(&self, task_id: &str) -> Result<StreamGuard, TaskError> {
        self.try_begin_stream(task_id)?;
        Ok(StreamGuard {
            registry: self.clone(),
            task_id: task_id.to_string(),
        })
    }

    /// Release the stream claim. Aborted records are removed at this point.
    pub fn end_stream(&self, task_id: &str) {
        let mut records = self.lock();
        let Some(record) = records.get_mut(task_id) else {
            return;
        };
        record.streaming = false;
        record.touch();
        if !record.active {
            records.remove(task_id);
            tracing::debug!(task_id = %task_id, "Removed aborted task after stream ended");
        }
    }

    /// Returns whether a record was removed.
    pub fn remove(&self, task_id: &str) -> bool {
        self.lock().remove(task_id).is_some()
    }

    /// Request an abort for every live task. Returns how many were affected.
    pub fn abort_all(&self) -> usize {
        let mut records = self.lock();
        let mut count = 0;
        for record in records.values_mut().filter(|r| r.active) {
            record.active = false;
            record.touch();
            count += 1;
        }
        count
    }

    /// Drop records that are not being streamed and have been idle for at
    /// least `max_idle`.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| record.streaming || record.last_touched.elapsed() < max_idle);
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds a task's stream claim; calls [`TaskRegistry::end_stream`] on drop.
///
/// This covers consumers that disconnect mid-stream: the claim is released so
/// the task can be resumed, or removed if it was aborted meanwhile.
#[derive(Debug)]
pub struct StreamGuard {
    registry: TaskRegistry,
    task_id: String,
}

impl StreamGuard {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.end_stream(&self.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_starts_active_with_one_artifact() {
        let registry = TaskRegistry::new();
        let id = registry.create("Acme");

        let snapshot = registry.get(&id).unwrap();
        assert_eq!(snapshot.subject, "Acme");
        assert!(snapshot.active);
        assert!(!snapshot.streaming);
        assert_eq!(snapshot.generated_count, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_task_is_not_found() {
        let registry = TaskRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(TaskError::TaskNotFound(_))
        ));
        assert!(matches!(
            registry.set_active("missing", false),
            Err(TaskError::TaskNotFound(_))
        ));
        assert!(!registry.is_active("missing"));
        assert!(!registry.remove("missing"));
    }

    #[test]
    fn test_increment_count_saturates_at_total() {
        let registry = TaskRegistry::new();
        let id = registry.create("Acme");

        assert_eq!(registry.increment_count(&id, 3).unwrap(), 2);
        assert_eq!(registry.increment_count(&id, 3).unwrap(), 3);
        assert_eq!(registry.increment_count(&id, 3).unwrap(), 3);
    }

    #[test]
    fn test_set_active_reports_generated_count() {
        let registry = TaskRegistry::new();
        let id = registry.create("Acme");
        registry.increment_count(&id, 6).unwrap();

        assert_eq!(registry.set_active(&id, false).unwrap(), 2);
        assert!(!registry.is_active(&id));
        // Idempotent while the record lives
        assert_eq!(registry.set_active(&id, false).unwrap(), 2);
    }

    #[test]
    fn test_second_stream_claim_is_rejected() {
        let registry = TaskRegistry::new();
        let id = registry.create("Acme");

        registry.try_begin_stream(&id).unwrap();
        assert!(matches!(
            registry.try_begin_stream(&id),
            Err(TaskError::DuplicateStream(_))
        ));
        assert_eq!(registry.get(&id).unwrap().generated_count, 1);
    }

    #[test]
    fn test_end_stream_keeps_active_and_removes_aborted() {
        let registry = TaskRegistry::new();
        let active = registry.create("Acme");
        let aborted = registry.create("Globex");

        registry.try_begin_stream(&active).unwrap();
        registry.try_begin_stream(&aborted).unwrap();
        registry.set_active(&aborted, false).unwrap();

        registry.end_stream(&active);
        registry.end_stream(&aborted);

        assert!(!registry.get(&active).unwrap().streaming);
        assert!(registry.get(&aborted).is_err());
    }

    #[test]
    fn test_stream_guard_releases_claim_on_drop() {
        let registry = TaskRegistry::new();
        let id = registry.create("Acme");

        {
            let guard = registry.begin_stream(&id).unwrap();
            assert_eq!(guard.task_id(), id);
            assert!(registry.get(&id).unwrap().streaming);
        }

        assert!(!registry.get(&id).unwrap().streaming);
        registry.try_begin_stream(&id).unwrap();
    }

    #[test]
    fn test_abort_all_only_counts_live_tasks() {
        let registry = TaskRegistry::new();
        let a = registry.create("a");
        let b = registry.create("b");
        registry.set_active(&a, false).unwrap();

        assert_eq!(registry.abort_all(), 1);
        assert!(!registry.is_active(&a));
        assert!(!registry.is_active(&b));
    }

    #[test]
    fn test_sweep_idle_skips_streaming_tasks() {
        let registry = TaskRegistry::new();
        let idle = registry.create("idle");
        let streaming = registry.create("streaming");
        registry.try_begin_stream(&streaming).unwrap();

        assert_eq!(registry.sweep_idle(Duration::from_secs(3600)), 0);
        assert_eq!(registry.sweep_idle(Duration::ZERO), 1);
        assert!(registry.get(&idle).is_err());
        assert!(registry.get(&streaming).is_ok());
    }

    #[test]
    fn test_concurrent_increments_never_exceed_total() {
        let registry = TaskRegistry::new();
        let id = registry.create("Acme");
        let total = 50;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..20 {
                        let count = registry.increment_count(&id, total).unwrap();
                        assert!(count >= last, "count went backwards");
                        assert!(count <= total);
                        last = count;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.get(&id).unwrap().generated_count, total);
    }
}
