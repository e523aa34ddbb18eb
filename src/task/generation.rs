//! Generation task state machine.
//!
//! ```text
//!   Created ──start_first──▶ AwaitingFirst ──begin_streaming──▶ Streaming
//!                                                                  │
//!                      Done(Completed | Aborted | Errored) ◀───────┘
//! ```
//!
//! Artifact 0 is produced synchronously by [`GenerationTask::start_first`].
//! The rest are produced one per [`GenerationTask::next_event`] call. Each step
//! checks the abort predicate before production (checkpoint A), hands it to the
//! producer for mid-production checks, and checks it again afterwards
//! (checkpoint B) before committing the artifact.

use futures::Stream;

use super::{never_abort, AbortCoordinator, StreamGuard, TaskError, TaskRegistry};
use crate::producer::{ProducerError, ProducerRef, Production};

/// How a task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Aborted,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Created,
    AwaitingFirst,
    Streaming { next_index: u32 },
    Done(Outcome),
}

/// Lifecycle event emitted while streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    Success {
        artifact_ref: String,
        index: u32,
        is_last: bool,
    },
    Aborted {
        total_generated: u32,
    },
    Error {
        message: String,
    },
}

/// Result of the synchronous first production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstArtifact {
    pub task_id: String,
    pub artifact_ref: String,
}

/// Drives one task from creation to a terminal state.
pub struct GenerationTask {
    registry: TaskRegistry,
    abort: AbortCoordinator,
    producer: ProducerRef,
    task_id: Option<String>,
    subject: String,
    total: u32,
    phase: TaskPhase,
    guard: Option<StreamGuard>,
}

impl GenerationTask {
    /// A fresh task in [`TaskPhase::Created`].
    pub fn new(registry: TaskRegistry, producer: ProducerRef, subject: impl Into<String>) -> Self {
        Self {
            abort: AbortCoordinator::new(registry.clone()),
            registry,
            producer,
            task_id: None,
            subject: subject.into(),
            total: 0,
            phase: TaskPhase::Created,
            guard: None,
        }
    }

    /// Re-enter [`TaskPhase::AwaitingFirst`] for a task created earlier.
    ///
    /// `subject` overrides the recorded subject when given.
    pub fn attach(
        registry: TaskRegistry,
        producer: ProducerRef,
        task_id: &str,
        subject: Option<String>,
    ) -> Result<Self, TaskError> {
        let snapshot = registry.get(task_id)?;
        let subject = subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(snapshot.subject);

        let mut task = Self::new(registry, producer, subject);
        task.task_id = Some(task_id.to_string());
        task.phase = TaskPhase::AwaitingFirst;
        Ok(task)
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    /// Produce artifact 0 and register the task.
    ///
    /// No record exists until this succeeds, so there is nothing to abort yet.
    pub async fn start_first(&mut self) -> Result<FirstArtifact, TaskError> {
        if self.phase != TaskPhase::Created {
            return Err(TaskError::InvalidTransition {
                action: "start",
                phase: self.phase,
            });
        }

        let artifact_ref = match self.producer.produce(&self.subject, 0, never_abort()).await {
            Ok(Production::Produced(artifact_ref)) => artifact_ref,
            Ok(Production::Aborted) => {
                self.phase = TaskPhase::Done(Outcome::Errored);
                return Err(ProducerError::Other(
                    "Producer aborted the first artifact".to_string(),
                )
                .into());
            }
            Err(e) => {
                tracing::error!(subject = %self.subject, "Error generating first artifact: {}", e);
                self.phase = TaskPhase::Done(Outcome::Errored);
                return Err(e.into());
            }
        };

        let task_id = self.registry.create(self.subject.clone());
        tracing::info!(task_id = %task_id, producer = self.producer.name(), "Created generation task");

        self.task_id = Some(task_id.clone());
        self.phase = TaskPhase::AwaitingFirst;
        Ok(FirstArtifact {
            task_id,
            artifact_ref,
        })
    }

    /// Claim the task's stream and enter [`TaskPhase::Streaming`].
    ///
    /// Streaming resumes at the registry's `generated_count`, which is 1 for a
    /// task that was never streamed. A rejected claim leaves the record as is.
    pub fn begin_streaming(&mut self, total: u32) -> Result<(), TaskError> {
        let task_id = match (&self.phase, &self.task_id) {
            (TaskPhase::AwaitingFirst, Some(task_id)) => task_id.clone(),
            _ => {
                return Err(TaskError::InvalidTransition {
                    action: "stream",
                    phase: self.phase,
                })
            }
        };
        if total == 0 {
            return Err(TaskError::InvalidRequest(
                "Total must be greater than 0".to_string(),
            ));
        }

        let guard = self.registry.begin_stream(&task_id)?;
        let next_index = self.registry.get(&task_id)?.generated_count;

        tracing::info!(task_id = %task_id, total, next_index, "Streaming artifacts");
        self.guard = Some(guard);
        self.total = total;
        self.phase = TaskPhase::Streaming { next_index };
        Ok(())
    }

    /// Advance by one artifact. Returns `None` once the task is done.
    pub async fn next_event(&mut self) -> Option<GenerationEvent> {
        let index = match self.phase {
            TaskPhase::Streaming { next_index } => next_index,
            _ => return None,
        };
        let task_id = self.task_id.clone()?;

        if index >= self.total {
            self.finish(&task_id, Outcome::Completed);
            return None;
        }

        // Checkpoint A
        if self.abort.is_aborted(&task_id) {
            tracing::info!(task_id = %task_id, index, "Task aborted before generating artifact");
            return Some(self.abort_at(&task_id, index));
        }

        let result = self
            .producer
            .produce(&self.subject, index, self.abort.predicate(&task_id))
            .await;

        let artifact_ref = match result {
            Ok(Production::Produced(artifact_ref)) => artifact_ref,
            Ok(Production::Aborted) => {
                tracing::info!(task_id = %task_id, index, "Task aborted during artifact generation");
                return Some(self.abort_at(&task_id, index));
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, index, "Error streaming artifacts: {}", e);
                self.finish(&task_id, Outcome::Errored);
                return Some(GenerationEvent::Error {
                    message: e.to_string(),
                });
            }
        };

        // Checkpoint B
        if self.abort.is_aborted(&task_id) {
            tracing::info!(task_id = %task_id, index, "Task aborted after artifact generation");
            return Some(self.abort_at(&task_id, index));
        }

        if self.registry.increment_count(&task_id, self.total).is_err() {
            return Some(self.abort_at(&task_id, index));
        }

        let is_last = index + 1 == self.total;
        if is_last {
            self.finish(&task_id, Outcome::Completed);
        } else {
            self.phase = TaskPhase::Streaming {
                next_index: index + 1,
            };
        }

        Some(GenerationEvent::Success {
            artifact_ref,
            index,
            is_last,
        })
    }

    /// Consume the task as a stream of events ending at the terminal state.
    pub fn into_events(self) -> impl Stream<Item = GenerationEvent> + Send {
        let mut task = self;
        async_stream::stream! {
            while let Some(event) = task.next_event().await {
                yield event;
            }
        }
    }

    fn abort_at(&mut self, task_id: &str, index: u32) -> GenerationEvent {
        let total_generated = self
            .registry
            .get(task_id)
            .map(|snapshot| snapshot.generated_count)
            .unwrap_or(index);
        self.finish(task_id, Outcome::Aborted);
        GenerationEvent::Aborted { total_generated }
    }

    fn finish(&mut self, task_id: &str, outcome: Outcome) {
        self.registry.remove(task_id);
        // Record is gone, so the guard's end_stream is a no-op.
        self.guard = None;
        self.phase = TaskPhase::Done(outcome);
        tracing::info!(task_id = %task_id, ?outcome, "Generation task finished");
    }
}
